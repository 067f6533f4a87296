/// Deep-link prefixes stripped from Telegram handles, checked in order.
const KNOWN_PREFIXES: &[&str] = &[
    "https://t.me/",
    "http://t.me/",
    "https://telegram.me/",
    "http://telegram.me/",
    "t.me/",
    "telegram.me/",
    "tg://resolve?domain=",
];

/// Normalises a free-text Telegram handle.
///
/// Trims whitespace, drops one leading `@`, drops one known deep-link prefix
/// and any trailing slashes. Returns `None` when nothing is left.
pub fn normalize_handle(raw: &str) -> Option<String> {
    let mut handle = raw.trim();
    if let Some(rest) = handle.strip_prefix('@') {
        handle = rest;
    }

    for prefix in KNOWN_PREFIXES {
        // `get` yields None when the cut would split a multi-byte char
        if let Some(head) = handle.get(..prefix.len())
            && head.eq_ignore_ascii_case(prefix)
        {
            handle = &handle[prefix.len()..];
            break;
        }
    }

    let handle = handle.trim_end_matches('/').trim();
    if handle.is_empty() {
        None
    } else {
        Some(handle.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sigil_and_links() {
        assert_eq!(normalize_handle("@foo").as_deref(), Some("foo"));
        assert_eq!(normalize_handle("https://t.me/foo").as_deref(), Some("foo"));
        assert_eq!(normalize_handle("t.me/foo/").as_deref(), Some("foo"));
        assert_eq!(normalize_handle("  HTTPS://T.ME/foo// ").as_deref(), Some("foo"));
        assert_eq!(
            normalize_handle("tg://resolve?domain=foo").as_deref(),
            Some("foo")
        );
        assert_eq!(normalize_handle("plain_name").as_deref(), Some("plain_name"));
    }

    #[test]
    fn test_normalize_empty_is_absent() {
        assert_eq!(normalize_handle(""), None);
        assert_eq!(normalize_handle("   "), None);
        assert_eq!(normalize_handle("@"), None);
        assert_eq!(normalize_handle("https://t.me/"), None);
        assert_eq!(normalize_handle("t.me///"), None);
    }

    #[test]
    fn test_only_one_prefix_is_stripped() {
        assert_eq!(
            normalize_handle("https://t.me/t.me/foo").as_deref(),
            Some("t.me/foo")
        );
    }

    #[test]
    fn test_non_ascii_input_does_not_panic() {
        assert_eq!(normalize_handle("пользователь").as_deref(), Some("пользователь"));
    }
}
