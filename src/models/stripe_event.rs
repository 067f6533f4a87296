use crate::utils::from_epoch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

static NULL: Value = Value::Null;

/// A verified Stripe webhook event.
///
/// Only the envelope is typed; the payload stays loose so that events from
/// any API version (or with missing fields) still reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

impl WebhookEvent {
    /// Provider-asserted creation instant, the sole ordering key for merges.
    pub fn event_time(&self) -> Option<DateTime<Utc>> {
        self.created.and_then(from_epoch)
    }

    pub fn object(&self) -> StripeObject<'_> {
        StripeObject(&self.data.object)
    }
}

/// Read-only view over a Stripe JSON object.
///
/// Absent keys, JSON null, empty strings and empty arrays all read as `None`.
#[derive(Debug, Clone, Copy)]
pub struct StripeObject<'a>(&'a Value);

impl<'a> StripeObject<'a> {
    pub fn new(value: &'a Value) -> Self {
        Self(value)
    }

    pub fn child(&self, key: &str) -> StripeObject<'a> {
        StripeObject(self.0.get(key).unwrap_or(&NULL))
    }

    /// First element of a Stripe list (`{ "data": [...] }`) or plain array.
    pub fn first_item(&self, key: &str) -> StripeObject<'a> {
        let list = self.0.get(key).unwrap_or(&NULL);
        let items = list.get("data").unwrap_or(list);
        StripeObject(items.get(0).unwrap_or(&NULL))
    }

    pub fn items(&self, key: &str) -> Vec<StripeObject<'a>> {
        let list = self.0.get(key).unwrap_or(&NULL);
        let items = list.get("data").unwrap_or(list);
        items
            .as_array()
            .map(|arr| arr.iter().map(StripeObject).collect())
            .unwrap_or_default()
    }

    pub fn str(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    }

    pub fn i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(Value::as_i64)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    pub fn time(&self, key: &str) -> Option<DateTime<Utc>> {
        self.i64(key).and_then(from_epoch)
    }

    /// Id of an expandable reference: either the bare id string or an
    /// expanded object carrying `id`.
    pub fn reference(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            obj @ Value::Object(_) => StripeObject(obj).str("id"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_envelope() {
        let raw = json!({
            "id": "evt_1",
            "type": "charge.succeeded",
            "created": 1_700_000_000,
            "data": { "object": { "id": "ch_1", "amount": 500 } }
        });
        let event: WebhookEvent = serde_json::from_value(raw).unwrap();
        assert_eq!(event.event_type, "charge.succeeded");
        assert_eq!(
            event.event_time().unwrap().to_rfc3339(),
            "2023-11-14T22:13:20+00:00"
        );
        assert_eq!(event.object().i64("amount"), Some(500));
    }

    #[test]
    fn test_blank_values_read_as_none() {
        let value = json!({
            "empty": "",
            "spaces": "  ",
            "null": null,
            "list": { "data": [] }
        });
        let obj = StripeObject::new(&value);
        assert_eq!(obj.str("empty"), None);
        assert_eq!(obj.str("spaces"), None);
        assert_eq!(obj.str("null"), None);
        assert_eq!(obj.str("missing"), None);
        assert!(obj.first_item("list").str("id").is_none());
        assert!(obj.child("missing").child("deeper").str("x").is_none());
    }

    #[test]
    fn test_expandable_reference() {
        let value = json!({
            "customer": "cus_1",
            "payment_intent": { "id": "pi_1", "object": "payment_intent" }
        });
        let obj = StripeObject::new(&value);
        assert_eq!(obj.reference("customer").as_deref(), Some("cus_1"));
        assert_eq!(obj.reference("payment_intent").as_deref(), Some("pi_1"));
        assert_eq!(obj.reference("invoice"), None);
    }

    #[test]
    fn test_list_items() {
        let value = json!({
            "lines": { "data": [ { "period": { "end": 10 } }, { "period": { "end": 20 } } ] }
        });
        let obj = StripeObject::new(&value);
        assert_eq!(obj.items("lines").len(), 2);
        assert_eq!(obj.first_item("lines").child("period").i64("end"), Some(10));
    }
}
