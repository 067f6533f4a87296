use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::StripeConfig;
use crate::error::{AppError, AppResult};
use crate::models::WebhookEvent;

type HmacSha256 = Hmac<Sha256>;

/// Parsed `Stripe-Signature` header: `t=<unix>,v1=<hex>[,v1=<hex>...]`.
///
/// Stripe sends several `v1` entries while a signing secret is being rolled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> AppResult<Self> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let (key, value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| AppError::SignatureError("malformed signature header".into()))?;
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        AppError::SignatureError("invalid signature timestamp".into())
                    })?);
                }
                "v1" => {
                    // a non-hex entry can never match, skip it
                    if let Ok(sig) = hex::decode(value) {
                        signatures.push(sig);
                    }
                }
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| AppError::SignatureError("missing signature timestamp".into()))?;
        if signatures.is_empty() {
            return Err(AppError::SignatureError("missing v1 signature".into()));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }
}

/// Authenticates inbound Stripe webhooks with the shared signing secret.
#[derive(Clone)]
pub struct StripeService {
    config: StripeConfig,
}

impl StripeService {
    pub fn new(config: StripeConfig) -> Self {
        Self { config }
    }

    /// Checks the signature over the raw body, then parses the event envelope.
    pub fn verify_and_parse(&self, payload: &[u8], signature_header: &str) -> AppResult<WebhookEvent> {
        self.verify_at(payload, signature_header, Utc::now().timestamp())?;

        let event: WebhookEvent = serde_json::from_slice(payload)
            .map_err(|e| AppError::ParseError(format!("invalid event payload: {e}")))?;
        Ok(event)
    }

    fn verify_at(&self, payload: &[u8], signature_header: &str, now: i64) -> AppResult<()> {
        if self.config.webhook_secret.is_empty() {
            return Err(AppError::SignatureError("webhook secret is not configured".into()));
        }

        let header = SignatureHeader::parse(signature_header)?;

        let tolerance = self.config.signature_tolerance_secs;
        if tolerance > 0 && now.abs_diff(header.timestamp) > tolerance.unsigned_abs() {
            return Err(AppError::SignatureError(format!(
                "signature timestamp {} outside tolerance of {tolerance}s",
                header.timestamp
            )));
        }

        let expected = self.compute_signature(header.timestamp, payload)?;
        let matched = header
            .signatures
            .iter()
            .any(|sig| sig.len() == expected.len() && bool::from(sig.ct_eq(&expected)));
        if !matched {
            return Err(AppError::SignatureError("signature mismatch".into()));
        }
        Ok(())
    }

    fn compute_signature(&self, timestamp: i64, payload: &[u8]) -> AppResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(self.config.webhook_secret.as_bytes())
            .map_err(|e| AppError::ConfigError(format!("invalid webhook secret: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// `Stripe-Signature` header value for a payload, as Stripe would send it.
#[cfg(test)]
pub fn sign_for_test(secret: &str, timestamp: i64, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{timestamp}.{payload}").as_bytes());
    format!("t={timestamp},v1={}", hex::encode(mac.finalize().into_bytes()))
}
