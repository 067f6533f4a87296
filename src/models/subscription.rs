use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::query::EndUserLookup;
use crate::utils::normalize_handle;

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionCheckRequest {
    #[schema(example = 123456789)]
    pub user_id: Option<i64>,
    #[schema(example = "@some_user")]
    pub username: Option<String>,
    #[schema(example = "user@example.com")]
    pub email: Option<String>,
}

impl SubscriptionCheckRequest {
    pub fn normalized_username(&self) -> Option<String> {
        self.username.as_deref().and_then(normalize_handle)
    }

    pub fn normalized_email(&self) -> Option<String> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .map(str::to_string)
    }

    /// Identity hints in lookup priority order: id, then username, then email.
    pub fn lookups(&self) -> Vec<EndUserLookup> {
        let mut lookups = Vec::with_capacity(3);
        if let Some(id) = self.user_id {
            lookups.push(EndUserLookup::ById(id));
        }
        if let Some(name) = self.normalized_username() {
            lookups.push(EndUserLookup::ByUsername(name));
        }
        if let Some(email) = self.normalized_email() {
            lookups.push(EndUserLookup::ByEmail(email));
        }
        lookups
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionCheckResponse {
    pub user_id: Option<i64>,
    pub customer_found: bool,
    pub subscription_status: bool,
    pub date_end: Option<DateTime<Utc>>,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ExpiringQuery {
    pub days: Option<i64>,
    /// Start of the window, `YYYY-MM-DD` (UTC). Defaults to now.
    pub start_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExpiringSubscription {
    pub user_id: i64,
    pub date_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RevokeSubscriptionRequest {
    pub user_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
    pub processed: bool,
}
