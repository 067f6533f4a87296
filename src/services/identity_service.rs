//! Links Stripe customers to Telegram users from completed checkout sessions.

use crate::entities::{customer_entity as customers, end_user_entity as end_users};
use crate::error::AppResult;
use crate::models::{StripeObject, WebhookEvent};
use crate::services::customer_service::ensure_customer;
use crate::services::projection_service::{project_customer, ProjectionOutcome};
use crate::services::reconciler::{find_by_key, reconcile, Candidate, ReconcileOutcome};
use crate::utils::normalize_handle;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, Set, TransactionTrait,
};
use std::fmt;

/// Checkout custom-field keys that carry the buyer's Telegram handle.
const HANDLE_FIELD_KEYS: &[&str] = &["telegram", "telegramusername"];

/// Normalised Telegram handle from a checkout session's custom fields.
pub fn telegram_handle(session: StripeObject<'_>) -> Option<String> {
    session
        .items("custom_fields")
        .into_iter()
        .filter(|field| {
            field
                .str("key")
                .is_some_and(|key| HANDLE_FIELD_KEYS.iter().any(|k| key.eq_ignore_ascii_case(k)))
        })
        .find_map(|field| {
            field
                .child("text")
                .str("value")
                .and_then(|value| normalize_handle(&value))
        })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    NoCustomer,
    NoHandle,
    TagSaved {
        customer_id: String,
        telegram_tag: String,
    },
    AlreadyLinked {
        customer_id: String,
        user_id: i64,
    },
    NoMatchingUser {
        customer_id: String,
        telegram_tag: String,
    },
    Linked {
        customer_id: String,
        user_id: i64,
        projection: ProjectionOutcome,
    },
}

impl fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkOutcome::NoCustomer => write!(f, "session has no customer"),
            LinkOutcome::NoHandle => write!(f, "telegram tag not found"),
            LinkOutcome::TagSaved {
                customer_id,
                telegram_tag,
            } => write!(f, "customer {customer_id} tagged @{telegram_tag}"),
            LinkOutcome::AlreadyLinked {
                customer_id,
                user_id,
            } => write!(f, "customer {customer_id} already linked to end user {user_id}"),
            LinkOutcome::NoMatchingUser {
                customer_id,
                telegram_tag,
            } => write!(f, "no end user @{telegram_tag} yet for customer {customer_id}"),
            LinkOutcome::Linked {
                customer_id,
                user_id,
                projection,
            } => write!(
                f,
                "customer {customer_id} linked to end user {user_id}, {projection}"
            ),
        }
    }
}

/// Stores the handle on the customer, creating a bare row if needed. The
/// handle is always written; `updated` only moves forward.
pub(crate) async fn upsert_telegram_tag<C>(
    conn: &C,
    customer_id: &str,
    telegram_tag: &str,
    seen_at: DateTime<Utc>,
) -> AppResult<()>
where
    C: ConnectionTrait + TransactionTrait,
{
    ensure_customer(conn, customer_id).await?;
    let Some(customer) = find_by_key::<customers::Entity, _>(conn, customer_id).await? else {
        return Ok(());
    };

    let updated = customer.updated.max(seen_at);
    let mut active_customer = customer.into_active_model();
    active_customer.telegram_tag = Set(Some(telegram_tag.to_string()));
    active_customer.updated = Set(updated);
    active_customer.update(conn).await?;
    Ok(())
}

#[derive(Clone)]
pub struct IdentityService {
    pool: DatabaseConnection,
}

impl IdentityService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// `checkout.session.completed`: records the Telegram handle entered at
    /// checkout on the session's customer.
    pub async fn save_telegram_tag(&self, event: &WebhookEvent) -> AppResult<LinkOutcome> {
        let session = event.object();
        let Some(customer_id) = session.reference("customer") else {
            return Ok(LinkOutcome::NoCustomer);
        };
        let Some(telegram_tag) = telegram_handle(session) else {
            log::info!("[CHECKOUT] customer {customer_id}: telegram tag not found");
            return Ok(LinkOutcome::NoHandle);
        };

        let seen_at = event.event_time().unwrap_or_else(Utc::now);
        let txn = self.pool.begin().await?;
        upsert_telegram_tag(&txn, &customer_id, &telegram_tag, seen_at).await?;
        txn.commit().await?;

        log::info!("[CHECKOUT] customer {customer_id}: telegram tag @{telegram_tag} saved");
        Ok(LinkOutcome::TagSaved {
            customer_id,
            telegram_tag,
        })
    }

    /// Fills empty customer contact fields from the session's
    /// `customer_details`. Never overwrites.
    pub async fn backfill_customer_details(&self, event: &WebhookEvent) -> AppResult<ReconcileOutcome> {
        let session = event.object();
        let Some(customer_id) = session.reference("customer") else {
            return Ok(ReconcileOutcome::Skipped);
        };
        let details = session.child("customer_details");
        let candidate = Candidate::<customers::Entity>::new(customer_id)
            .field(customers::Column::Email, details.str("email"))
            .field(customers::Column::Name, details.str("name"))
            .field(customers::Column::Phone, details.str("phone"));
        if candidate.is_empty() {
            return Ok(ReconcileOutcome::Skipped);
        }

        let txn = self.pool.begin().await?;
        ensure_customer(&txn, candidate.id()).await?;
        // no event time: backfill only
        let outcome = reconcile(&txn, candidate, None).await?;
        txn.commit().await?;
        Ok(outcome)
    }

    /// Links the session's customer to an existing end user with the same
    /// username and grants access from the customer's subscriptions.
    pub async fn link_end_user(&self, event: &WebhookEvent) -> AppResult<LinkOutcome> {
        let session = event.object();
        let Some(customer_id) = session.reference("customer") else {
            return Ok(LinkOutcome::NoCustomer);
        };
        let Some(telegram_tag) = telegram_handle(session) else {
            return Ok(LinkOutcome::NoHandle);
        };
        let Some(customer) = find_by_key::<customers::Entity, _>(&self.pool, &customer_id).await?
        else {
            return Ok(LinkOutcome::NoCustomer);
        };
        if let Some(user_id) = customer.end_user_id {
            return Ok(LinkOutcome::AlreadyLinked {
                customer_id,
                user_id,
            });
        }

        let Some(user) = end_users::Entity::find()
            .filter(end_users::Column::Username.eq(telegram_tag.as_str()))
            .one(&self.pool)
            .await?
        else {
            return Ok(LinkOutcome::NoMatchingUser {
                customer_id,
                telegram_tag,
            });
        };

        let user_id = user.id;
        let mut active_customer = customer.into_active_model();
        active_customer.end_user_id = Set(Some(user_id));
        active_customer.update(&self.pool).await?;

        let projection = project_customer(&self.pool, &customer_id, user).await?;
        log::info!("[CHECKOUT] customer {customer_id} linked to end user {user_id}: {projection}");
        Ok(LinkOutcome::Linked {
            customer_id,
            user_id,
            projection,
        })
    }
}
