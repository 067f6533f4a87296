use crate::entities::subscription_entity as subscriptions;
use crate::error::{AppError, AppResult};
use crate::models::{StripeObject, WebhookEvent};
use crate::services::customer_service::ensure_customer;
use crate::services::reconciler::{reconcile, Candidate, ReconcileOutcome};
use chrono::{DateTime, Utc};
use sea_orm::{DatabaseConnection, TransactionTrait};

#[derive(Clone)]
pub struct SubscriptionService {
    pool: DatabaseConnection,
}

impl SubscriptionService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// `customer.subscription.created` / `.updated`.
    pub async fn save_subscription(&self, event: &WebhookEvent) -> AppResult<ReconcileOutcome> {
        let candidate = subscription_candidate(event.object())?;
        self.store(event, candidate).await
    }

    /// `customer.subscription.deleted`: a regular merge whose period end is
    /// the moment the subscription actually ended.
    pub async fn end_subscription(&self, event: &WebhookEvent) -> AppResult<ReconcileOutcome> {
        let object = event.object();
        let candidate = subscription_candidate(object)?
            .field(subscriptions::Column::Ending, ended_at(object));
        self.store(event, candidate).await
    }

    async fn store(
        &self,
        event: &WebhookEvent,
        candidate: Candidate<subscriptions::Entity>,
    ) -> AppResult<ReconcileOutcome> {
        let id = candidate.id().to_string();
        let customer_id = event.object().reference("customer");

        let txn = self.pool.begin().await?;
        if let Some(customer_id) = &customer_id {
            ensure_customer(&txn, customer_id).await?;
        }
        let outcome = reconcile(&txn, candidate, event.event_time()).await?;
        txn.commit().await?;

        log::info!(
            "[SUBSCRIPTION] {id} (customer {}): {outcome}",
            customer_id.as_deref().unwrap_or("-")
        );
        Ok(outcome)
    }
}

/// Period bounds moved from the subscription onto its items in newer API
/// versions; read whichever is present.
fn period_bound(object: StripeObject<'_>, key: &str) -> Option<DateTime<Utc>> {
    object
        .time(key)
        .or_else(|| object.first_item("items").time(key))
}

pub fn current_period_end(object: StripeObject<'_>) -> Option<DateTime<Utc>> {
    period_bound(object, "current_period_end")
}

pub fn ended_at(object: StripeObject<'_>) -> Option<DateTime<Utc>> {
    object
        .time("ended_at")
        .or_else(|| object.time("canceled_at"))
}

pub fn subscription_candidate(
    object: StripeObject<'_>,
) -> AppResult<Candidate<subscriptions::Entity>> {
    use subscriptions::Column;
    let id = object
        .str("id")
        .ok_or_else(|| AppError::ValidationError("subscription object without id".into()))?;
    Ok(Candidate::new(id)
        .field(Column::Status, object.str("status"))
        .field(Column::CustomerId, object.reference("customer"))
        .field(Column::Started, period_bound(object, "current_period_start"))
        .field(Column::Ending, current_period_end(object))
        .field(Column::CancelAtPeriodEnd, object.bool("cancel_at_period_end"))
        .field(Column::Url, object.child("items").str("url"))
        .field(Column::CreatedAt, object.time("created")))
}
