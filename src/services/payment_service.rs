use crate::entities::{charge_entity as charges, payment_intent_entity as payment_intents};
use crate::error::{AppError, AppResult};
use crate::models::{StripeObject, WebhookEvent};
use crate::services::reconciler::{
    find_by_key, insert_unless_exists, reconcile, Candidate, ReconcileOutcome,
};
use crate::utils::epoch;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use std::fmt;

/// Result of reconciling one charge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargeOutcome {
    pub charge: ReconcileOutcome,
    pub placeholder_created: bool,
    pub intent_fulfilled: bool,
}

impl fmt::Display for ChargeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "charge {}", self.charge)?;
        if self.placeholder_created {
            write!(f, ", placeholder payment intent created")?;
        }
        if self.intent_fulfilled {
            write!(f, ", payment intent marked succeeded")?;
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct PaymentService {
    pool: DatabaseConnection,
}

impl PaymentService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub async fn save_payment_intent(&self, event: &WebhookEvent) -> AppResult<ReconcileOutcome> {
        let candidate = payment_intent_candidate(event.object())?;
        let id = candidate.id().to_string();

        let txn = self.pool.begin().await?;
        let outcome = reconcile(&txn, candidate, event.event_time()).await?;
        // a succeeded charge pins its intent to succeeded whatever the merge wrote
        if has_succeeded_charge(&txn, &id).await? && fulfill_payment_intent(&txn, &id).await? {
            log::info!("[PAYMENT_INTENT] {id}: kept succeeded, a succeeded charge references it");
        }
        txn.commit().await?;

        log::info!("[PAYMENT_INTENT] {id}: {outcome}");
        Ok(outcome)
    }

    /// Reconciles a charge. The parent PaymentIntent is guaranteed to exist
    /// afterwards, and a succeeded charge marks it succeeded. All of it
    /// commits or rolls back together.
    pub async fn save_charge(&self, event: &WebhookEvent) -> AppResult<ChargeOutcome> {
        let object = event.object();
        let candidate = charge_candidate(object)?;
        let charge_id = candidate.id().to_string();
        let intent_id = object.reference("payment_intent");

        let txn = self.pool.begin().await?;

        let placeholder_created = match &intent_id {
            Some(intent_id) => {
                ensure_payment_intent(&txn, intent_id, object.str("currency")).await?
            }
            None => {
                log::warn!("[CHARGE] {charge_id} carries no payment_intent");
                false
            }
        };

        let charge = reconcile(&txn, candidate, event.event_time()).await?;

        let succeeded = find_by_key::<charges::Entity, _>(&txn, &charge_id)
            .await?
            .is_some_and(|c| c.status.as_deref() == Some(payment_intents::SUCCEEDED_STATUS));
        let intent_fulfilled = match (&intent_id, succeeded) {
            (Some(intent_id), true) => fulfill_payment_intent(&txn, intent_id).await?,
            _ => false,
        };

        txn.commit().await?;

        let outcome = ChargeOutcome {
            charge,
            placeholder_created,
            intent_fulfilled,
        };
        log::info!("[CHARGE] {charge_id}: {outcome}");
        Ok(outcome)
    }
}

fn require_id(object: StripeObject<'_>, kind: &str) -> AppResult<String> {
    object
        .str("id")
        .ok_or_else(|| AppError::ValidationError(format!("{kind} object without id")))
}

/// Events whose object is some other type (disputes, refunds) share the
/// `charge.` prefix and must not land in the charges table.
fn check_object_type(object: StripeObject<'_>, expected: &str) -> AppResult<()> {
    match object.str("object") {
        Some(actual) if actual != expected => Err(AppError::ValidationError(format!(
            "expected a {expected} object, got {actual}"
        ))),
        _ => Ok(()),
    }
}

pub fn payment_intent_candidate(
    object: StripeObject<'_>,
) -> AppResult<Candidate<payment_intents::Entity>> {
    check_object_type(object, "payment_intent")?;
    use payment_intents::Column;
    Ok(Candidate::new(require_id(object, "payment_intent")?)
        .field(Column::Amount, object.i64("amount"))
        .field(Column::Currency, object.str("currency"))
        .field(Column::Status, object.str("status"))
        .field(Column::Description, object.str("description"))
        .field(Column::Statement, object.str("statement_descriptor"))
        .field(Column::Email, object.str("receipt_email"))
        .field(Column::CreatedAt, object.time("created")))
}

pub fn charge_candidate(object: StripeObject<'_>) -> AppResult<Candidate<charges::Entity>> {
    check_object_type(object, "charge")?;
    use charges::Column;
    let billing = object.child("billing_details");
    Ok(Candidate::new(require_id(object, "charge")?)
        .field(Column::PaymentIntentId, object.reference("payment_intent"))
        .field(Column::Amount, object.i64("amount"))
        .field(Column::Currency, object.str("currency"))
        .field(Column::Status, object.str("status"))
        .field(Column::ReceiptUrl, object.str("receipt_url"))
        .field(
            Column::Email,
            billing.str("email").or_else(|| object.str("receipt_email")),
        )
        .field(Column::Phone, billing.str("phone"))
        .field(Column::CreatedAt, object.time("created")))
}

/// Creates a placeholder intent unless one is already stored. Dated at the
/// epoch so the real intent event always wins the merge.
pub(crate) async fn ensure_payment_intent<C>(
    conn: &C,
    intent_id: &str,
    currency: Option<String>,
) -> AppResult<bool>
where
    C: ConnectionTrait + TransactionTrait,
{
    if find_by_key::<payment_intents::Entity, _>(conn, intent_id)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    let placeholder = payment_intents::ActiveModel {
        id: Set(intent_id.to_string()),
        amount: Set(Some(0)),
        currency: Set(currency),
        status: Set(Some(payment_intents::PLACEHOLDER_STATUS.to_string())),
        description: Set(None),
        statement: Set(None),
        email: Set(None),
        created_at: Set(epoch()),
        updated: Set(epoch()),
    };
    let created = insert_unless_exists(conn, placeholder).await?;
    if created {
        log::info!("[PAYMENT_INTENT] {intent_id}: placeholder created ahead of its charge");
    }
    Ok(created)
}

async fn has_succeeded_charge<C>(conn: &C, intent_id: &str) -> AppResult<bool>
where
    C: ConnectionTrait,
{
    Ok(charges::Entity::find()
        .filter(charges::Column::PaymentIntentId.eq(intent_id))
        .filter(charges::Column::Status.eq(payment_intents::SUCCEEDED_STATUS))
        .one(conn)
        .await?
        .is_some())
}

/// Marks the intent succeeded without touching `updated`. Later intent
/// events still merge their other fields; the status is re-pinned after them.
pub(crate) async fn fulfill_payment_intent<C>(conn: &C, intent_id: &str) -> AppResult<bool>
where
    C: ConnectionTrait,
{
    let result = payment_intents::Entity::update_many()
        .col_expr(
            payment_intents::Column::Status,
            Expr::value(payment_intents::SUCCEEDED_STATUS),
        )
        .filter(payment_intents::Column::Id.eq(intent_id))
        .filter(
            payment_intents::Column::Status
                .ne(payment_intents::SUCCEEDED_STATUS)
                .or(payment_intents::Column::Status.is_null()),
        )
        .exec(conn)
        .await?;
    Ok(result.rows_affected > 0)
}
