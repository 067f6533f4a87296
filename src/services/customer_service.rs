use crate::entities::customer_entity as customers;
use crate::error::{AppError, AppResult};
use crate::models::{StripeObject, WebhookEvent};
use crate::services::reconciler::{
    find_by_key, insert_unless_exists, reconcile, Candidate, ReconcileOutcome,
};
use crate::utils::epoch;
use sea_orm::{ConnectionTrait, DatabaseConnection, Set, TransactionTrait};

#[derive(Clone)]
pub struct CustomerService {
    pool: DatabaseConnection,
}

impl CustomerService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub async fn save_customer(&self, event: &WebhookEvent) -> AppResult<ReconcileOutcome> {
        let candidate = customer_candidate(event.object())?;
        let id = candidate.id().to_string();
        let outcome = reconcile(&self.pool, candidate, event.event_time()).await?;
        log::info!("[CUSTOMER] {id}: {outcome}");
        Ok(outcome)
    }
}

pub fn customer_candidate(object: StripeObject<'_>) -> AppResult<Candidate<customers::Entity>> {
    use customers::Column;
    let id = object
        .str("id")
        .ok_or_else(|| AppError::ValidationError("customer object without id".into()))?;
    Ok(Candidate::new(id)
        .field(Column::Name, object.str("name"))
        .field(Column::Email, object.str("email"))
        .field(Column::Phone, object.str("phone"))
        .field(Column::Description, object.str("description"))
        .field(Column::CreatedAt, object.time("created")))
}

/// Inserts a bare customer row when a subscription or checkout session
/// references one that has not been seen yet. Dated at the epoch so the
/// customer's own events always win.
pub(crate) async fn ensure_customer<C>(conn: &C, customer_id: &str) -> AppResult<bool>
where
    C: ConnectionTrait + TransactionTrait,
{
    if find_by_key::<customers::Entity, _>(conn, customer_id)
        .await?
        .is_some()
    {
        return Ok(false);
    }

    let stub = customers::ActiveModel {
        id: Set(customer_id.to_string()),
        name: Set(None),
        email: Set(None),
        phone: Set(None),
        telegram_tag: Set(None),
        description: Set(None),
        end_user_id: Set(None),
        created_at: Set(epoch()),
        updated: Set(epoch()),
    };
    let created = insert_unless_exists(conn, stub).await?;
    if created {
        log::info!("[CUSTOMER] {customer_id}: stub created ahead of its own events");
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use crate::utils::from_epoch;
    use sea_orm::EntityTrait;
    use serde_json::json;

    fn event(created: i64, object: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(json!({
            "id": format!("evt_{created}"),
            "type": "customer.updated",
            "created": created,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_customer_merge_keeps_telegram_tag() {
        let db = test_pool().await;
        let service = CustomerService::new(db.clone());
        ensure_customer(&db, "cus_1").await.unwrap();
        customers::Entity::update(customers::ActiveModel {
            id: Set("cus_1".into()),
            telegram_tag: Set(Some("neo".into())),
            ..Default::default()
        })
        .exec(&db)
        .await
        .unwrap();

        let outcome = service
            .save_customer(&event(
                1_700_000_000,
                json!({ "id": "cus_1", "email": "neo@example.com", "name": "Neo", "created": 1_699_000_000 }),
            ))
            .await
            .unwrap();

        let stored = customers::Entity::find_by_id("cus_1").one(&db).await.unwrap().unwrap();
        assert_eq!(outcome, ReconcileOutcome::Updated);
        assert_eq!(stored.telegram_tag.as_deref(), Some("neo"));
        assert_eq!(stored.email.as_deref(), Some("neo@example.com"));
        assert_eq!(stored.created_at, from_epoch(1_699_000_000).unwrap());
    }

    #[tokio::test]
    async fn test_ensure_customer_is_noop_for_known_customer() {
        let db = test_pool().await;
        let service = CustomerService::new(db.clone());
        service
            .save_customer(&event(1_700_000_000, json!({ "id": "cus_1", "name": "Neo" })))
            .await
            .unwrap();

        assert!(!ensure_customer(&db, "cus_1").await.unwrap());
        let stored = customers::Entity::find_by_id("cus_1").one(&db).await.unwrap().unwrap();
        assert_eq!(stored.name.as_deref(), Some("Neo"));
    }
}
