//! Projects stored subscription state onto end users.
//!
//! An end user's `subscription_status`/`date_end` pair is derived data: it is
//! recomputed from the subscriptions of the customers linked to the user,
//! either when a subscription/invoice event arrives or when a client asks.

use crate::entities::{
    customer_entity as customers, end_user_entity as end_users,
    subscription_entity as subscriptions,
};
use crate::error::{AppError, AppResult};
use crate::models::{
    CustomerLookup, EndUserLookup, ExpiringQuery, ExpiringSubscription,
    SubscriptionCheckRequest, SubscriptionCheckResponse, WebhookEvent,
};
use crate::services::reconciler::{find_by_key, insert_unless_exists};
use crate::services::subscription_service::{current_period_end, ended_at};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    ActiveModelTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use std::fmt;

pub const DEFAULT_EXPIRING_DAYS: i64 = 5;
const MAX_EXPIRING_DAYS: i64 = 3650;

/// Which event drives an event-time projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectionSource {
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectionOutcome {
    Applied {
        user_id: i64,
        subscription_status: bool,
        date_end: Option<DateTime<Utc>>,
    },
    NoActiveSubscription,
    /// Nothing links the event to an end user yet.
    NotLinked(String),
    /// Refused to grant access without knowing until when.
    MissingPeriodEnd,
}

impl fmt::Display for ProjectionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectionOutcome::Applied {
                user_id,
                subscription_status,
                date_end,
            } => write!(
                f,
                "end user {user_id} -> status={subscription_status}, date_end={}",
                date_end.map(|d| d.to_rfc3339()).unwrap_or_else(|| "none".into())
            ),
            ProjectionOutcome::NoActiveSubscription => write!(f, "no active subscription"),
            ProjectionOutcome::NotLinked(reason) => write!(f, "not linked: {reason}"),
            ProjectionOutcome::MissingPeriodEnd => {
                write!(f, "active subscription without period end, left unchanged")
            }
        }
    }
}

/// Most recently updated active subscription of a customer.
pub(crate) async fn first_active_subscription<C: ConnectionTrait>(
    conn: &C,
    customer_id: &str,
) -> AppResult<Option<subscriptions::Model>> {
    let active = subscriptions::Entity::find()
        .filter(subscriptions::Column::CustomerId.eq(customer_id))
        .filter(subscriptions::Column::Status.eq(subscriptions::ACTIVE_STATUS))
        .order_by_desc(subscriptions::Column::Updated)
        .one(conn)
        .await?;
    Ok(active)
}

pub(crate) async fn apply_projection<C: ConnectionTrait>(
    conn: &C,
    user: end_users::Model,
    subscription_status: bool,
    date_end: Option<DateTime<Utc>>,
) -> AppResult<ProjectionOutcome> {
    if subscription_status && date_end.is_none() {
        log::warn!(
            "[PROJECTION] end user {}: active subscription without period end",
            user.id
        );
        return Ok(ProjectionOutcome::MissingPeriodEnd);
    }

    let user_id = user.id;
    if user.subscription_status != subscription_status || user.date_end != date_end {
        let mut active_user = user.into_active_model();
        active_user.subscription_status = Set(subscription_status);
        active_user.date_end = Set(date_end);
        active_user.update(conn).await?;
    }

    Ok(ProjectionOutcome::Applied {
        user_id,
        subscription_status,
        date_end,
    })
}

/// Grants access from the customer's newest active subscription, if any.
pub(crate) async fn project_customer<C: ConnectionTrait>(
    conn: &C,
    customer_id: &str,
    user: end_users::Model,
) -> AppResult<ProjectionOutcome> {
    match first_active_subscription(conn, customer_id).await? {
        Some(active) => apply_projection(conn, user, true, active.ending).await,
        None => Ok(ProjectionOutcome::NoActiveSubscription),
    }
}

#[derive(Clone)]
pub struct ProjectionService {
    pool: DatabaseConnection,
}

impl ProjectionService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// Re-derives the end user's access after a subscription or invoice event.
    pub async fn project_event(
        &self,
        event: &WebhookEvent,
        source: ProjectionSource,
    ) -> AppResult<ProjectionOutcome> {
        let object = event.object();
        let Some(customer_id) = object.reference("customer") else {
            return Ok(ProjectionOutcome::NotLinked("event has no customer".into()));
        };
        let Some(user) = self.linked_end_user(&customer_id).await? else {
            return Ok(ProjectionOutcome::NotLinked(format!(
                "customer {customer_id} has no end user"
            )));
        };

        let outcome = match source {
            ProjectionSource::InvoicePaid => {
                let paid_until = object
                    .first_item("lines")
                    .child("period")
                    .time("end")
                    .or_else(|| object.time("period_end"));
                // a late invoice for an earlier period never shortens access
                let date_end = match (user.subscription_status, user.date_end, paid_until) {
                    (true, Some(current), Some(paid)) => Some(current.max(paid)),
                    (_, _, paid) => paid,
                };
                apply_projection(&self.pool, user, true, date_end).await?
            }
            ProjectionSource::SubscriptionUpdated | ProjectionSource::SubscriptionDeleted => {
                match first_active_subscription(&self.pool, &customer_id).await? {
                    Some(active) => apply_projection(&self.pool, user, true, active.ending).await?,
                    None => {
                        let (status, date_end) = self.event_subscription_state(event, source).await?;
                        apply_projection(&self.pool, user, status, date_end).await?
                    }
                }
            }
        };

        log::info!("[PROJECTION] customer {customer_id}: {outcome}");
        Ok(outcome)
    }

    /// Stored state of the event's subscription; the event payload when the
    /// row is missing.
    async fn event_subscription_state(
        &self,
        event: &WebhookEvent,
        source: ProjectionSource,
    ) -> AppResult<(bool, Option<DateTime<Utc>>)> {
        let object = event.object();
        let stored = match object.str("id") {
            Some(id) => find_by_key::<subscriptions::Entity, _>(&self.pool, &id).await?,
            None => None,
        };
        if let Some(stored) = stored {
            return Ok((stored.is_active(), stored.ending));
        }

        Ok(match source {
            ProjectionSource::SubscriptionDeleted => {
                (false, ended_at(object).or_else(|| current_period_end(object)))
            }
            _ => (
                object.str("status").as_deref() == Some(subscriptions::ACTIVE_STATUS),
                current_period_end(object),
            ),
        })
    }

    async fn linked_end_user(&self, customer_id: &str) -> AppResult<Option<end_users::Model>> {
        let Some(customer) = find_by_key::<customers::Entity, _>(&self.pool, customer_id).await?
        else {
            return Ok(None);
        };
        let Some(user_id) = customer.end_user_id else {
            return Ok(None);
        };
        Ok(end_users::Entity::find_by_id(user_id).one(&self.pool).await?)
    }

    /// Resolves an end user from identity hints, links every matching
    /// customer to them and reports their current access.
    pub async fn check_subscription(
        &self,
        request: &SubscriptionCheckRequest,
    ) -> AppResult<SubscriptionCheckResponse> {
        let lookups = request.lookups();
        if lookups.is_empty() {
            return Err(AppError::ValidationError(
                "Bad filters passed: provide user_id, username or email".into(),
            ));
        }

        let mut user = self.find_end_user(&lookups).await?;
        if user.is_none()
            && let Some(user_id) = request.user_id
        {
            user = self.create_end_user(user_id, request).await?;
        }

        let customers = self.find_customers(request, user.as_ref()).await?;
        if customers.is_empty() {
            return Ok(SubscriptionCheckResponse {
                user_id: user.as_ref().map(|u| u.id),
                customer_found: false,
                subscription_status: user.as_ref().is_some_and(|u| u.subscription_status),
                date_end: user.as_ref().and_then(|u| u.date_end),
                message: "No Stripe customer matches the given identity".into(),
            });
        }

        for customer in &customers {
            if let Some(user) = &user {
                self.link_customer(customer, user).await?;
            }
        }

        // first active subscription across the matched customers wins
        for customer in &customers {
            let Some(active) = first_active_subscription(&self.pool, &customer.id).await? else {
                continue;
            };
            let Some(ending) = active.ending else {
                log::warn!(
                    "[LOOKUP] subscription {} is active but has no period end",
                    active.id
                );
                continue;
            };
            if let Some(user) = user.clone() {
                apply_projection(&self.pool, user, true, Some(ending)).await?;
            }
            return Ok(SubscriptionCheckResponse {
                user_id: user.as_ref().map(|u| u.id),
                customer_found: true,
                subscription_status: true,
                date_end: Some(ending),
                message: format!("Active subscription {}", active.id),
            });
        }

        Ok(SubscriptionCheckResponse {
            user_id: user.as_ref().map(|u| u.id),
            customer_found: true,
            subscription_status: false,
            date_end: user.as_ref().and_then(|u| u.date_end),
            message: "No active subscription".into(),
        })
    }

    async fn find_end_user(&self, lookups: &[EndUserLookup]) -> AppResult<Option<end_users::Model>> {
        for lookup in lookups {
            let found = end_users::Entity::find()
                .filter(lookup.condition())
                .one(&self.pool)
                .await?;
            if let Some(user) = found {
                log::debug!("[LOOKUP] end user {} found by {}", user.id, lookup.describe());
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    async fn create_end_user(
        &self,
        user_id: i64,
        request: &SubscriptionCheckRequest,
    ) -> AppResult<Option<end_users::Model>> {
        let new_user = |username: Option<String>, email: Option<String>| end_users::ActiveModel {
            id: Set(user_id),
            username: Set(username),
            email: Set(email),
            subscription_status: Set(false),
            date_end: Set(None),
            is_admin: Set(false),
            created_at: Set(Utc::now()),
        };

        let txn = self.pool.begin().await?;
        let mut created = insert_unless_exists(
            &txn,
            new_user(request.normalized_username(), request.normalized_email()),
        )
        .await?;
        if !created
            && end_users::Entity::find_by_id(user_id).one(&txn).await?.is_none()
        {
            // username or email already belongs to someone else
            log::warn!("[LOOKUP] end user {user_id}: identity hints taken, creating without them");
            created = insert_unless_exists(&txn, new_user(None, None)).await?;
        }
        let user = end_users::Entity::find_by_id(user_id).one(&txn).await?;
        txn.commit().await?;

        if created {
            log::info!("[LOOKUP] end user {user_id} created");
        }
        Ok(user)
    }

    async fn find_customers(
        &self,
        request: &SubscriptionCheckRequest,
        user: Option<&end_users::Model>,
    ) -> AppResult<Vec<customers::Model>> {
        let mut parts = Vec::new();
        if let Some(email) = request.normalized_email() {
            parts.push(CustomerLookup::ByEmail(email));
        }
        if let Some(username) = request.normalized_username() {
            parts.push(CustomerLookup::ByTelegramTag(username));
        }
        if let Some(user) = user {
            parts.push(CustomerLookup::ByEndUser(user.id));
        }
        let lookup = CustomerLookup::AnyOf(parts);
        if lookup.is_empty() {
            return Ok(Vec::new());
        }

        Ok(customers::Entity::find()
            .filter(lookup.condition())
            .order_by_desc(customers::Column::Updated)
            .all(&self.pool)
            .await?)
    }

    async fn link_customer(&self, customer: &customers::Model, user: &end_users::Model) -> AppResult<()> {
        match customer.end_user_id {
            Some(id) if id == user.id => Ok(()),
            Some(other) => {
                log::warn!(
                    "[LOOKUP] customer {} already belongs to end user {other}, not relinking to {}",
                    customer.id,
                    user.id
                );
                Ok(())
            }
            None => {
                let mut active_customer = customer.clone().into_active_model();
                active_customer.end_user_id = Set(Some(user.id));
                active_customer.update(&self.pool).await?;
                log::info!("[LOOKUP] customer {} linked to end user {}", customer.id, user.id);
                Ok(())
            }
        }
    }

    /// Non-admin users with access ending inside `[start, start + days)`.
    pub async fn expiring(&self, query: &ExpiringQuery) -> AppResult<Vec<ExpiringSubscription>> {
        let (start, end) = expiring_window(query.days, query.start_date, Utc::now())?;

        let users = end_users::Entity::find()
            .filter(end_users::Column::SubscriptionStatus.eq(true))
            .filter(end_users::Column::IsAdmin.eq(false))
            .filter(end_users::Column::DateEnd.gte(start))
            .filter(end_users::Column::DateEnd.lt(end))
            .order_by_asc(end_users::Column::DateEnd)
            .all(&self.pool)
            .await?;

        Ok(users
            .into_iter()
            .map(|u| ExpiringSubscription {
                user_id: u.id,
                date_end: u.date_end,
            })
            .collect())
    }

    /// Administrative ban. Returns whether a user was found.
    pub async fn revoke(&self, user_id: i64) -> AppResult<bool> {
        let Some(user) = end_users::Entity::find_by_id(user_id).one(&self.pool).await? else {
            log::info!("[BAN] end user {user_id} not found, nothing to revoke");
            return Ok(false);
        };

        let mut active_user = user.into_active_model();
        active_user.subscription_status = Set(false);
        active_user.update(&self.pool).await?;
        log::info!("[BAN] end user {user_id}: subscription revoked");
        Ok(true)
    }
}

pub fn expiring_window(
    days: Option<i64>,
    start_date: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> AppResult<(DateTime<Utc>, DateTime<Utc>)> {
    let days = match days.unwrap_or(DEFAULT_EXPIRING_DAYS) {
        d if d <= 0 => 1,
        d => d.min(MAX_EXPIRING_DAYS),
    };
    let start = match start_date {
        Some(date) => {
            let midnight = date
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| AppError::ValidationError(format!("invalid start_date {date}")))?;
            Utc.from_utc_datetime(&midnight)
        }
        None => now,
    };
    Ok((start, start + Duration::days(days)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use crate::utils::from_epoch;
    use sea_orm::PaginatorTrait;

    async fn seed_user(db: &DatabaseConnection, id: i64, username: Option<&str>) -> end_users::Model {
        end_users::ActiveModel {
            id: Set(id),
            username: Set(username.map(str::to_string)),
            email: Set(None),
            subscription_status: Set(false),
            date_end: Set(None),
            is_admin: Set(false),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .unwrap()
    }

    async fn seed_customer(
        db: &DatabaseConnection,
        id: &str,
        email: Option<&str>,
        tag: Option<&str>,
        end_user_id: Option<i64>,
    ) {
        customers::ActiveModel {
            id: Set(id.into()),
            name: Set(None),
            email: Set(email.map(str::to_string)),
            phone: Set(None),
            telegram_tag: Set(tag.map(str::to_string)),
            description: Set(None),
            end_user_id: Set(end_user_id),
            created_at: Set(Utc::now()),
            updated: Set(Utc::now()),
        }
        .insert(db)
        .await
        .unwrap();
    }

    async fn seed_subscription(
        db: &DatabaseConnection,
        id: &str,
        customer_id: &str,
        status: &str,
        ending: i64,
        updated: i64,
    ) {
        subscriptions::ActiveModel {
            id: Set(id.into()),
            status: Set(Some(status.into())),
            customer_id: Set(Some(customer_id.into())),
            started: Set(None),
            ending: Set(from_epoch(ending)),
            cancel_at_period_end: Set(Some(false)),
            url: Set(None),
            created_at: Set(Utc::now()),
            updated: Set(from_epoch(updated).unwrap()),
        }
        .insert(db)
        .await
        .unwrap();
    }

    async fn user(db: &DatabaseConnection, id: i64) -> end_users::Model {
        end_users::Entity::find_by_id(id).one(db).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_lookup_without_hints_is_rejected() {
        let db = test_pool().await;
        let service = ProjectionService::new(db);
        let err = service
            .check_subscription(&SubscriptionCheckRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_lookup_links_customer_and_projects_active_subscription() {
        let db = test_pool().await;
        seed_customer(&db, "cus_1", None, Some("neo"), None).await;
        seed_subscription(&db, "sub_1", "cus_1", "active", 1_800_000_000, 100).await;
        let service = ProjectionService::new(db.clone());

        let response = service
            .check_subscription(&SubscriptionCheckRequest {
                user_id: Some(42),
                username: Some("https://t.me/neo".into()),
                email: None,
            })
            .await
            .unwrap();

        assert_eq!(response.user_id, Some(42));
        assert!(response.customer_found);
        assert!(response.subscription_status);
        assert_eq!(response.date_end, from_epoch(1_800_000_000));

        let stored = user(&db, 42).await;
        assert!(stored.subscription_status);
        assert_eq!(stored.username.as_deref(), Some("neo"));
        let customer = customers::Entity::find_by_id("cus_1").one(&db).await.unwrap().unwrap();
        assert_eq!(customer.end_user_id, Some(42));
    }

    #[tokio::test]
    async fn test_lookup_prefers_most_recently_updated_active_subscription() {
        let db = test_pool().await;
        seed_user(&db, 7, None).await;
        seed_customer(&db, "cus_1", None, None, Some(7)).await;
        seed_subscription(&db, "sub_old", "cus_1", "active", 1_750_000_000, 100).await;
        seed_subscription(&db, "sub_new", "cus_1", "active", 1_800_000_000, 200).await;
        seed_subscription(&db, "sub_gone", "cus_1", "canceled", 1_900_000_000, 300).await;
        let service = ProjectionService::new(db.clone());

        let response = service
            .check_subscription(&SubscriptionCheckRequest {
                user_id: Some(7),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(response.subscription_status);
        assert_eq!(response.date_end, from_epoch(1_800_000_000));
    }

    #[tokio::test]
    async fn test_lookup_without_active_subscription_reports_stored_date_end() {
        let db = test_pool().await;
        let mut seeded = seed_user(&db, 7, None).await.into_active_model();
        seeded.date_end = Set(from_epoch(1_700_000_000));
        seeded.update(&db).await.unwrap();
        seed_customer(&db, "cus_1", None, None, Some(7)).await;
        seed_subscription(&db, "sub_1", "cus_1", "canceled", 1_700_000_000, 100).await;
        let service = ProjectionService::new(db.clone());

        let response = service
            .check_subscription(&SubscriptionCheckRequest {
                user_id: Some(7),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(response.customer_found);
        assert!(!response.subscription_status);
        assert_eq!(response.date_end, from_epoch(1_700_000_000));
    }

    #[tokio::test]
    async fn test_lookup_by_email_only_does_not_create_user() {
        let db = test_pool().await;
        seed_customer(&db, "cus_1", Some("neo@example.com"), None, None).await;
        let service = ProjectionService::new(db.clone());

        let response = service
            .check_subscription(&SubscriptionCheckRequest {
                email: Some("neo@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(response.user_id, None);
        assert!(response.customer_found);
        assert!(!response.subscription_status);
        assert_eq!(end_users::Entity::find().count(&db).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_lookup_does_not_steal_linked_customer() {
        let db = test_pool().await;
        seed_user(&db, 1, None).await;
        seed_customer(&db, "cus_1", Some("shared@example.com"), None, Some(1)).await;
        let service = ProjectionService::new(db.clone());

        service
            .check_subscription(&SubscriptionCheckRequest {
                user_id: Some(2),
                email: Some("shared@example.com".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let customer = customers::Entity::find_by_id("cus_1").one(&db).await.unwrap().unwrap();
        assert_eq!(customer.end_user_id, Some(1));
    }

    #[tokio::test]
    async fn test_projection_never_grants_without_date_end() {
        let db = test_pool().await;
        let seeded = seed_user(&db, 9, None).await;
        let outcome = apply_projection(&db, seeded, true, None).await.unwrap();
        assert_eq!(outcome, ProjectionOutcome::MissingPeriodEnd);
        assert!(!user(&db, 9).await.subscription_status);
    }

    #[tokio::test]
    async fn test_expiring_window_and_filters() {
        let db = test_pool().await;
        let day = 86_400;
        let start = 1_700_006_400; // 2023-11-15T00:00:00Z
        for (id, offset, status, admin) in [
            (1, 0, true, false),
            (2, 2 * day, true, false),
            (3, 3 * day, true, false),
            (4, day, false, false),
            (5, day, true, true),
            (6, -1, true, false),
        ] {
            end_users::ActiveModel {
                id: Set(id),
                username: Set(None),
                email: Set(None),
                subscription_status: Set(status),
                date_end: Set(from_epoch(start + offset)),
                is_admin: Set(admin),
                created_at: Set(Utc::now()),
            }
            .insert(&db)
            .await
            .unwrap();
        }
        let service = ProjectionService::new(db);

        let found = service
            .expiring(&ExpiringQuery {
                days: Some(3),
                start_date: NaiveDate::from_ymd_opt(2023, 11, 15),
            })
            .await
            .unwrap();

        let ids: Vec<i64> = found.iter().map(|e| e.user_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_expiring_window_clamps_days() {
        let now = from_epoch(1_700_000_000).unwrap();
        let (start, end) = expiring_window(Some(0), None, now).unwrap();
        assert_eq!(start, now);
        assert_eq!(end - start, Duration::days(1));

        let (_, end) = expiring_window(Some(-4), None, now).unwrap();
        assert_eq!(end - now, Duration::days(1));

        let (_, end) = expiring_window(None, None, now).unwrap();
        assert_eq!(end - now, Duration::days(DEFAULT_EXPIRING_DAYS));
    }

    #[tokio::test]
    async fn test_revoke() {
        let db = test_pool().await;
        let mut seeded = seed_user(&db, 3, None).await.into_active_model();
        seeded.subscription_status = Set(true);
        seeded.date_end = Set(from_epoch(1_800_000_000));
        seeded.update(&db).await.unwrap();
        let service = ProjectionService::new(db.clone());

        assert!(service.revoke(3).await.unwrap());
        let stored = user(&db, 3).await;
        assert!(!stored.subscription_status);
        assert_eq!(stored.date_end, from_epoch(1_800_000_000));

        assert!(!service.revoke(404).await.unwrap());
    }
}
