//! Timestamp-gated merge shared by every Stripe-keyed table.
//!
//! A candidate row extracted from an event is merged into the stored row:
//! a strictly newer event overwrites every field it carries, anything else
//! only fills fields that are still empty. Events may therefore arrive in
//! any order and the table converges on the newest data per field.

use crate::entities::{
    charge_entity as charges, customer_entity as customers,
    payment_intent_entity as payment_intents, subscription_entity as subscriptions,
};
use crate::error::{AppError, AppResult};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    IdenStatic, IntoActiveModel, ModelTrait, QueryFilter, RuntimeErr, SqlErr, TransactionTrait,
    Value,
};
use std::fmt;

/// A table keyed by a provider id that tracks its last reconciliation time.
pub trait StripeRecord: EntityTrait {
    type Active: ActiveModelTrait<Entity = Self> + ActiveModelBehavior + Send;

    const KIND: &'static str;

    fn id_column() -> Self::Column;
    fn created_column() -> Self::Column;
    fn updated_column() -> Self::Column;
    fn last_updated(model: &Self::Model) -> DateTime<Utc>;
}

impl StripeRecord for payment_intents::Entity {
    type Active = payment_intents::ActiveModel;

    const KIND: &'static str = "PaymentIntent";

    fn id_column() -> Self::Column {
        payment_intents::Column::Id
    }
    fn created_column() -> Self::Column {
        payment_intents::Column::CreatedAt
    }
    fn updated_column() -> Self::Column {
        payment_intents::Column::Updated
    }
    fn last_updated(model: &Self::Model) -> DateTime<Utc> {
        model.updated
    }
}

impl StripeRecord for charges::Entity {
    type Active = charges::ActiveModel;

    const KIND: &'static str = "Charge";

    fn id_column() -> Self::Column {
        charges::Column::Id
    }
    fn created_column() -> Self::Column {
        charges::Column::CreatedAt
    }
    fn updated_column() -> Self::Column {
        charges::Column::Updated
    }
    fn last_updated(model: &Self::Model) -> DateTime<Utc> {
        model.updated
    }
}

impl StripeRecord for customers::Entity {
    type Active = customers::ActiveModel;

    const KIND: &'static str = "Customer";

    fn id_column() -> Self::Column {
        customers::Column::Id
    }
    fn created_column() -> Self::Column {
        customers::Column::CreatedAt
    }
    fn updated_column() -> Self::Column {
        customers::Column::Updated
    }
    fn last_updated(model: &Self::Model) -> DateTime<Utc> {
        model.updated
    }
}

impl StripeRecord for subscriptions::Entity {
    type Active = subscriptions::ActiveModel;

    const KIND: &'static str = "Subscription";

    fn id_column() -> Self::Column {
        subscriptions::Column::Id
    }
    fn created_column() -> Self::Column {
        subscriptions::Column::CreatedAt
    }
    fn updated_column() -> Self::Column {
        subscriptions::Column::Updated
    }
    fn last_updated(model: &Self::Model) -> DateTime<Utc> {
        model.updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated,
    /// Stale or undated event that still filled this many empty fields.
    Backfilled(usize),
    /// Stale or duplicate event with nothing new in it.
    Skipped,
}

impl fmt::Display for ReconcileOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconcileOutcome::Created => write!(f, "created"),
            ReconcileOutcome::Updated => write!(f, "updated"),
            ReconcileOutcome::Backfilled(n) => write!(f, "backfilled {n} field(s)"),
            ReconcileOutcome::Skipped => write!(f, "skipped (stale/duplicate)"),
        }
    }
}

/// Candidate row extracted from an event. Blank values never make it in.
pub struct Candidate<E: EntityTrait> {
    id: String,
    fields: Vec<(E::Column, Value)>,
}

impl<E: EntityTrait> Candidate<E> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sets `column`, replacing an earlier value for it. `None` and blank
    /// values are treated as "no information" and leave the candidate as is.
    pub fn field<V: Into<Value>>(mut self, column: E::Column, value: Option<V>) -> Self {
        let Some(value) = value.map(Into::into) else {
            return self;
        };
        if is_blank(&value) {
            return self;
        }
        self.fields.retain(|(c, _)| c.as_str() != column.as_str());
        self.fields.push((column, value));
        self
    }

    pub fn value(&self, column: E::Column) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(c, _)| c.as_str() == column.as_str())
            .map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Null, empty or whitespace-only strings, JSON null and empty JSON arrays.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Bool(None)
        | Value::Int(None)
        | Value::BigInt(None)
        | Value::String(None)
        | Value::Json(None)
        | Value::ChronoDateTimeUtc(None) => true,
        Value::String(Some(s)) => s.trim().is_empty(),
        Value::Json(Some(json)) => {
            json.is_null() || json.as_array().is_some_and(|items| items.is_empty())
        }
        _ => false,
    }
}

/// Unique or primary-key violation, whichever backend raised it.
pub fn is_unique_violation(err: &DbErr) -> bool {
    if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }
    match err {
        DbErr::Exec(RuntimeErr::SqlxError(e)) | DbErr::Query(RuntimeErr::SqlxError(e)) => e
            .as_database_error()
            .is_some_and(|db| db.is_unique_violation()),
        _ => false,
    }
}

pub async fn find_by_key<E, C>(conn: &C, id: &str) -> AppResult<Option<E::Model>>
where
    E: StripeRecord,
    C: ConnectionTrait,
{
    Ok(E::find().filter(E::id_column().eq(id)).one(conn).await?)
}

/// Merges `candidate` into the table, creating the row on first sight.
pub async fn reconcile<E, C>(
    conn: &C,
    candidate: Candidate<E>,
    event_time: Option<DateTime<Utc>>,
) -> AppResult<ReconcileOutcome>
where
    E: StripeRecord,
    E::Model: IntoActiveModel<E::Active>,
    C: ConnectionTrait + TransactionTrait,
{
    match find_by_key::<E, C>(conn, candidate.id()).await? {
        Some(existing) => merge_into(conn, existing, &candidate, event_time).await,
        None => insert_or_merge(conn, &candidate, event_time).await,
    }
}

/// Inserts the candidate as a new row. Losing a create/create race to a
/// concurrent writer falls back to merging into the winner's row.
pub(crate) async fn insert_or_merge<E, C>(
    conn: &C,
    candidate: &Candidate<E>,
    event_time: Option<DateTime<Utc>>,
) -> AppResult<ReconcileOutcome>
where
    E: StripeRecord,
    E::Model: IntoActiveModel<E::Active>,
    C: ConnectionTrait + TransactionTrait,
{
    let updated = event_time.unwrap_or_else(Utc::now);

    let mut model = <E::Active as ActiveModelTrait>::default();
    model.set(E::id_column(), candidate.id.clone().into());
    model.set(E::created_column(), updated.into());
    for (column, value) in &candidate.fields {
        model.set(*column, value.clone());
    }
    model.set(E::updated_column(), updated.into());

    if insert_unless_exists(conn, model).await? {
        return Ok(ReconcileOutcome::Created);
    }

    log::warn!(
        "[RACE] {} {} already exists (created concurrently), merging",
        E::KIND,
        candidate.id
    );
    let existing = find_by_key::<E, C>(conn, candidate.id())
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "{} {} conflicted on insert but cannot be read back",
                E::KIND,
                candidate.id
            ))
        })?;
    merge_into(conn, existing, candidate, event_time).await
}

/// Inserts `model` inside a savepoint. Returns `false` instead of failing
/// when a unique constraint rejects it, leaving the outer transaction usable.
pub(crate) async fn insert_unless_exists<A, C>(conn: &C, model: A) -> AppResult<bool>
where
    A: ActiveModelTrait + ActiveModelBehavior + Send,
    <A::Entity as EntityTrait>::Model: IntoActiveModel<A>,
    C: ConnectionTrait + TransactionTrait,
{
    let savepoint = conn.begin().await?;
    match model.insert(&savepoint).await {
        Ok(_) => {
            savepoint.commit().await?;
            Ok(true)
        }
        Err(err) if is_unique_violation(&err) => {
            savepoint.rollback().await?;
            Ok(false)
        }
        Err(err) => {
            savepoint.rollback().await?;
            Err(err.into())
        }
    }
}

async fn merge_into<E, C>(
    conn: &C,
    existing: E::Model,
    candidate: &Candidate<E>,
    event_time: Option<DateTime<Utc>>,
) -> AppResult<ReconcileOutcome>
where
    E: StripeRecord,
    E::Model: IntoActiveModel<E::Active>,
    C: ConnectionTrait,
{
    let stored = E::last_updated(&existing);

    if let Some(event_time) = event_time
        && event_time > stored
    {
        let mut model = existing.into_active_model();
        for (column, value) in &candidate.fields {
            model.set(*column, value.clone());
        }
        model.set(E::updated_column(), event_time.into());
        model.update(conn).await?;
        return Ok(ReconcileOutcome::Updated);
    }

    // stale, duplicate or undated: only fill what is still empty
    let missing: Vec<(E::Column, Value)> = candidate
        .fields
        .iter()
        .filter(|(column, _)| is_blank(&ModelTrait::get(&existing, *column)))
        .cloned()
        .collect();
    if missing.is_empty() {
        return Ok(ReconcileOutcome::Skipped);
    }

    let filled = missing.len();
    let mut model = existing.into_active_model();
    for (column, value) in missing {
        model.set(column, value);
    }
    model.update(conn).await?;
    Ok(ReconcileOutcome::Backfilled(filled))
}
