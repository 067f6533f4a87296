use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

pub const ACTIVE_STATUS: &str = "active";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "subscriptions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub status: Option<String>,
    pub customer_id: Option<String>,
    pub started: Option<DateTime<Utc>>,
    /// Current period end; the authoritative expiry for projections.
    pub ending: Option<DateTime<Utc>>,
    pub cancel_at_period_end: Option<bool>,
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::customers::Entity",
        from = "Column::CustomerId",
        to = "super::customers::Column::Id",
        on_delete = "SetNull"
    )]
    Customer,
}

impl Related<super::customers::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Customer.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_active(&self) -> bool {
        self.status.as_deref() == Some(ACTIVE_STATUS)
    }
}
