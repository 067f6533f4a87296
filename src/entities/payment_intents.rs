use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// Status written for a PaymentIntent that only exists because a Charge
/// referenced it before the intent itself was seen.
pub const PLACEHOLDER_STATUS: &str = "placeholder";
pub const SUCCEEDED_STATUS: &str = "succeeded";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "payment_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub amount: Option<i64>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub description: Option<String>,
    pub statement: Option<String>,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::charges::Entity")]
    Charges,
}

impl Related<super::charges::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Charges.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_placeholder(&self) -> bool {
        self.status.as_deref() == Some(PLACEHOLDER_STATUS)
    }
}
