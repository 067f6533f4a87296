//! Closed set of lookup strategies for the identity tables.
//!
//! Each variant maps onto exactly one column comparison, so a lookup is
//! checked at compile time instead of being assembled from whichever
//! optional arguments happen to be present.

use crate::entities::{customer_entity as customers, end_user_entity as end_users};
use sea_orm::{ColumnTrait, Condition};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndUserLookup {
    ById(i64),
    ByUsername(String),
    ByEmail(String),
}

impl EndUserLookup {
    pub fn condition(&self) -> Condition {
        match self {
            EndUserLookup::ById(id) => Condition::all().add(end_users::Column::Id.eq(*id)),
            EndUserLookup::ByUsername(name) => {
                Condition::all().add(end_users::Column::Username.eq(name.clone()))
            }
            EndUserLookup::ByEmail(email) => {
                Condition::all().add(end_users::Column::Email.eq(email.clone()))
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            EndUserLookup::ById(_) => "user_id",
            EndUserLookup::ByUsername(_) => "username",
            EndUserLookup::ByEmail(_) => "email",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CustomerLookup {
    ByEmail(String),
    ByTelegramTag(String),
    ByEndUser(i64),
    AnyOf(Vec<CustomerLookup>),
}

impl CustomerLookup {
    pub fn condition(&self) -> Condition {
        match self {
            CustomerLookup::ByEmail(email) => {
                Condition::all().add(customers::Column::Email.eq(email.clone()))
            }
            CustomerLookup::ByTelegramTag(tag) => {
                Condition::all().add(customers::Column::TelegramTag.eq(tag.clone()))
            }
            CustomerLookup::ByEndUser(id) => {
                Condition::all().add(customers::Column::EndUserId.eq(*id))
            }
            CustomerLookup::AnyOf(parts) => parts
                .iter()
                .fold(Condition::any(), |cond, part| cond.add(part.condition())),
        }
    }

    /// An `AnyOf` with nothing inside matches no rows rather than all rows.
    pub fn is_empty(&self) -> bool {
        match self {
            CustomerLookup::AnyOf(parts) => parts.iter().all(CustomerLookup::is_empty),
            _ => false,
        }
    }
}
