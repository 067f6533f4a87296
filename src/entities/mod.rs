pub mod charges;
pub mod customers;
pub mod end_users;
pub mod payment_intents;
pub mod subscriptions;

pub use charges as charge_entity;
pub use customers as customer_entity;
pub use end_users as end_user_entity;
pub use payment_intents as payment_intent_entity;
pub use subscriptions as subscription_entity;
