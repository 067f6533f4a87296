pub mod customer_service;
pub mod identity_service;
pub mod payment_service;
pub mod projection_service;
pub mod reconciler;
pub mod subscription_service;
pub mod webhook_service;

pub use customer_service::*;
pub use identity_service::*;
pub use payment_service::*;
pub use projection_service::*;
pub use reconciler::{ReconcileOutcome, StripeRecord};
pub use subscription_service::*;
pub use webhook_service::*;
