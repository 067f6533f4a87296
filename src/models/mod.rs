pub mod common;
pub mod query;
pub mod stripe_event;
pub mod subscription;

pub use common::*;
pub use query::*;
pub use stripe_event::*;
pub use subscription::*;
