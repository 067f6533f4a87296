pub mod health;
pub mod subscription;
pub mod webhook;

pub use health::health_config;
pub use subscription::subscription_config;
pub use webhook::webhook_config;
