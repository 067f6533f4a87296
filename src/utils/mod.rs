pub mod handle;
pub mod time;

pub use handle::normalize_handle;
pub use time::{epoch, from_epoch};
