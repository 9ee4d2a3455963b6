pub mod models;
pub mod pii;

pub use models::events::NotificationTask;
pub use pii::Masked;
