pub mod config;
pub mod dbus;
pub mod error;
pub mod events;
pub mod expiration;
pub mod hints;
pub mod identify;
pub mod image;
pub mod lookup;
pub mod manager;
pub mod names;
pub mod process;
pub mod record;
pub mod service;
pub mod store;

pub use config::ServerConfig;
pub use error::{Error, Result};
pub use events::{CloseReason, NotificationEvent};
pub use identify::{CallerIdentifier, CallerIdentity};
pub use manager::{NotificationManager, NotifyRequest};
pub use record::{Notification, NotificationId};
pub use service::ServiceHandle;
pub use store::{Store, StoreOptions};
