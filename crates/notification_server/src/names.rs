//! Well-known bus names, object paths and server identity.

pub const NOTIFICATIONS_BUS: &str = "org.freedesktop.Notifications";
pub const NOTIFICATIONS_OBJECT: &str = "/org/freedesktop/Notifications";

/// Object path at which a sandboxing proxy answers identity queries about the client it forwards.
pub const SANDBOX_PROXY_OBJECT: &str = "/org/freedesktop/DBus";

pub const SERVER_NAME: &str = "notificationd";
pub const SERVER_VENDOR: &str = "notificationd";
pub const SPEC_VERSION: &str = "1.2";
