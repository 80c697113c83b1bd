use std::collections::HashMap;

use zbus::zvariant::Value;

use super::NotificationData;

/// Client side of `org.freedesktop.Notifications`.
#[zbus::dbus_proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
pub trait Notifications {
    #[allow(clippy::too_many_arguments)]
    fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;

    fn close_notification(&self, id: u32) -> zbus::Result<()>;

    fn get_capabilities(&self) -> zbus::Result<Vec<String>>;

    fn get_server_information(&self) -> zbus::Result<(String, String, String, String)>;

    fn get_notifications(&self, owner: &str) -> zbus::Result<Vec<NotificationData>>;

    fn get_notifications_by_category(&self, category: &str) -> zbus::Result<Vec<NotificationData>>;
}
