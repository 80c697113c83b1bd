use std::collections::HashMap;

use zbus::{dbus_interface, zvariant::OwnedValue};

use super::{decode_notify, to_bus, NotificationData};
use crate::{
    events::CloseReason,
    identify::{CallerIdentifier, CallerIdentity},
    manager,
    record::NotificationId,
    service::ServiceHandle,
};

async fn identify(identifier: &CallerIdentifier, hdr: &zbus::MessageHeader<'_>) -> CallerIdentity {
    match hdr.sender().ok().flatten() {
        Some(sender) => identifier.identify(Some(sender.as_str())).await,
        None => {
            log::warn!("Request without sender");
            CallerIdentity::unresolved()
        }
    }
}

/// Implementation of [`org.freedesktop.Notifications`].
///
/// Each call first identifies the calling process, which may take a round trip to the bus (two
/// when the caller is a sandboxing proxy), then hands the request to the notification service.
///
/// [`org.freedesktop.Notifications`]: https://specifications.freedesktop.org/notification-spec/latest/
#[derive(Debug)]
pub struct NotificationsServer {
    service: ServiceHandle,
    identifier: CallerIdentifier,
}

impl NotificationsServer {
    pub fn new(service: ServiceHandle, identifier: CallerIdentifier) -> Self {
        NotificationsServer { service, identifier }
    }
}

#[dbus_interface(name = "org.freedesktop.Notifications")]
impl NotificationsServer {
    /// Notify method. Returns 0 if the notification was rejected.
    #[allow(clippy::too_many_arguments)]
    async fn notify(
        &self,
        app_name: String,
        replaces_id: u32,
        app_icon: String,
        summary: String,
        body: String,
        actions: Vec<String>,
        hints: HashMap<String, OwnedValue>,
        expire_timeout: i32,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
    ) -> zbus::fdo::Result<u32> {
        let caller = identify(&self.identifier, &hdr).await;
        let request = decode_notify(app_name, replaces_id, app_icon, summary, body, actions, hints, expire_timeout);
        Ok(self.service.notify(caller, request).await?)
    }

    /// CloseNotification method
    async fn close_notification(&self, id: u32, #[zbus(header)] hdr: zbus::MessageHeader<'_>) -> zbus::fdo::Result<()> {
        let caller = identify(&self.identifier, &hdr).await;
        self.service.close_notification(caller, id, CloseReason::Closed).await?;
        Ok(())
    }

    /// GetCapabilities method
    async fn get_capabilities(&self) -> Vec<String> {
        manager::capabilities()
    }

    /// GetServerInformation method, returning name, vendor, version and protocol version.
    async fn get_server_information(&self) -> (String, String, String, String) {
        let info = manager::server_information();
        (info.name, info.vendor, info.version, info.spec_version)
    }

    /// GetNotifications method
    async fn get_notifications(
        &self,
        owner: String,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
    ) -> zbus::fdo::Result<Vec<NotificationData>> {
        let caller = identify(&self.identifier, &hdr).await;
        let notifications = self.service.get_notifications(caller, owner).await?;
        Ok(notifications.iter().map(to_bus).collect())
    }

    /// GetNotificationsByCategory method. Only privileged callers may use it.
    async fn get_notifications_by_category(
        &self,
        category: String,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
    ) -> zbus::fdo::Result<Vec<NotificationData>> {
        let caller = identify(&self.identifier, &hdr).await;
        let notifications = self.service.get_notifications_by_category(caller, category).await?;
        Ok(notifications.iter().map(to_bus).collect())
    }

    /// NotificationClosed signal
    #[dbus_interface(signal)]
    pub async fn notification_closed(ctxt: &zbus::SignalContext<'_>, id: u32, reason: u32) -> zbus::Result<()>;

    /// ActionInvoked signal
    #[dbus_interface(signal)]
    pub async fn action_invoked(ctxt: &zbus::SignalContext<'_>, id: u32, action_key: &str) -> zbus::Result<()>;
}

/// Extension interface for the presentation layer. All methods require a privileged caller.
#[derive(Debug)]
pub struct PresentationServer {
    service: ServiceHandle,
    identifier: CallerIdentifier,
}

impl PresentationServer {
    pub fn new(service: ServiceHandle, identifier: CallerIdentifier) -> Self {
        PresentationServer { service, identifier }
    }

    async fn require_privileged(&self, hdr: &zbus::MessageHeader<'_>, what: &str) -> zbus::fdo::Result<()> {
        let caller = identify(&self.identifier, hdr).await;
        if caller.privileged {
            Ok(())
        } else {
            log::warn!("Unprivileged process {} tried to {}", caller.raw_pid(), what);
            Err(zbus::fdo::Error::AccessDenied(format!("Caller is not allowed to {}", what)))
        }
    }
}

#[dbus_interface(name = "org.notificationd.Presentation1")]
impl PresentationServer {
    /// MarkNotificationDisplayed method
    async fn mark_notification_displayed(
        &self,
        id: u32,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
    ) -> zbus::fdo::Result<()> {
        self.require_privileged(&hdr, "mark notifications displayed").await?;
        Ok(self.service.mark_notification_displayed(id)?)
    }

    /// InvokeAction method. Returns whether the notification had the action.
    async fn invoke_action(
        &self,
        id: u32,
        action_key: String,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
    ) -> zbus::fdo::Result<bool> {
        self.require_privileged(&hdr, "invoke actions").await?;
        Ok(self.service.invoke_action(id, action_key).await?)
    }

    /// RemoveUserRemovableNotifications method, returning the ids removed.
    async fn remove_user_removable_notifications(
        &self,
        #[zbus(header)] hdr: zbus::MessageHeader<'_>,
    ) -> zbus::fdo::Result<Vec<NotificationId>> {
        self.require_privileged(&hdr, "remove notifications").await?;
        Ok(self.service.remove_user_removable_notifications().await?)
    }

    /// NotificationAdded signal
    #[dbus_interface(signal)]
    pub async fn notification_added(ctxt: &zbus::SignalContext<'_>, id: u32) -> zbus::Result<()>;

    /// NotificationModified signal
    #[dbus_interface(signal)]
    pub async fn notification_modified(ctxt: &zbus::SignalContext<'_>, id: u32) -> zbus::Result<()>;

    /// NotificationsModified signal, sent at most once per batch interval.
    #[dbus_interface(signal)]
    pub async fn notifications_modified(ctxt: &zbus::SignalContext<'_>, ids: Vec<u32>) -> zbus::Result<()>;

    /// NotificationRemoved signal
    #[dbus_interface(signal)]
    pub async fn notification_removed(ctxt: &zbus::SignalContext<'_>, id: u32) -> zbus::Result<()>;

    /// NotificationsRemoved signal
    #[dbus_interface(signal)]
    pub async fn notifications_removed(ctxt: &zbus::SignalContext<'_>, ids: Vec<u32>) -> zbus::Result<()>;
}
