//! # Bus surface
//!
//! The `org.freedesktop.Notifications` server object, the presentation extension next to it,
//! the task turning [`NotificationEvent`]s into signals, and a client proxy.

use std::collections::HashMap;

use tokio::sync::broadcast::{self, error::RecvError};
use zbus::zvariant::OwnedValue;

use crate::{
    events::NotificationEvent,
    hints::{keys, HintValue},
    identify::CallerIdentifier,
    image::RawImage,
    manager::NotifyRequest,
    names,
    record::{Notification, RemoteAction},
    service::ServiceHandle,
};

mod client;
pub use client::*;

mod server;
pub use server::*;

/// A notification as returned by `GetNotifications`: `(susssasa{sv}i)`.
pub type NotificationData = (String, u32, String, String, String, Vec<String>, HashMap<String, OwnedValue>, i32);

pub fn to_bus(notification: &Notification) -> NotificationData {
    (
        notification.app_name().to_owned(),
        notification.id(),
        notification.app_icon().to_owned(),
        notification.summary().to_owned(),
        notification.body().to_owned(),
        notification.actions().to_vec(),
        notification.hints().iter().map(|(key, value)| (key.clone(), value.to_value(key))).collect(),
        notification.expire_timeout(),
    )
}

/// Build a [`NotifyRequest`] from the arguments of a `Notify` call.
#[allow(clippy::too_many_arguments)]
pub fn decode_notify(
    app_name: String,
    replaces_id: u32,
    app_icon: String,
    summary: String,
    body: String,
    actions: Vec<String>,
    hints: HashMap<String, OwnedValue>,
    expire_timeout: i32,
) -> NotifyRequest {
    let mut request = NotifyRequest { app_name, replaces_id, app_icon, summary, body, actions, expire_timeout, ..Default::default() };

    let image_keys = std::iter::once(keys::IMAGE_DATA).chain(keys::IMAGE_DATA_LEGACY);
    request.image = image_keys.filter_map(|key| hints.get(key).map(|value| (key, value))).find_map(|(key, value)| {
        match RawImage::from_value(value) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("Ignoring {} hint: {}", key, e);
                None
            }
        }
    });

    for (key, value) in hints {
        if key == keys::IMAGE_DATA || keys::IMAGE_DATA_LEGACY.contains(&key.as_str()) {
            continue;
        }
        match HintValue::from_value(&value) {
            Some(hint) => {
                request.hints.insert(key, hint);
            }
            None => log::debug!("Dropping hint {} with unsupported type {}", key, value.value_signature()),
        }
    }
    request
}

/// Serve the notification interfaces on `con` and claim the well known name.
pub async fn attach_to(con: &zbus::Connection, service: ServiceHandle, identifier: CallerIdentifier) -> zbus::Result<()> {
    let objects = con.object_server();
    if !objects.at(names::NOTIFICATIONS_OBJECT, NotificationsServer::new(service.clone(), identifier.clone())).await? {
        return Err(zbus::Error::Failure(format!(
            "Object already exists at {} on this connection -- is a notification server already running?",
            names::NOTIFICATIONS_OBJECT
        )));
    }
    objects.at(names::NOTIFICATIONS_OBJECT, PresentationServer::new(service, identifier)).await?;

    let flags = [zbus::fdo::RequestNameFlags::DoNotQueue];
    match con.request_name_with_flags(names::NOTIFICATIONS_BUS, flags.into_iter().collect()).await {
        Ok(zbus::fdo::RequestNameReply::PrimaryOwner | zbus::fdo::RequestNameReply::AlreadyOwner) => Ok(()),
        Ok(_) | Err(zbus::Error::NameTaken) => Err(zbus::Error::Failure(format!(
            "{} is owned by another notification server",
            names::NOTIFICATIONS_BUS
        ))),
        Err(e) => Err(e),
    }
}

/// Emit bus signals for every event the service publishes, until the service shuts down.
pub async fn forward_events(con: zbus::Connection, mut events: broadcast::Receiver<NotificationEvent>) {
    let ctxt = match zbus::SignalContext::new(&con, names::NOTIFICATIONS_OBJECT) {
        Ok(ctxt) => ctxt,
        Err(e) => {
            log::error!("Can't emit notification signals: {}", e);
            return;
        }
    };
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("Signal forwarding fell behind, {} notification events were not emitted", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if let Err(e) = emit(&con, &ctxt, event).await {
            log::error!("Failed to emit notification signal: {}", e);
        }
    }
}

async fn emit(con: &zbus::Connection, ctxt: &zbus::SignalContext<'_>, event: NotificationEvent) -> zbus::Result<()> {
    match event {
        NotificationEvent::Closed { id, reason } => NotificationsServer::notification_closed(ctxt, id, reason.code()).await,
        NotificationEvent::ActionInvoked { id, action_key, remote_action, trusted } => {
            NotificationsServer::action_invoked(ctxt, id, &action_key).await?;
            if let Some(remote_action) = remote_action {
                tokio::spawn(call_remote_action(con.clone(), remote_action, trusted));
            }
            Ok(())
        }
        NotificationEvent::Added(id) => PresentationServer::notification_added(ctxt, id).await,
        NotificationEvent::Modified(id) => PresentationServer::notification_modified(ctxt, id).await,
        NotificationEvent::BatchModified(ids) => PresentationServer::notifications_modified(ctxt, ids).await,
        NotificationEvent::Removed(id) => PresentationServer::notification_removed(ctxt, id).await,
        NotificationEvent::BatchRemoved(ids) => PresentationServer::notifications_removed(ctxt, ids).await,
    }
}

/// Perform the call attached to an invoked action.
///
/// Actions of notifications from unprivileged sources may only reach services that are already running.
async fn call_remote_action(con: zbus::Connection, action: RemoteAction, trusted: bool) {
    if !trusted {
        let running = match zbus::fdo::DBusProxy::new(&con).await {
            Ok(dbus) => match action.service.as_str().try_into() {
                Ok(name) => dbus.name_has_owner(name).await.unwrap_or(false),
                Err(_) => false,
            },
            Err(_) => false,
        };
        if !running {
            log::warn!("Not activating {} for an action of an untrusted notification", action.service);
            return;
        }
    }

    log::debug!("Calling {} {} {}.{}", action.service, action.path, action.interface, action.method);
    let result = con
        .call_method(
            Some(action.service.as_str()),
            action.path.as_str(),
            Some(action.interface.as_str()),
            action.method.as_str(),
            &(),
        )
        .await;
    if let Err(e) = result {
        log::warn!("Remote action {}.{} on {} failed: {}", action.interface, action.method, action.service, e);
    }
}
