//! The notification manager: owner of every notification record.
//!
//! All mutation happens through `&mut NotificationManager`, so there is exactly one
//! owner of the record table and no locking. Caller identification happens before a
//! request reaches the manager; see [`crate::service`] for the task driving it.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tokio::sync::broadcast;

use crate::{
    config::ServerConfig,
    error::{Error, Result},
    events::{CloseReason, NotificationEvent},
    expiration::ExpirationScheduler,
    hints::{keys, HintValue, Hints},
    identify::CallerIdentity,
    image::{self, RawImage},
    lookup::{fields, AppInfo, AppInfoCache, CategoryDefinitions, PriorityLookup},
    names,
    record::{relevance_cmp, IconOrigin, Notification, NotificationId, DEFAULT_PRIORITY},
    store::{Store, StoredState},
};

#[cfg(test)]
mod test;

/// Capabilities reported by `GetCapabilities`.
pub const CAPABILITIES: [&str; 5] = ["actions", "body", "icon-static", "persistence", "x-remote-action"];

/// An inbound `Notify` request, after decoding from the bus.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotifyRequest {
    pub app_name: String,
    pub replaces_id: NotificationId,
    pub app_icon: String,
    pub summary: String,
    pub body: String,
    pub actions: Vec<String>,
    pub hints: Hints,
    /// Decoded `image-data` hint.
    pub image: Option<RawImage>,
    pub expire_timeout: i32,
}

impl NotifyRequest {
    pub fn new(app_name: impl Into<String>, summary: impl Into<String>, body: impl Into<String>) -> Self {
        NotifyRequest {
            app_name: app_name.into(),
            summary: summary.into(),
            body: body.into(),
            expire_timeout: -1,
            ..Default::default()
        }
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<HintValue>) -> Self {
        self.hints.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInformation {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub spec_version: String,
}

pub struct NotificationManager {
    config: ServerConfig,
    image_dir: Option<PathBuf>,
    notifications: BTreeMap<NotificationId, Notification>,
    store: Store,
    expiration: ExpirationScheduler,
    app_info: AppInfoCache,
    categories: Box<dyn CategoryDefinitions>,
    priorities: Box<dyn PriorityLookup>,
    events: broadcast::Sender<NotificationEvent>,
    last_id: NotificationId,
    /// Closed notifications, kept readable until [`NotificationManager::flush_pending_disposal`].
    pending_disposal: Vec<Notification>,
    pending_modified: BTreeSet<NotificationId>,
    batch_deadline: Option<Instant>,
    last_batch: Option<Instant>,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("notifications", &self.notifications.keys().collect_vec())
            .field("store", &self.store)
            .field("expiration", &self.expiration)
            .field("last_id", &self.last_id)
            .finish()
    }
}

impl NotificationManager {
    /// Create a manager using the lookup tables of `config`.
    pub fn new(config: ServerConfig, store: Store, events: broadcast::Sender<NotificationEvent>) -> Self {
        NotificationManager {
            app_info: AppInfoCache::new(Box::new(config.applications.clone())),
            categories: Box::new(config.categories.clone()),
            priorities: Box::new(config.priorities.clone()),
            config,
            image_dir: None,
            notifications: BTreeMap::new(),
            store,
            expiration: ExpirationScheduler::default(),
            events,
            last_id: 0,
            pending_disposal: Vec::new(),
            pending_modified: BTreeSet::new(),
            batch_deadline: None,
            last_batch: None,
        }
    }

    /// Directory decoded `image-data` hints are written to. Without one, image data is ignored.
    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = Some(dir.into());
        self
    }

    pub fn with_categories(mut self, categories: Box<dyn CategoryDefinitions>) -> Self {
        self.categories = categories;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<NotificationEvent> {
        self.events.clone()
    }

    fn publish(&self, event: NotificationEvent) {
        log::trace!("Publishing {:?}", event);
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    /// Look up a notification, including ones closed during the current request.
    pub fn notification(&self, id: NotificationId) -> Option<&Notification> {
        self.notifications.get(&id).or_else(|| self.pending_disposal.iter().find(|n| n.id() == id))
    }

    /// Ids of all live notifications in relevance order.
    pub fn ordered_ids(&self) -> Vec<NotificationId> {
        self.notifications.values().sorted_by(|a, b| relevance_cmp(a, b)).map(Notification::id).collect()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn is_persistent(&self) -> bool {
        self.store.is_enabled()
    }

    pub fn expiration_deadline(&self, id: NotificationId) -> Option<DateTime<Utc>> {
        self.expiration.deadline(id)
    }

    /// Time until the next notification expires, if any expiration is scheduled.
    pub fn next_expiration(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expiration.remaining(now)
    }

    pub fn commit_deadline(&self) -> Option<Instant> {
        self.store.commit_deadline()
    }

    pub fn commit(&mut self) {
        self.store.commit();
    }

    pub fn modified_batch_deadline(&self) -> Option<Instant> {
        self.batch_deadline
    }

    fn allocate_id(&mut self) -> NotificationId {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            let id = self.last_id;
            if id != 0 && !self.notifications.contains_key(&id) && !self.pending_disposal.iter().any(|n| n.id() == id) {
                return id;
            }
        }
    }

    /// Handle a `Notify` request, returning the id of the created or updated notification, or 0 if it was rejected.
    ///
    /// A replacement that is rejected leaves the notification it was meant to replace untouched.
    pub fn notify(&mut self, caller: &CallerIdentity, request: NotifyRequest) -> NotificationId {
        let existing = match request.replaces_id {
            0 => None,
            id if self.notifications.contains_key(&id) => Some(id),
            id => {
                log::debug!("Notification {} to replace does not exist, creating a new one", id);
                None
            }
        };

        let app_info = caller.process_name.as_deref().and_then(|name| self.app_info.get(name)).cloned();
        let display_name = app_info.as_ref().map(|info| info.name.as_str()).or(caller.process_name.as_deref());
        let bridged = display_name.is_some_and(|name| self.config.is_bridge(name));

        let (mut notification, image) = self.build_candidate(caller, request, app_info.as_ref(), bridged);
        self.apply_category_definition(&mut notification);
        if notification.expire_timeout() == -1 {
            notification.set_expire_timeout(self.config.default_expire_timeout_ms);
        }

        if !notification.is_user_removable() && !caller.privileged {
            log::warn!(
                "Rejecting notification from unprivileged process {} ({:?}): only privileged callers may publish \
                 notifications users can't remove",
                caller.raw_pid(),
                caller.process_name
            );
            return 0;
        }

        if bridged {
            self.apply_bridge_defaults(&mut notification);
        } else {
            apply_native_defaults(&mut notification);
        }

        let id = existing.unwrap_or_else(|| self.allocate_id());
        notification.set_id(id);
        if let Some(image) = image {
            self.store_image(&mut notification, &image);
        }

        match existing {
            Some(id) => {
                notification.set_restored(false);
                self.store.save_notification(&notification);
                let new_image = image_path(&notification).map(Path::to_path_buf);
                if let Some(previous) = self.notifications.insert(id, notification) {
                    if image_path(&previous) != new_image.as_deref() {
                        self.remove_image(&previous);
                    }
                }
                log::debug!("Updated notification {}", id);
                self.publish(NotificationEvent::Modified(id));
                self.queue_modified(id, Instant::now());
            }
            None => {
                log::debug!("Created notification {} for {:?}", id, notification.app_name());
                self.store.save_notification(&notification);
                self.notifications.insert(id, notification);
                self.publish(NotificationEvent::Added(id));
            }
        }
        id
    }

    fn build_candidate(
        &self,
        caller: &CallerIdentity,
        request: NotifyRequest,
        app_info: Option<&AppInfo>,
        bridged: bool,
    ) -> (Notification, Option<RawImage>) {
        let app_name = if !request.app_name.is_empty() {
            request.app_name.clone()
        } else {
            app_info.map(|info| info.name.clone()).or_else(|| caller.process_name.clone()).unwrap_or_default()
        };

        let mut notification = Notification::new(app_name.clone(), request.summary, request.body);
        notification.set_explicit_app_name(request.app_name);
        if bridged {
            notification.set_disambiguated_app_name(format!("{}{}", app_name, self.config.bridge_app_name_suffix));
        }
        notification.set_app_icon(request.app_icon, IconOrigin::Explicit);
        if let Some(info) = app_info {
            notification.set_app_icon(info.icon.clone(), IconOrigin::Inferred);
        }
        notification.set_actions(request.actions);
        notification.set_expire_timeout(request.expire_timeout);
        notification.set_privileged_source(caller.privileged);

        let mut hints = request.hints;
        normalize_timestamp(&mut hints);
        notification.set_hints(hints);
        (notification, request.image)
    }

    /// Fill in defaults from the definition of the notification's category.
    ///
    /// Fields are only filled when still empty. Hints are inserted when absent.
    fn apply_category_definition(&self, notification: &mut Notification) {
        if notification.category().is_empty() {
            return;
        }
        let Some(definition) = self.categories.definition(notification.category()) else {
            log::debug!("No definition for category {:?}", notification.category());
            return;
        };

        for (key, value) in definition.into_iter().sorted() {
            match key.as_str() {
                fields::APP_NAME => {
                    if notification.app_name().is_empty() {
                        notification.set_app_name(value);
                    }
                }
                fields::APP_ICON => {
                    notification.set_app_icon(value, IconOrigin::FromCategory);
                }
                fields::SUMMARY => {
                    if notification.summary().is_empty() {
                        notification.set_summary(value);
                    }
                }
                fields::BODY => {
                    if notification.body().is_empty() {
                        notification.set_body(value);
                    }
                }
                fields::EXPIRE_TIMEOUT => match value.parse() {
                    Ok(timeout) if notification.expire_timeout() == -1 => notification.set_expire_timeout(timeout),
                    Ok(_) => {}
                    Err(_) => log::warn!("Invalid expireTimeout {:?} in category {:?}", value, notification.category()),
                },
                keys::CATEGORY => {}
                _ => {
                    if notification.hint(&key).is_none() {
                        notification.set_hint(key, HintValue::from_definition(&value));
                    }
                }
            }
        }
    }

    fn apply_bridge_defaults(&self, notification: &mut Notification) {
        if let Some(priority) = self.priorities.priority(notification.app_name()) {
            notification.set_hint(keys::PRIORITY, i64::from(priority.priority));
            if let Some(feedback) = priority.feedback {
                notification.set_hint(keys::FEEDBACK, feedback);
            }
        }
        if notification.priority() >= self.config.bridge_preview_priority {
            let summary = notification.summary().to_owned();
            let body = notification.body().to_owned();
            for (key, value) in [(keys::PREVIEW_SUMMARY, summary), (keys::PREVIEW_BODY, body)] {
                if notification.hint(key).and_then(HintValue::as_str).map_or(true, str::is_empty) {
                    notification.set_hint(key, value);
                }
            }
        }
    }

    fn store_image(&self, notification: &mut Notification, image: &RawImage) {
        let Some(dir) = &self.image_dir else {
            log::debug!("Ignoring image data of notification {}, no image directory", notification.id());
            return;
        };
        match image.store(dir, notification.id()) {
            Ok(path) => {
                notification.set_hint(keys::IMAGE_PATH, path.to_string_lossy().into_owned());
            }
            Err(e) => log::warn!("Dropping image data of notification {}: {}", notification.id(), e),
        }
    }

    /// Delete the image file written for `notification`, if any.
    fn remove_image(&self, notification: &Notification) {
        let (Some(dir), Some(path)) = (&self.image_dir, image_path(notification)) else { return };
        let own_file = dir.join(image::file_name(notification.id()));
        if path != own_file {
            log::debug!("Not removing {}, it was not written for notification {}", path.display(), notification.id());
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove image {}: {}", path.display(), e);
            }
        }
    }

    /// Handle a `CloseNotification` request. Returns whether the notification was closed.
    pub fn close_notification(&mut self, caller: &CallerIdentity, id: NotificationId, reason: CloseReason) -> bool {
        let Some(notification) = self.notifications.get(&id) else {
            log::debug!("Not closing notification {}, it does not exist", id);
            return false;
        };
        if !notification.is_user_removable() && !caller.privileged {
            log::warn!("Unprivileged process {} may not close notification {}", caller.raw_pid(), id);
            return false;
        }
        self.close(id, reason, false);
        true
    }

    fn close(&mut self, id: NotificationId, reason: CloseReason, batched: bool) -> bool {
        let Some(notification) = self.notifications.remove(&id) else { return false };
        log::debug!("Closing notification {} ({})", id, reason);
        self.publish(NotificationEvent::Closed { id, reason });
        self.store.remove_notification(id);
        self.expiration.remove(id);
        self.pending_modified.remove(&id);
        if !batched {
            self.publish(NotificationEvent::Removed(id));
        }
        self.pending_disposal.push(notification);
        true
    }

    /// Destroy notifications closed since the last call, deleting their image files.
    pub fn flush_pending_disposal(&mut self) {
        for notification in std::mem::take(&mut self.pending_disposal) {
            self.remove_image(&notification);
        }
    }

    /// Called by the presentation layer once a notification is on screen.
    pub fn mark_notification_displayed(&mut self, id: NotificationId) {
        self.mark_notification_displayed_at(id, Utc::now());
    }

    pub fn mark_notification_displayed_at(&mut self, id: NotificationId, now: DateTime<Utc>) {
        let Some(notification) = self.notifications.get(&id) else {
            log::debug!("Displayed notification {} does not exist", id);
            return;
        };
        if notification.is_transient() {
            self.close(id, CloseReason::Expired, false);
            return;
        }
        let timeout = match notification.expire_timeout() {
            -1 => self.config.default_expire_timeout_ms,
            timeout => timeout,
        };
        if timeout <= 0 {
            return;
        }
        let expire_at = now + chrono::Duration::milliseconds(i64::from(timeout));
        if self.expiration.insert(id, expire_at) {
            self.store.set_expiration(id, expire_at);
        }
    }

    /// Close every notification whose expiration deadline has passed. Returns the ids closed.
    pub fn expire_due(&mut self, now: DateTime<Utc>) -> Vec<NotificationId> {
        let due = self.expiration.take_due(now);
        for id in &due {
            self.close(*id, CloseReason::Expired, false);
        }
        due
    }

    /// Notifications of `owner`, in relevance order. Callers that could not be identified get nothing.
    pub fn get_notifications(&self, caller: &CallerIdentity, owner: &str) -> Vec<Notification> {
        if !caller.is_resolved() {
            log::warn!("Refusing to list notifications of {:?} to an unidentified caller", owner);
            return Vec::new();
        }
        self.sorted(|n| n.owner() == owner)
    }

    pub fn get_notifications_by_category(&self, caller: &CallerIdentity, category: &str) -> Result<Vec<Notification>> {
        if !caller.privileged {
            return Err(Error::AccessDenied("list notifications by category"));
        }
        Ok(self.sorted(|n| n.category() == category))
    }

    fn sorted(&self, filter: impl Fn(&Notification) -> bool) -> Vec<Notification> {
        self.notifications.values().filter(|n| filter(n)).sorted_by(|a, b| relevance_cmp(a, b)).cloned().collect()
    }

    pub fn get_capabilities(&self) -> Vec<String> {
        capabilities()
    }

    pub fn get_server_information(&self) -> ServerInformation {
        server_information()
    }

    /// Invoke an action of a notification on behalf of the user.
    ///
    /// Unless the notification is resident, it is dismissed afterwards.
    pub fn invoke_action(&mut self, id: NotificationId, action_key: &str) -> bool {
        let Some(notification) = self.notifications.get(&id) else {
            log::debug!("Can't invoke {:?} on missing notification {}", action_key, id);
            return false;
        };
        if !notification.has_action(action_key) {
            log::warn!("Notification {} has no action {:?}", id, action_key);
            return false;
        }
        let resident = notification.is_resident();
        self.publish(NotificationEvent::ActionInvoked {
            id,
            action_key: action_key.to_owned(),
            remote_action: notification.remote_action(action_key),
            trusted: notification.privileged_source(),
        });
        if !resident {
            self.close(id, CloseReason::DismissedByUser, false);
        }
        true
    }

    /// Re-evaluate every notification of `category` against its current definition and republish it.
    ///
    /// Updated notifications are flagged as restored so they are not presented again.
    pub fn update_notifications_with_category(&mut self, category: &str) -> Vec<NotificationId> {
        let ids = self.ids_where(|n| n.category() == category);
        let now = Instant::now();
        for id in &ids {
            let Some(mut notification) = self.notifications.remove(id) else { continue };
            self.apply_category_definition(&mut notification);
            notification.set_restored(true);
            self.store.save_notification(&notification);
            self.notifications.insert(*id, notification);
            self.publish(NotificationEvent::Modified(*id));
            self.queue_modified(*id, now);
        }
        if !ids.is_empty() {
            log::debug!("Updated notifications {:?} of category {:?}", ids, category);
        }
        ids
    }

    /// Swap the category definitions and update the notifications of every category in `changed`.
    pub fn reload_categories(&mut self, categories: Box<dyn CategoryDefinitions>, changed: &[String]) {
        self.categories = categories;
        for category in changed {
            self.update_notifications_with_category(category);
        }
    }

    pub fn remove_notifications_with_category(&mut self, category: &str) -> Vec<NotificationId> {
        let ids = self.ids_where(|n| n.category() == category);
        self.close_batch(ids, CloseReason::Closed)
    }

    pub fn remove_user_removable_notifications(&mut self) -> Vec<NotificationId> {
        let ids = self.ids_where(Notification::is_user_removable);
        self.close_batch(ids, CloseReason::DismissedByUser)
    }

    fn ids_where(&self, filter: impl Fn(&Notification) -> bool) -> Vec<NotificationId> {
        self.notifications.values().filter(|n| filter(n)).map(Notification::id).collect()
    }

    fn close_batch(&mut self, ids: Vec<NotificationId>, reason: CloseReason) -> Vec<NotificationId> {
        let closed = ids.into_iter().filter(|id| self.close(*id, reason, true)).collect_vec();
        if !closed.is_empty() {
            self.publish(NotificationEvent::BatchRemoved(closed.clone()));
        }
        closed
    }

    fn queue_modified(&mut self, id: NotificationId, now: Instant) {
        self.pending_modified.insert(id);
        if self.batch_deadline.is_none() {
            let earliest = self.last_batch.map_or(now, |last| last + self.config.modified_batch_interval());
            self.batch_deadline = Some(earliest.max(now));
        }
    }

    /// Publish the modifications collected since the last batch.
    pub fn flush_modified_batch(&mut self, now: Instant) {
        self.batch_deadline = None;
        if self.pending_modified.is_empty() {
            return;
        }
        let ids = std::mem::take(&mut self.pending_modified).into_iter().collect_vec();
        self.last_batch = Some(now);
        self.publish(NotificationEvent::BatchModified(ids));
    }

    /// Load the notifications kept in storage.
    ///
    /// Transient notifications are discarded. In update mode, expired notifications are discarded too,
    /// and the least relevant user removable notifications are culled down to the configured maximum.
    pub fn restore_notifications(&mut self, update: bool) {
        self.restore_notifications_at(update, Utc::now());
    }

    pub fn restore_notifications_at(&mut self, update: bool, now: DateTime<Utc>) {
        let StoredState { notifications, mut expirations } = match self.store.load() {
            Ok(state) => state,
            Err(e) => {
                log::error!("Failed to restore notifications: {}", e);
                StoredState::default()
            }
        };

        let mut discarded = Vec::new();
        let mut kept = Vec::new();
        for notification in notifications {
            let expired = expirations.get(&notification.id()).is_some_and(|at| *at <= now);
            if notification.is_transient() || (update && expired) {
                discarded.push(notification);
            } else {
                kept.push(notification);
            }
        }

        if update && kept.len() > self.config.max_restored_notifications {
            let surplus = kept.len() - self.config.max_restored_notifications;
            let culled: BTreeSet<NotificationId> = kept
                .iter()
                .filter(|n| n.is_user_removable())
                .sorted_by(|a, b| relevance_cmp(a, b))
                .rev()
                .take(surplus)
                .map(Notification::id)
                .collect();
            let (cull, keep): (Vec<_>, Vec<_>) = kept.into_iter().partition(|n| culled.contains(&n.id()));
            discarded.extend(cull);
            kept = keep;
        }

        for notification in &discarded {
            log::debug!("Discarding stored notification {}", notification.id());
            self.store.remove_notification(notification.id());
            expirations.remove(&notification.id());
            self.remove_image(notification);
        }

        let restored_ids: BTreeSet<NotificationId> = kept.iter().map(Notification::id).collect();
        expirations.retain(|id, _| restored_ids.contains(id));
        self.last_id = self.last_id.max(restored_ids.last().copied().unwrap_or(0));
        log::info!("Restored {} notifications, discarded {}", kept.len(), discarded.len());
        for notification in kept {
            let id = notification.id();
            self.notifications.insert(id, notification);
            self.publish(NotificationEvent::Added(id));
        }
        self.expiration.reset(expirations);
    }
}

pub fn capabilities() -> Vec<String> {
    CAPABILITIES.iter().map(|c| c.to_string()).collect()
}

pub fn server_information() -> ServerInformation {
    ServerInformation {
        name: names::SERVER_NAME.to_string(),
        vendor: names::SERVER_VENDOR.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        spec_version: names::SPEC_VERSION.to_string(),
    }
}

/// Make sure the timestamp hint holds a UTC timestamp, stamping the current time when it is missing or malformed.
fn normalize_timestamp(hints: &mut Hints) {
    let timestamp = match hints.get(keys::TIMESTAMP) {
        Some(value) => value.as_timestamp().or_else(|| {
            log::debug!("Replacing malformed timestamp hint {:?}", value);
            None
        }),
        None => None,
    };
    hints.insert(keys::TIMESTAMP.to_string(), HintValue::Timestamp(timestamp.unwrap_or_else(Utc::now)));
}

fn apply_native_defaults(notification: &mut Notification) {
    if notification.hint(keys::PRIORITY).is_none() {
        notification.set_hint(keys::PRIORITY, i64::from(DEFAULT_PRIORITY));
    }
    if notification.hint(keys::PREVIEW_SUMMARY).is_none() {
        let summary = notification.summary().to_owned();
        notification.set_hint(keys::PREVIEW_SUMMARY, summary);
    }
    if notification.hint(keys::PREVIEW_BODY).is_none() {
        let body = notification.body().to_owned();
        notification.set_hint(keys::PREVIEW_BODY, body);
    }
}

fn image_path(notification: &Notification) -> Option<&Path> {
    notification.hint(keys::IMAGE_PATH).and_then(HintValue::as_str).map(Path::new)
}
