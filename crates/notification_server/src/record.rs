use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hints::{keys, HintValue, Hints};

pub type NotificationId = u32;

pub const DEFAULT_PRIORITY: i32 = 50;

/// How the application icon of a notification was determined.
///
/// A source may only overwrite an icon that was set by a source of equal or lower rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum IconOrigin {
    /// Looked up from the sending process.
    #[default]
    Inferred,
    /// Provided by the category definition.
    FromCategory,
    /// Passed by the client in the request.
    Explicit,
}

/// Urgency levels of the freedesktop.org notification protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum Urgency {
    Low,
    #[default]
    Normal,
    Critical,
}

impl Urgency {
    fn from_level(level: i64) -> Urgency {
        match level {
            0 => Urgency::Low,
            2 => Urgency::Critical,
            _ => Urgency::Normal,
        }
    }
}

/// Derived properties of a notification, as observed through its typed accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "camelCase")]
pub enum Property {
    Icon,
    Category,
    Urgency,
    Priority,
    ItemCount,
    Transient,
    Resident,
    UserRemovable,
    Owner,
    PreviewSummary,
    PreviewBody,
    Timestamp,
    Feedback,
}

/// A method call to perform on behalf of the user when an action is invoked.
///
/// Encoded in an `x-remote-action-<action>` hint as `"service path interface method"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAction {
    pub service: String,
    pub path: String,
    pub interface: String,
    pub method: String,
}

impl std::str::FromStr for RemoteAction {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(service), Some(path), Some(interface), Some(method)) if path.starts_with('/') => Ok(RemoteAction {
                service: service.to_owned(),
                path: path.to_owned(),
                interface: interface.to_owned(),
                method: method.to_owned(),
            }),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Derived {
    icon: String,
    category: String,
    urgency: Urgency,
    priority: i32,
    item_count: u32,
    transient: bool,
    resident: bool,
    user_removable: bool,
    owner: String,
    preview_summary: String,
    preview_body: String,
    timestamp: DateTime<Utc>,
    feedback: String,
}

impl Derived {
    fn compute(n: &Notification) -> Derived {
        let string_hint = |key: &str| n.hints.get(key).and_then(HintValue::as_str);
        let int_hint = |key: &str| n.hints.get(key).and_then(HintValue::as_int);
        let bool_hint = |key: &str| n.hints.get(key).and_then(HintValue::as_bool);

        Derived {
            icon: string_hint(keys::ICON)
                .filter(|icon| !icon.is_empty())
                .or_else(|| string_hint(keys::IMAGE_PATH))
                .unwrap_or_default()
                .to_owned(),
            category: string_hint(keys::CATEGORY).unwrap_or_default().to_owned(),
            urgency: int_hint(keys::URGENCY).map(Urgency::from_level).unwrap_or_default(),
            priority: int_hint(keys::PRIORITY)
                .and_then(|p| i32::try_from(p).ok())
                .unwrap_or(DEFAULT_PRIORITY),
            item_count: int_hint(keys::ITEM_COUNT).and_then(|c| u32::try_from(c).ok()).unwrap_or(1),
            transient: bool_hint(keys::TRANSIENT).unwrap_or(false),
            resident: bool_hint(keys::RESIDENT).unwrap_or(false),
            user_removable: bool_hint(keys::USER_REMOVABLE).unwrap_or(true),
            owner: string_hint(keys::OWNER).unwrap_or(&n.app_name).to_owned(),
            preview_summary: string_hint(keys::PREVIEW_SUMMARY).unwrap_or(&n.summary).to_owned(),
            preview_body: string_hint(keys::PREVIEW_BODY).unwrap_or(&n.body).to_owned(),
            timestamp: n.hints.get(keys::TIMESTAMP).and_then(HintValue::as_timestamp).unwrap_or_default(),
            feedback: string_hint(keys::FEEDBACK).unwrap_or_default().to_owned(),
        }
    }

    fn changed(&self, other: &Derived) -> Vec<Property> {
        let mut changed = Vec::new();
        macro_rules! compare {
            ($($field:ident => $prop:ident),* $(,)?) => {
                $( if self.$field != other.$field { changed.push(Property::$prop); } )*
            };
        }
        compare! {
            icon => Icon,
            category => Category,
            urgency => Urgency,
            priority => Priority,
            item_count => ItemCount,
            transient => Transient,
            resident => Resident,
            user_removable => UserRemovable,
            owner => Owner,
            preview_summary => PreviewSummary,
            preview_body => PreviewBody,
            timestamp => Timestamp,
            feedback => Feedback,
        }
        changed
    }
}

/// A single notification, as published by a client and held by the manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    id: NotificationId,
    app_name: String,
    explicit_app_name: String,
    disambiguated_app_name: String,
    app_icon: String,
    app_icon_origin: IconOrigin,
    summary: String,
    body: String,
    actions: Vec<String>,
    hints: Hints,
    expire_timeout: i32,
    restored: bool,
    privileged_source: bool,
    derived: Derived,
}

impl Default for Notification {
    fn default() -> Self {
        let mut notification = Notification {
            id: 0,
            app_name: String::new(),
            explicit_app_name: String::new(),
            disambiguated_app_name: String::new(),
            app_icon: String::new(),
            app_icon_origin: IconOrigin::default(),
            summary: String::new(),
            body: String::new(),
            actions: Vec::new(),
            hints: Hints::new(),
            expire_timeout: -1,
            restored: false,
            privileged_source: false,
            derived: Derived::default(),
        };
        notification.derived = Derived::compute(&notification);
        notification
    }
}

impl Notification {
    pub fn new(app_name: impl Into<String>, summary: impl Into<String>, body: impl Into<String>) -> Self {
        let mut notification = Notification::default();
        notification.app_name = app_name.into();
        notification.summary = summary.into();
        notification.body = body.into();
        notification.recompute();
        notification
    }

    fn recompute(&mut self) -> Vec<Property> {
        let derived = Derived::compute(self);
        let changed = self.derived.changed(&derived);
        self.derived = derived;
        changed
    }

    pub fn id(&self) -> NotificationId {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: NotificationId) {
        self.id = id;
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn set_app_name(&mut self, app_name: impl Into<String>) -> Vec<Property> {
        self.app_name = app_name.into();
        self.recompute()
    }

    /// The application name exactly as the client passed it.
    pub fn explicit_app_name(&self) -> &str {
        &self.explicit_app_name
    }

    pub fn set_explicit_app_name(&mut self, name: impl Into<String>) {
        self.explicit_app_name = name.into();
    }

    /// The application name, suffixed when the notification was relayed by a compatibility bridge.
    pub fn disambiguated_app_name(&self) -> &str {
        if self.disambiguated_app_name.is_empty() {
            &self.app_name
        } else {
            &self.disambiguated_app_name
        }
    }

    pub fn set_disambiguated_app_name(&mut self, name: impl Into<String>) {
        self.disambiguated_app_name = name.into();
    }

    pub fn app_icon(&self) -> &str {
        &self.app_icon
    }

    pub fn app_icon_origin(&self) -> IconOrigin {
        self.app_icon_origin
    }

    /// Set the application icon, unless it was already set by a higher ranked source.
    ///
    /// Returns whether the icon was applied.
    pub fn set_app_icon(&mut self, icon: impl Into<String>, origin: IconOrigin) -> bool {
        let icon = icon.into();
        if icon.is_empty() || (!self.app_icon.is_empty() && origin < self.app_icon_origin) {
            return false;
        }
        self.app_icon = icon;
        self.app_icon_origin = origin;
        true
    }

    pub(crate) fn restore_app_icon(&mut self, icon: String, origin: IconOrigin) {
        self.app_icon = icon;
        self.app_icon_origin = origin;
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) -> Vec<Property> {
        self.summary = summary.into();
        self.recompute()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<String>) -> Vec<Property> {
        self.body = body.into();
        self.recompute()
    }

    /// Actions as a flat list of alternating identifiers and localized labels.
    pub fn actions(&self) -> &[String] {
        &self.actions
    }

    pub fn set_actions(&mut self, mut actions: Vec<String>) {
        if actions.len() % 2 != 0 {
            log::debug!("Dropping trailing action identifier without a label: {:?}", actions.last());
            actions.pop();
        }
        self.actions = actions;
    }

    /// Iterate over `(identifier, label)` pairs.
    pub fn action_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.actions.chunks_exact(2).map(|pair| (pair[0].as_str(), pair[1].as_str()))
    }

    pub fn has_action(&self, action: &str) -> bool {
        self.action_pairs().any(|(id, _)| id == action)
    }

    pub fn hints(&self) -> &Hints {
        &self.hints
    }

    pub fn hint(&self, key: &str) -> Option<&HintValue> {
        self.hints.get(key)
    }

    /// Hints that are not mirrored into typed accessors.
    pub fn extra_hints(&self) -> impl Iterator<Item = (&String, &HintValue)> {
        self.hints.iter().filter(|(key, _)| !keys::is_structural(key))
    }

    /// Replace all hints, returning the derived properties that changed.
    pub fn set_hints(&mut self, hints: Hints) -> Vec<Property> {
        self.hints = hints;
        self.recompute()
    }

    pub fn set_hint(&mut self, key: impl Into<String>, value: impl Into<HintValue>) -> Vec<Property> {
        self.hints.insert(key.into(), value.into());
        self.recompute()
    }

    pub fn remove_hint(&mut self, key: &str) -> Vec<Property> {
        self.hints.remove(key);
        self.recompute()
    }

    /// Milliseconds after display at which the notification expires. -1 means server default, 0 means never.
    pub fn expire_timeout(&self) -> i32 {
        self.expire_timeout
    }

    pub fn set_expire_timeout(&mut self, timeout: i32) {
        self.expire_timeout = timeout;
    }

    /// Whether the notification was loaded from storage instead of published in this session.
    pub fn restored(&self) -> bool {
        self.restored
    }

    pub fn set_restored(&mut self, restored: bool) {
        self.restored = restored;
    }

    pub fn privileged_source(&self) -> bool {
        self.privileged_source
    }

    pub fn set_privileged_source(&mut self, privileged: bool) {
        self.privileged_source = privileged;
    }

    pub fn icon(&self) -> &str {
        &self.derived.icon
    }

    pub fn category(&self) -> &str {
        &self.derived.category
    }

    pub fn urgency(&self) -> Urgency {
        self.derived.urgency
    }

    pub fn priority(&self) -> i32 {
        self.derived.priority
    }

    pub fn item_count(&self) -> u32 {
        self.derived.item_count
    }

    pub fn is_transient(&self) -> bool {
        self.derived.transient
    }

    pub fn is_resident(&self) -> bool {
        self.derived.resident
    }

    pub fn is_user_removable(&self) -> bool {
        self.derived.user_removable
    }

    pub fn owner(&self) -> &str {
        &self.derived.owner
    }

    pub fn preview_summary(&self) -> &str {
        &self.derived.preview_summary
    }

    pub fn preview_body(&self) -> &str {
        &self.derived.preview_body
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.derived.timestamp
    }

    pub fn feedback(&self) -> &str {
        &self.derived.feedback
    }

    pub fn remote_action(&self, action: &str) -> Option<RemoteAction> {
        let key = format!("{}{}", keys::REMOTE_ACTION_PREFIX, action);
        self.hints.get(&key)?.as_str()?.parse().ok()
    }
}

/// The canonical order of notifications: higher priority first, then more recent first, then higher id first.
pub fn relevance_cmp(a: &Notification, b: &Notification) -> Ordering {
    b.priority().cmp(&a.priority()).then_with(|| b.timestamp().cmp(&a.timestamp())).then_with(|| b.id().cmp(&a.id()))
}
