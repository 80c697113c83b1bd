use std::{collections::HashMap, time::Duration};

use chrono::TimeZone;
use pretty_assertions::assert_eq;

use super::*;
use crate::{
    lookup::{AppPriority, CategoryDefinition},
    store::StoreOptions,
};

fn events() -> (broadcast::Sender<NotificationEvent>, broadcast::Receiver<NotificationEvent>) {
    broadcast::channel(256)
}

fn manager_with(config: ServerConfig) -> (NotificationManager, broadcast::Receiver<NotificationEvent>) {
    let (tx, rx) = events();
    let store = Store::in_memory(Duration::from_secs(10)).unwrap();
    (NotificationManager::new(config, store, tx), rx)
}

fn manager() -> (NotificationManager, broadcast::Receiver<NotificationEvent>) {
    manager_with(ServerConfig::default())
}

fn on_disk(path: &Path, config: ServerConfig) -> (NotificationManager, broadcast::Receiver<NotificationEvent>) {
    let (tx, rx) = events();
    let store = Store::open(path, StoreOptions { commit_delay: Duration::from_secs(10), min_free_space: 0 });
    assert!(store.is_enabled());
    (NotificationManager::new(config, store, tx), rx)
}

fn client() -> CallerIdentity {
    CallerIdentity { pid: Some(4242), privileged: false, process_name: Some("messages".to_string()) }
}

fn system() -> CallerIdentity {
    CallerIdentity::own_process()
}

fn drain(rx: &mut broadcast::Receiver<NotificationEvent>) -> Vec<NotificationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

fn categories(definitions: &[(&str, &[(&str, &str)])]) -> HashMap<String, CategoryDefinition> {
    definitions
        .iter()
        .map(|(name, fields)| (name.to_string(), fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()))
        .collect()
}

#[test]
fn test_new_notifications_get_fresh_ids() {
    let (mut manager, mut rx) = manager();
    let first = manager.notify(&client(), NotifyRequest::new("app1", "s", "b"));
    let second = manager.notify(&client(), NotifyRequest::new("app1", "s", "b"));
    assert_ne!(first, 0);
    assert_ne!(second, 0);
    assert_ne!(first, second);
    assert_eq!(drain(&mut rx), vec![NotificationEvent::Added(first), NotificationEvent::Added(second)]);

    let listed = manager.get_notifications(&client(), "app1").iter().map(Notification::id).collect_vec();
    assert_eq!(listed, vec![second, first]);
    assert!(manager.get_notifications(&client(), "app2").is_empty());
}

#[test]
fn test_unidentified_callers_list_nothing() {
    let (mut manager, _rx) = manager();
    manager.notify(&client(), NotifyRequest::new("app1", "s", "b"));
    assert!(manager.get_notifications(&CallerIdentity::unresolved(), "app1").is_empty());
}

#[test]
fn test_listing_by_category_requires_privilege() {
    let (mut manager, _rx) = manager();
    let id = manager.notify(&client(), NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "x-chat"));
    assert!(matches!(
        manager.get_notifications_by_category(&client(), "x-chat"),
        Err(Error::AccessDenied(_))
    ));
    let listed = manager.get_notifications_by_category(&system(), "x-chat").unwrap();
    assert_eq!(listed.iter().map(Notification::id).collect_vec(), vec![id]);
}

#[test]
fn test_ids_wrap_around_skipping_zero_and_used_ids() {
    let (mut manager, _rx) = manager();
    let first = manager.notify(&client(), NotifyRequest::new("app1", "s", "b"));
    assert_eq!(first, 1);
    manager.last_id = NotificationId::MAX - 1;
    assert_eq!(manager.notify(&client(), NotifyRequest::new("app1", "s", "b")), NotificationId::MAX);
    assert_eq!(manager.notify(&client(), NotifyRequest::new("app1", "s", "b")), 2);
}

#[test]
fn test_replacing_keeps_id_and_clears_restored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notifications.db");
    let id = {
        let (mut manager, _rx) = on_disk(&path, ServerConfig::default());
        manager.notify(&client(), NotifyRequest::new("app1", "old summary", "b"))
    };

    let (mut manager, mut rx) = on_disk(&path, ServerConfig::default());
    manager.restore_notifications(false);
    assert!(manager.notification(id).unwrap().restored());
    drain(&mut rx);

    let mut request = NotifyRequest::new("app1", "new summary", "b");
    request.replaces_id = id;
    assert_eq!(manager.notify(&client(), request), id);
    let notification = manager.notification(id).unwrap();
    assert!(!notification.restored());
    assert_eq!(notification.summary(), "new summary");
    assert_eq!(notification.preview_summary(), "new summary");
    assert_eq!(manager.len(), 1);
    assert_eq!(drain(&mut rx), vec![NotificationEvent::Modified(id)]);
}

#[test]
fn test_replacing_unknown_id_creates_new_notification() {
    let (mut manager, _rx) = manager();
    let mut request = NotifyRequest::new("app1", "s", "b");
    request.replaces_id = 77;
    let id = manager.notify(&client(), request);
    assert_ne!(id, 77);
    assert_ne!(id, 0);
}

#[test]
fn test_unprivileged_caller_cannot_publish_persistent_notification() {
    let (mut manager, mut rx) = manager();
    let request = NotifyRequest::new("app1", "s", "b").with_hint(keys::USER_REMOVABLE, false);
    assert_eq!(manager.notify(&client(), request.clone()), 0);
    assert!(manager.is_empty());
    assert!(drain(&mut rx).is_empty());

    assert_ne!(manager.notify(&system(), request), 0);
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_rejected_replacement_keeps_previous_notification() {
    let (mut manager, _rx) = manager();
    let id = manager.notify(&client(), NotifyRequest::new("app1", "original", "b"));
    let mut request = NotifyRequest::new("app1", "sneaky", "b").with_hint(keys::USER_REMOVABLE, false);
    request.replaces_id = id;
    assert_eq!(manager.notify(&client(), request), 0);
    assert_eq!(manager.notification(id).unwrap().summary(), "original");
}

#[test]
fn test_close_emits_closed_and_removed_once() {
    let (mut manager, mut rx) = manager();
    let id = manager.notify(&client(), NotifyRequest::new("app1", "s", "b"));
    drain(&mut rx);

    assert!(manager.close_notification(&client(), id, CloseReason::Closed));
    assert!(!manager.close_notification(&client(), id, CloseReason::Closed));
    assert_eq!(
        drain(&mut rx),
        vec![NotificationEvent::Closed { id, reason: CloseReason::Closed }, NotificationEvent::Removed(id)]
    );
    assert!(manager.get_notifications(&client(), "app1").is_empty());

    // still readable until the end of the request
    assert_eq!(manager.notification(id).map(Notification::summary), Some("s"));
    manager.flush_pending_disposal();
    assert_eq!(manager.notification(id), None);
}

#[test]
fn test_unprivileged_close_of_persistent_notification_is_ignored() {
    let (mut manager, mut rx) = manager();
    let id = manager.notify(&system(), NotifyRequest::new("app1", "s", "b").with_hint(keys::USER_REMOVABLE, false));
    drain(&mut rx);
    assert!(!manager.close_notification(&client(), id, CloseReason::Closed));
    assert!(drain(&mut rx).is_empty());
    assert!(manager.close_notification(&system(), id, CloseReason::Closed));
}

#[test]
fn test_relevance_order_of_listing() {
    let (mut manager, _rx) = manager();
    let mut ids = Vec::new();
    for (priority, timestamp) in [(10, "2024-05-01T10:00:00Z"), (90, "2024-05-01T11:00:00Z"), (90, "2024-05-01T12:00:00Z")] {
        let request = NotifyRequest::new("app1", "s", "b")
            .with_hint(keys::PRIORITY, priority as i64)
            .with_hint(keys::TIMESTAMP, timestamp);
        ids.push(manager.notify(&client(), request));
    }
    let listed = manager.get_notifications(&client(), "app1").iter().map(Notification::id).collect_vec();
    assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);
    assert_eq!(manager.ordered_ids(), listed);
}

#[test]
fn test_timestamp_hint_is_normalized() {
    let (mut manager, _rx) = manager();
    let with_offset = manager.notify(
        &client(),
        NotifyRequest::new("app1", "s", "b").with_hint(keys::TIMESTAMP, "2024-05-01T14:00:00+02:00"),
    );
    assert_eq!(manager.notification(with_offset).unwrap().timestamp(), at(0));
    assert_eq!(manager.notification(with_offset).unwrap().hint(keys::TIMESTAMP), Some(&HintValue::Timestamp(at(0))));

    let before = Utc::now();
    let malformed =
        manager.notify(&client(), NotifyRequest::new("app1", "s", "b").with_hint(keys::TIMESTAMP, "yesterday-ish"));
    assert!(manager.notification(malformed).unwrap().timestamp() >= before);
}

#[test]
fn test_native_defaults_are_materialized() {
    let (mut manager, _rx) = manager();
    let id = manager.notify(&client(), NotifyRequest::new("app1", "summary", "body"));
    let notification = manager.notification(id).unwrap();
    assert_eq!(notification.hint(keys::PRIORITY), Some(&HintValue::Int(i64::from(DEFAULT_PRIORITY))));
    assert_eq!(notification.hint(keys::PREVIEW_SUMMARY), Some(&HintValue::String("summary".to_string())));
    assert_eq!(notification.hint(keys::PREVIEW_BODY), Some(&HintValue::String("body".to_string())));
    assert_eq!(notification.expire_timeout(), 0);
}

#[test]
fn test_marking_displayed_twice_schedules_one_deadline() {
    let (mut manager, _rx) = manager();
    let mut request = NotifyRequest::new("app1", "s", "b");
    request.expire_timeout = 5000;
    let id = manager.notify(&client(), request);

    manager.mark_notification_displayed_at(id, at(0));
    manager.mark_notification_displayed_at(id, at(3));
    assert_eq!(manager.expiration_deadline(id), Some(at(5)));
    assert_eq!(manager.expiration.len(), 1);
    assert_eq!(manager.next_expiration(at(1)), Some(Duration::from_secs(4)));
}

#[test]
fn test_notifications_without_timeout_never_expire() {
    let (mut manager, _rx) = manager();
    let mut request = NotifyRequest::new("app1", "s", "b");
    request.expire_timeout = 0;
    let id = manager.notify(&client(), request);
    manager.mark_notification_displayed_at(id, at(0));
    assert_eq!(manager.expiration_deadline(id), None);
    assert_eq!(manager.next_expiration(at(0)), None);
}

#[test]
fn test_transient_notification_expires_on_display() {
    let (mut manager, mut rx) = manager();
    let mut request = NotifyRequest::new("app1", "s", "b").with_hint(keys::TRANSIENT, true);
    request.expire_timeout = 5000;
    let id = manager.notify(&client(), request);
    drain(&mut rx);

    manager.mark_notification_displayed_at(id, at(0));
    assert_eq!(manager.expiration_deadline(id), None);
    assert!(manager.expiration.is_empty());
    assert_eq!(
        drain(&mut rx),
        vec![NotificationEvent::Closed { id, reason: CloseReason::Expired }, NotificationEvent::Removed(id)]
    );
}

#[test]
fn test_expire_due_closes_expired_notifications() {
    let (mut manager, mut rx) = manager();
    let mut ids = Vec::new();
    for timeout in [1000, 9000] {
        let mut request = NotifyRequest::new("app1", "s", "b");
        request.expire_timeout = timeout;
        let id = manager.notify(&client(), request);
        manager.mark_notification_displayed_at(id, at(0));
        ids.push(id);
    }
    drain(&mut rx);

    assert_eq!(manager.expire_due(at(2)), vec![ids[0]]);
    assert_eq!(
        drain(&mut rx),
        vec![NotificationEvent::Closed { id: ids[0], reason: CloseReason::Expired }, NotificationEvent::Removed(ids[0])]
    );
    assert_eq!(manager.next_expiration(at(2)), Some(Duration::from_secs(7)));
    assert_eq!(manager.ordered_ids(), vec![ids[1]]);
}

#[test]
fn test_category_defaults_only_fill_empty_fields() {
    let definitions = categories(&[(
        "x-battery",
        &[("appIcon", "icon-battery"), ("summary", "Battery"), ("body", "Battery is low"), ("x-priority", "120"), ("urgency", "2")],
    )]);
    let (mut manager, _rx) = manager_with(ServerConfig { categories: definitions, ..Default::default() });

    let mut request = NotifyRequest::new("battery", "Charge me", "").with_hint(keys::CATEGORY, "x-battery");
    request.app_icon = "icon-explicit".to_string();
    let id = manager.notify(&system(), request.with_hint(keys::URGENCY, 0i64));
    let notification = manager.notification(id).unwrap();
    assert_eq!(notification.summary(), "Charge me");
    assert_eq!(notification.body(), "Battery is low");
    assert_eq!(notification.app_icon(), "icon-explicit");
    assert_eq!(notification.priority(), 120);
    assert_eq!(notification.urgency(), crate::record::Urgency::Low);

    let id = manager.notify(&system(), NotifyRequest::new("battery", "", "").with_hint(keys::CATEGORY, "x-battery"));
    let notification = manager.notification(id).unwrap();
    assert_eq!(notification.summary(), "Battery");
    assert_eq!(notification.app_icon(), "icon-battery");
    assert_eq!(notification.app_icon_origin(), IconOrigin::FromCategory);
}

#[test]
fn test_category_expire_timeout_applies_to_server_default_only() {
    let definitions = categories(&[("x-call", &[("expireTimeout", "30000")])]);
    let (mut manager, _rx) = manager_with(ServerConfig { categories: definitions, ..Default::default() });
    let defaulted = manager.notify(&client(), NotifyRequest::new("phone", "s", "b").with_hint(keys::CATEGORY, "x-call"));
    let mut request = NotifyRequest::new("phone", "s", "b").with_hint(keys::CATEGORY, "x-call");
    request.expire_timeout = 1000;
    let explicit = manager.notify(&client(), request);
    assert_eq!(manager.notification(defaulted).unwrap().expire_timeout(), 30000);
    assert_eq!(manager.notification(explicit).unwrap().expire_timeout(), 1000);
}

#[test]
fn test_category_definition_can_make_notification_persistent() {
    let definitions = categories(&[("x-system", &[("x-user-removable", "false")])]);
    let (mut manager, _rx) = manager_with(ServerConfig { categories: definitions, ..Default::default() });
    let request = NotifyRequest::new("updater", "s", "b").with_hint(keys::CATEGORY, "x-system");
    assert_eq!(manager.notify(&client(), request.clone()), 0);
    let id = manager.notify(&system(), request);
    assert!(!manager.notification(id).unwrap().is_user_removable());
}

#[test]
fn test_update_with_category_touches_only_that_category() {
    let definitions = categories(&[("category1", &[("appIcon", "icon-one")]), ("category2", &[("appIcon", "icon-two")])]);
    let (mut manager, mut rx) = manager_with(ServerConfig { categories: definitions, ..Default::default() });
    let mut request = NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "category2");
    request.expire_timeout = 0;
    let updated = manager.notify(&client(), request);
    let sibling = manager.notify(&client(), NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "category1"));
    drain(&mut rx);

    let changed = categories(&[("category1", &[("appIcon", "icon-one")]), ("category2", &[("appIcon", "icon-new")])]);
    manager.reload_categories(Box::new(changed), &["category2".to_string()]);

    assert_eq!(drain(&mut rx), vec![NotificationEvent::Modified(updated)]);
    let notification = manager.notification(updated).unwrap();
    assert!(notification.restored());
    assert_eq!(notification.app_icon(), "icon-new");
    assert!(!manager.notification(sibling).unwrap().restored());
    assert_eq!(manager.notification(sibling).unwrap().app_icon(), "icon-one");

    assert_eq!(manager.update_notifications_with_category("category2"), vec![updated]);
    assert_eq!(manager.update_notifications_with_category("unused"), Vec::<NotificationId>::new());
}

#[test]
fn test_modifications_are_batched() {
    let (mut manager, mut rx) = manager();
    let first = manager.notify(&client(), NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "c"));
    let second = manager.notify(&client(), NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "c"));
    assert_eq!(manager.modified_batch_deadline(), None);

    manager.update_notifications_with_category("c");
    let deadline = manager.modified_batch_deadline().unwrap();
    drain(&mut rx);
    manager.flush_modified_batch(deadline);
    assert_eq!(drain(&mut rx), vec![NotificationEvent::BatchModified(vec![first, second])]);
    assert_eq!(manager.modified_batch_deadline(), None);

    // the next batch waits for the interval to pass
    let mut request = NotifyRequest::new("app1", "s2", "b");
    request.replaces_id = first;
    manager.notify(&client(), request);
    let next = manager.modified_batch_deadline().unwrap();
    assert!(next >= deadline + manager.config().modified_batch_interval());
}

#[test]
fn test_invoking_action_dismisses_notification() {
    let (mut manager, mut rx) = manager();
    let mut request = NotifyRequest::new("app1", "s", "b")
        .with_hint("x-remote-action-default", "org.example.App /org/example/App org.example.App activate");
    request.actions = vec!["default".to_string(), "Open".to_string()];
    let id = manager.notify(&system(), request);
    drain(&mut rx);

    assert!(!manager.invoke_action(id, "missing"));
    assert!(manager.invoke_action(id, "default"));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 3);
    match &events[0] {
        NotificationEvent::ActionInvoked { id: invoked, action_key, remote_action, trusted } => {
            assert_eq!(*invoked, id);
            assert_eq!(action_key, "default");
            assert_eq!(remote_action.as_ref().map(|a| a.method.as_str()), Some("activate"));
            assert!(*trusted);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(events[1], NotificationEvent::Closed { id, reason: CloseReason::DismissedByUser });
    assert_eq!(events[2], NotificationEvent::Removed(id));
}

#[test]
fn test_resident_notification_survives_action() {
    let (mut manager, mut rx) = manager();
    let mut request = NotifyRequest::new("app1", "s", "b").with_hint(keys::RESIDENT, true);
    request.actions = vec!["default".to_string(), "Open".to_string()];
    let id = manager.notify(&client(), request);
    drain(&mut rx);
    assert!(manager.invoke_action(id, "default"));
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], NotificationEvent::ActionInvoked { trusted: false, remote_action: None, .. }));
    assert_eq!(manager.len(), 1);
}

#[test]
fn test_bulk_removal_publishes_one_batch() {
    let (mut manager, mut rx) = manager();
    let a = manager.notify(&client(), NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "x-chat"));
    let b = manager.notify(&client(), NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "x-chat"));
    let persistent = manager.notify(&system(), NotifyRequest::new("app1", "s", "b").with_hint(keys::USER_REMOVABLE, false));
    let other = manager.notify(&client(), NotifyRequest::new("app1", "s", "b"));
    drain(&mut rx);

    assert_eq!(manager.remove_notifications_with_category("x-chat"), vec![a, b]);
    assert_eq!(
        drain(&mut rx),
        vec![
            NotificationEvent::Closed { id: a, reason: CloseReason::Closed },
            NotificationEvent::Closed { id: b, reason: CloseReason::Closed },
            NotificationEvent::BatchRemoved(vec![a, b]),
        ]
    );

    assert_eq!(manager.remove_user_removable_notifications(), vec![other]);
    assert_eq!(manager.ordered_ids(), vec![persistent]);
    assert!(manager.remove_notifications_with_category("x-chat").is_empty());
}

#[test]
fn test_bridged_notifications() {
    let config = ServerConfig {
        priorities: [("whatsapp".to_string(), AppPriority { priority: 120, feedback: Some("chat".to_string()) })]
            .into_iter()
            .collect(),
        ..Default::default()
    };
    let (mut manager, _rx) = manager_with(config);
    let bridge = CallerIdentity { pid: Some(500), privileged: false, process_name: Some("compat-bridge".to_string()) };

    let id = manager.notify(&bridge, NotifyRequest::new("whatsapp", "Alice", "Hi").with_hint(keys::PREVIEW_SUMMARY, ""));
    let notification = manager.notification(id).unwrap();
    assert_eq!(notification.disambiguated_app_name(), "whatsapp-compat");
    assert_eq!(notification.priority(), 120);
    assert_eq!(notification.feedback(), "chat");
    assert_eq!(notification.preview_summary(), "Alice");

    let id = manager.notify(&bridge, NotifyRequest::new("mail", "s", "b"));
    let notification = manager.notification(id).unwrap();
    assert_eq!(notification.disambiguated_app_name(), "mail-compat");
    assert_eq!(notification.hint(keys::PRIORITY), None);
    assert_eq!(notification.hint(keys::PREVIEW_SUMMARY), None);
}

#[test]
fn test_app_info_fills_name_and_icon() {
    let config = ServerConfig {
        applications: [(
            "messages".to_string(),
            crate::lookup::AppInfo { name: "Messages".to_string(), icon: "icon-m-sms".to_string() },
        )]
        .into_iter()
        .collect(),
        ..Default::default()
    };
    let (mut manager, _rx) = manager_with(config);
    let id = manager.notify(&client(), NotifyRequest::new("", "s", "b"));
    let notification = manager.notification(id).unwrap();
    assert_eq!(notification.app_name(), "Messages");
    assert_eq!(notification.explicit_app_name(), "");
    assert_eq!(notification.app_icon(), "icon-m-sms");
    assert_eq!(notification.app_icon_origin(), IconOrigin::Inferred);
}

#[test]
fn test_image_file_lives_as_long_as_notification() {
    let dir = tempfile::tempdir().unwrap();
    let (manager, _rx) = manager();
    let mut manager = manager.with_image_dir(dir.path().join("images"));
    let mut request = NotifyRequest::new("app1", "s", "b");
    request.image = Some(RawImage {
        width: 1,
        height: 1,
        rowstride: 3,
        has_alpha: false,
        bits_per_sample: 8,
        channels: 3,
        data: vec![255, 0, 0],
    });
    let id = manager.notify(&client(), request);
    let path = PathBuf::from(manager.notification(id).unwrap().hint(keys::IMAGE_PATH).unwrap().as_str().unwrap());
    assert_eq!(manager.notification(id).unwrap().icon(), path.to_str().unwrap());
    assert!(path.exists());

    manager.close_notification(&client(), id, CloseReason::DismissedByUser);
    assert!(path.exists());
    manager.flush_pending_disposal();
    assert!(!path.exists());
}

#[test]
fn test_only_server_written_images_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let image_dir = dir.path().join("images");
    std::fs::create_dir_all(&image_dir).unwrap();
    let victim = dir.path().join("victim.txt");
    std::fs::write(&victim, "keep me").unwrap();
    let (manager, _rx) = manager();
    let mut manager = manager.with_image_dir(&image_dir);

    let mut request = NotifyRequest::new("app1", "s", "b");
    request.image = Some(RawImage {
        width: 1,
        height: 1,
        rowstride: 3,
        has_alpha: false,
        bits_per_sample: 8,
        channels: 3,
        data: vec![0, 255, 0],
    });
    let owner = manager.notify(&client(), request);
    let owner_image = image_dir.join(format!("notification-{}.pam", owner));
    assert!(owner_image.exists());

    let escaping = image_dir.join("..").join("victim.txt");
    let sneaky = manager
        .notify(&client(), NotifyRequest::new("app2", "s", "b").with_hint(keys::IMAGE_PATH, escaping.to_string_lossy().into_owned()));
    let squatter = manager.notify(
        &client(),
        NotifyRequest::new("app3", "s", "b").with_hint(keys::IMAGE_PATH, owner_image.to_string_lossy().into_owned()),
    );
    manager.close_notification(&client(), sneaky, CloseReason::DismissedByUser);
    manager.close_notification(&client(), squatter, CloseReason::DismissedByUser);
    manager.flush_pending_disposal();
    assert!(victim.exists());
    assert!(owner_image.exists());

    manager.close_notification(&client(), owner, CloseReason::DismissedByUser);
    manager.flush_pending_disposal();
    assert!(!owner_image.exists());
}

#[test]
fn test_persisted_notifications_restore_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notifications.db");
    let originals = {
        let (mut manager, _rx) = on_disk(&path, ServerConfig::default());
        for (summary, body) in [("Alice", "Hi there"), ("Bob", "Ünïcödé body"), ("Carol", "")] {
            let mut request = NotifyRequest::new("messages", summary, body).with_hint("x-custom", 7i64);
            request.actions = vec!["default".to_string(), "Open".to_string(), "reply".to_string(), "Reply".to_string()];
            manager.notify(&client(), request);
        }
        manager.notify(&client(), NotifyRequest::new("messages", "gone", "soon").with_hint(keys::TRANSIENT, true));
        manager.notifications.values().filter(|n| !n.is_transient()).cloned().collect_vec()
    };

    let (mut manager, _rx) = on_disk(&path, ServerConfig::default());
    manager.restore_notifications(false);
    assert_eq!(manager.len(), originals.len());
    for original in &originals {
        let restored = manager.notification(original.id()).unwrap();
        assert!(restored.restored());
        assert_eq!(restored.summary(), original.summary());
        assert_eq!(restored.body(), original.body());
        assert_eq!(restored.hints(), original.hints());
        assert_eq!(restored.actions(), original.actions());
    }

    let next = manager.notify(&client(), NotifyRequest::new("messages", "s", "b"));
    assert!(originals.iter().all(|n| n.id() < next));
}

#[test]
fn test_restore_in_update_mode_drops_expired_and_culls() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notifications.db");
    let config = ServerConfig { max_restored_notifications: 2, ..Default::default() };
    let (expired, low, high, persistent) = {
        let (mut manager, _rx) = on_disk(&path, config.clone());
        let mut request = NotifyRequest::new("app1", "expired", "b");
        request.expire_timeout = 1000;
        let expired = manager.notify(&client(), request);
        manager.mark_notification_displayed_at(expired, at(-10));
        let low = manager.notify(&client(), NotifyRequest::new("app1", "low", "b").with_hint(keys::PRIORITY, 10i64));
        let high = manager.notify(&client(), NotifyRequest::new("app1", "high", "b").with_hint(keys::PRIORITY, 90i64));
        let persistent = manager.notify(
            &system(),
            NotifyRequest::new("app1", "persistent", "b")
                .with_hint(keys::PRIORITY, 1i64)
                .with_hint(keys::USER_REMOVABLE, false),
        );
        (expired, low, high, persistent)
    };

    {
        let (mut manager, _rx) = on_disk(&path, config.clone());
        manager.restore_notifications_at(false, at(0));
        assert_eq!(manager.len(), 4);
        assert_eq!(manager.expiration_deadline(expired), Some(at(-9)));
    }

    let (mut manager, _rx) = on_disk(&path, config);
    manager.restore_notifications_at(true, at(0));
    let mut ids = manager.ordered_ids();
    ids.sort();
    assert_eq!(ids, vec![high, persistent]);
    assert_eq!(manager.next_expiration(at(0)), None);
    assert!(!ids.contains(&low));
}

#[test]
fn test_restore_expired_notification_expires_immediately_without_update() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notifications.db");
    let id = {
        let (mut manager, _rx) = on_disk(&path, ServerConfig::default());
        let mut request = NotifyRequest::new("app1", "s", "b");
        request.expire_timeout = 1000;
        let id = manager.notify(&client(), request);
        manager.mark_notification_displayed_at(id, at(0));
        id
    };
    let (mut manager, _rx) = on_disk(&path, ServerConfig::default());
    manager.restore_notifications_at(false, at(60));
    assert_eq!(manager.next_expiration(at(60)), Some(Duration::ZERO));
    assert_eq!(manager.expire_due(at(60)), vec![id]);
}

#[test]
fn test_server_information() {
    let (manager, _rx) = manager();
    let info = manager.get_server_information();
    assert_eq!(info.name, names::SERVER_NAME);
    assert_eq!(info.spec_version, "1.2");
    assert!(manager.get_capabilities().contains(&"actions".to_string()));
}
