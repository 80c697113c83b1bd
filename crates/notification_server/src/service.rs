//! The task owning the [`NotificationManager`], and the handle used to talk to it.
//!
//! Requests are processed one at a time. Between requests the task waits on three timers:
//! the next expiration, the storage commit delay and the modification batch interval.

use std::{collections::HashMap, time::Instant};

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    events::{CloseReason, NotificationEvent},
    identify::CallerIdentity,
    lookup::CategoryDefinition,
    manager::{NotificationManager, NotifyRequest},
    record::{Notification, NotificationId},
};

#[derive(Debug)]
pub enum ServiceCommand {
    Notify {
        caller: CallerIdentity,
        request: NotifyRequest,
        reply: oneshot::Sender<NotificationId>,
    },
    CloseNotification {
        caller: CallerIdentity,
        id: NotificationId,
        reason: CloseReason,
        reply: oneshot::Sender<bool>,
    },
    MarkDisplayed(NotificationId),
    InvokeAction {
        id: NotificationId,
        action_key: String,
        reply: oneshot::Sender<bool>,
    },
    GetNotifications {
        caller: CallerIdentity,
        owner: String,
        reply: oneshot::Sender<Vec<Notification>>,
    },
    GetNotificationsByCategory {
        caller: CallerIdentity,
        category: String,
        reply: oneshot::Sender<Result<Vec<Notification>>>,
    },
    UpdateCategory(String),
    ReloadCategories {
        categories: HashMap<String, CategoryDefinition>,
        changed: Vec<String>,
    },
    RemoveWithCategory {
        category: String,
        reply: oneshot::Sender<Vec<NotificationId>>,
    },
    RemoveUserRemovable(oneshot::Sender<Vec<NotificationId>>),
}

/// Cheap to clone handle to the notification service.
///
/// Producers inside this process publish through [`ServiceHandle::publish`], which is always privileged.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    commands: mpsc::UnboundedSender<ServiceCommand>,
    events: broadcast::Sender<NotificationEvent>,
}

impl ServiceHandle {
    fn send(&self, command: ServiceCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::ServiceGone)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ServiceCommand) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.send(command(reply))?;
        response.await.map_err(|_| Error::ServiceGone)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.events.subscribe()
    }

    pub async fn notify(&self, caller: CallerIdentity, request: NotifyRequest) -> Result<NotificationId> {
        self.request(|reply| ServiceCommand::Notify { caller, request, reply }).await
    }

    /// Publish a notification on behalf of this process.
    pub async fn publish(&self, request: NotifyRequest) -> Result<NotificationId> {
        self.notify(CallerIdentity::own_process(), request).await
    }

    pub async fn close_notification(&self, caller: CallerIdentity, id: NotificationId, reason: CloseReason) -> Result<bool> {
        self.request(|reply| ServiceCommand::CloseNotification { caller, id, reason, reply }).await
    }

    pub fn mark_notification_displayed(&self, id: NotificationId) -> Result<()> {
        self.send(ServiceCommand::MarkDisplayed(id))
    }

    pub async fn invoke_action(&self, id: NotificationId, action_key: impl Into<String>) -> Result<bool> {
        let action_key = action_key.into();
        self.request(|reply| ServiceCommand::InvokeAction { id, action_key, reply }).await
    }

    pub async fn get_notifications(&self, caller: CallerIdentity, owner: impl Into<String>) -> Result<Vec<Notification>> {
        let owner = owner.into();
        self.request(|reply| ServiceCommand::GetNotifications { caller, owner, reply }).await
    }

    pub async fn get_notifications_by_category(
        &self,
        caller: CallerIdentity,
        category: impl Into<String>,
    ) -> Result<Vec<Notification>> {
        let category = category.into();
        self.request(|reply| ServiceCommand::GetNotificationsByCategory { caller, category, reply }).await?
    }

    pub fn update_notifications_with_category(&self, category: impl Into<String>) -> Result<()> {
        self.send(ServiceCommand::UpdateCategory(category.into()))
    }

    pub fn reload_categories(&self, categories: HashMap<String, CategoryDefinition>, changed: Vec<String>) -> Result<()> {
        self.send(ServiceCommand::ReloadCategories { categories, changed })
    }

    pub async fn remove_notifications_with_category(&self, category: impl Into<String>) -> Result<Vec<NotificationId>> {
        let category = category.into();
        self.request(|reply| ServiceCommand::RemoveWithCategory { category, reply }).await
    }

    pub async fn remove_user_removable_notifications(&self) -> Result<Vec<NotificationId>> {
        self.request(ServiceCommand::RemoveUserRemovable).await
    }
}

/// Spawn the service task. It runs until `shutdown` is cancelled or every handle is dropped.
pub fn spawn(manager: NotificationManager, shutdown: CancellationToken) -> (ServiceHandle, tokio::task::JoinHandle<()>) {
    let (commands, receiver) = mpsc::unbounded_channel();
    let handle = ServiceHandle { commands, events: manager.event_sender() };
    let task = tokio::spawn(run(manager, receiver, shutdown));
    (handle, task)
}

async fn run(mut manager: NotificationManager, mut commands: mpsc::UnboundedReceiver<ServiceCommand>, shutdown: CancellationToken) {
    log::info!("Notification service running, {} notifications", manager.len());
    loop {
        let next_expiration = manager.next_expiration(Utc::now()).map(|remaining| Instant::now() + remaining);
        tokio::select! {
            _ = shutdown.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut manager, command),
                None => break,
            },
            _ = sleep_until(next_expiration) => {
                let expired = manager.expire_due(Utc::now());
                if !expired.is_empty() {
                    log::debug!("Expired notifications {:?}", expired);
                }
            }
            _ = sleep_until(manager.commit_deadline()) => manager.commit(),
            _ = sleep_until(manager.modified_batch_deadline()) => manager.flush_modified_batch(Instant::now()),
        }
        manager.flush_pending_disposal();
    }

    manager.flush_modified_batch(Instant::now());
    manager.commit();
    log::info!("Notification service stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await,
        None => std::future::pending().await,
    }
}

fn handle_command(manager: &mut NotificationManager, command: ServiceCommand) {
    log::trace!("Handling {:?}", command);
    // a dropped reply receiver only means the requester went away
    match command {
        ServiceCommand::Notify { caller, request, reply } => {
            let _ = reply.send(manager.notify(&caller, request));
        }
        ServiceCommand::CloseNotification { caller, id, reason, reply } => {
            let _ = reply.send(manager.close_notification(&caller, id, reason));
        }
        ServiceCommand::MarkDisplayed(id) => manager.mark_notification_displayed(id),
        ServiceCommand::InvokeAction { id, action_key, reply } => {
            let _ = reply.send(manager.invoke_action(id, &action_key));
        }
        ServiceCommand::GetNotifications { caller, owner, reply } => {
            let _ = reply.send(manager.get_notifications(&caller, &owner));
        }
        ServiceCommand::GetNotificationsByCategory { caller, category, reply } => {
            let _ = reply.send(manager.get_notifications_by_category(&caller, &category));
        }
        ServiceCommand::UpdateCategory(category) => {
            manager.update_notifications_with_category(&category);
        }
        ServiceCommand::ReloadCategories { categories, changed } => {
            log::info!("Reloading category definitions, changed: {:?}", changed);
            manager.reload_categories(Box::new(categories), &changed);
        }
        ServiceCommand::RemoveWithCategory { category, reply } => {
            let _ = reply.send(manager.remove_notifications_with_category(&category));
        }
        ServiceCommand::RemoveUserRemovable(reply) => {
            let _ = reply.send(manager.remove_user_removable_notifications());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{config::ServerConfig, hints::keys, store::Store};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn start(config: ServerConfig) -> (ServiceHandle, tokio::task::JoinHandle<()>, CancellationToken) {
        let (events, _) = broadcast::channel(64);
        let store = Store::in_memory(Duration::from_secs(10)).unwrap();
        let shutdown = CancellationToken::new();
        let (handle, task) = spawn(NotificationManager::new(config, store, events), shutdown.clone());
        (handle, task, shutdown)
    }

    fn client() -> CallerIdentity {
        CallerIdentity { pid: Some(4242), privileged: false, process_name: Some("messages".to_string()) }
    }

    async fn next_event(events: &mut broadcast::Receiver<NotificationEvent>) -> NotificationEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_publish_list_close() {
        let (handle, task, shutdown) = start(ServerConfig::default());
        let mut events = handle.subscribe();

        let id = handle.notify(client(), NotifyRequest::new("app1", "s", "b")).await.unwrap();
        assert_eq!(next_event(&mut events).await, NotificationEvent::Added(id));
        let listed = handle.get_notifications(client(), "app1").await.unwrap();
        assert_eq!(listed.iter().map(Notification::id).collect::<Vec<_>>(), vec![id]);

        assert!(handle.close_notification(client(), id, CloseReason::Closed).await.unwrap());
        assert_eq!(next_event(&mut events).await, NotificationEvent::Closed { id, reason: CloseReason::Closed });
        assert_eq!(next_event(&mut events).await, NotificationEvent::Removed(id));

        assert!(matches!(
            handle.get_notifications_by_category(client(), "x-chat").await,
            Err(Error::AccessDenied(_))
        ));

        shutdown.cancel();
        task.await.unwrap();
        assert!(matches!(handle.publish(NotifyRequest::new("app1", "s", "b")).await, Err(Error::ServiceGone)));
    }

    #[tokio::test]
    async fn test_displayed_notification_expires() {
        let (handle, task, shutdown) = start(ServerConfig::default());
        let mut events = handle.subscribe();

        let mut request = NotifyRequest::new("app1", "s", "b");
        request.expire_timeout = 50;
        let id = handle.publish(request).await.unwrap();
        assert_eq!(next_event(&mut events).await, NotificationEvent::Added(id));
        handle.mark_notification_displayed(id).unwrap();
        assert_eq!(next_event(&mut events).await, NotificationEvent::Closed { id, reason: CloseReason::Expired });
        assert_eq!(next_event(&mut events).await, NotificationEvent::Removed(id));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_category_update_is_batched() {
        let (handle, task, shutdown) = start(ServerConfig::default());
        let mut events = handle.subscribe();

        let id = handle.publish(NotifyRequest::new("app1", "s", "b").with_hint(keys::CATEGORY, "x-chat")).await.unwrap();
        assert_eq!(next_event(&mut events).await, NotificationEvent::Added(id));
        handle.update_notifications_with_category("x-chat").unwrap();
        assert_eq!(next_event(&mut events).await, NotificationEvent::Modified(id));
        assert_eq!(next_event(&mut events).await, NotificationEvent::BatchModified(vec![id]));

        shutdown.cancel();
        task.await.unwrap();
    }
}
