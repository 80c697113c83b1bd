use std::collections::HashMap;

use anyhow::{Context, Result};
use notification_server::{
    dbus::{NotificationData, NotificationsProxy},
    hints::keys,
};
use zbus::zvariant::Value;

use crate::opts::{ClientAction, SendArgs};

/// Perform a client action against the running daemon, printing its result to stdout.
pub fn handle_client_action(system_bus: bool, action: ClientAction) -> Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .thread_name("notificationd-client")
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime")?;
    rt.block_on(async {
        let con = if system_bus { zbus::Connection::system().await } else { zbus::Connection::session().await }
            .context("Failed to connect to the message bus")?;
        let proxy = NotificationsProxy::new(&con).await?;
        log::debug!("Forwarding {:?} to the notification server", action);

        match action {
            ClientAction::Send(args) => {
                let id = send(&proxy, &args).await?;
                if id == 0 {
                    anyhow::bail!("The notification was rejected");
                }
                println!("{}", id);
            }
            ClientAction::List { owner, category } => {
                let notifications = match (category, owner) {
                    (Some(category), _) => proxy.get_notifications_by_category(&category).await,
                    (None, owner) => proxy.get_notifications(owner.as_deref().unwrap_or_default()).await,
                }
                .context("Failed to list notifications")?;
                for notification in &notifications {
                    println!("{}", format_notification(notification));
                }
            }
            ClientAction::Close { id } => {
                proxy.close_notification(id).await.with_context(|| format!("Failed to close notification {}", id))?;
            }
        }
        Ok::<_, anyhow::Error>(())
    })
}

async fn send(proxy: &NotificationsProxy<'_>, args: &SendArgs) -> Result<u32> {
    let mut hints: HashMap<&str, Value<'_>> = args.hints.iter().map(|(key, value)| (key.as_str(), Value::from(value.as_str()))).collect();
    if let Some(category) = &args.category {
        hints.insert(keys::CATEGORY, Value::from(category.as_str()));
    }
    if let Some(urgency) = args.urgency {
        hints.insert(keys::URGENCY, Value::U8(urgency));
    }
    let actions: Vec<&str> = args.actions.iter().flat_map(|(key, label)| [key.as_str(), label.as_str()]).collect();

    let id = proxy
        .notify(&args.app_name, args.replaces, &args.icon, &args.summary, &args.body, &actions, hints, args.expire_timeout)
        .await
        .context("Failed to send notification")?;
    Ok(id)
}

fn format_notification(notification: &NotificationData) -> String {
    let (app_name, id, _, summary, body, _, hints, _) = notification;
    let category = match hints.get(keys::CATEGORY).map(|value| &**value) {
        Some(Value::Str(category)) => category.as_str(),
        _ => "-",
    };
    format!("{}\t{}\t{}\t{}\t{}", id, app_name, category, summary, body.replace('\n', " "))
}
