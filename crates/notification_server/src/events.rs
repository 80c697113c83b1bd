use crate::record::{NotificationId, RemoteAction};

/// Why a notification was closed, as reported in the `NotificationClosed` signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[repr(u32)]
pub enum CloseReason {
    Expired = 1,
    DismissedByUser = 2,
    Closed = 3,
    Undefined = 4,
}

impl CloseReason {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<u32> for CloseReason {
    fn from(code: u32) -> Self {
        match code {
            1 => CloseReason::Expired,
            2 => CloseReason::DismissedByUser,
            3 => CloseReason::Closed,
            _ => CloseReason::Undefined,
        }
    }
}

/// Changes published by the manager to its observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    Closed { id: NotificationId, reason: CloseReason },
    ActionInvoked {
        id: NotificationId,
        action_key: String,
        /// Call to perform for this action, if the notification defines one.
        remote_action: Option<RemoteAction>,
        /// Whether the notification came from a privileged process.
        trusted: bool,
    },
    Added(NotificationId),
    Modified(NotificationId),
    /// Batched modifications, published at most once per batch interval.
    BatchModified(Vec<NotificationId>),
    Removed(NotificationId),
    BatchRemoved(Vec<NotificationId>),
}
