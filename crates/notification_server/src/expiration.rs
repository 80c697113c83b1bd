use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::record::NotificationId;

/// Pending expiration deadlines of displayed notifications, driven by a single timer.
///
/// The timer is armed to the earliest deadline. When it fires, every deadline that
/// has passed is collected with [`ExpirationScheduler::take_due`], which re-arms the
/// timer to the earliest remaining one.
#[derive(Debug, Default)]
pub struct ExpirationScheduler {
    deadlines: HashMap<NotificationId, DateTime<Utc>>,
    armed: Option<DateTime<Utc>>,
}

impl ExpirationScheduler {
    /// Add a deadline for `id`, unless it already has one.
    ///
    /// Returns whether the deadline was added.
    pub fn insert(&mut self, id: NotificationId, expire_at: DateTime<Utc>) -> bool {
        if self.deadlines.contains_key(&id) {
            return false;
        }
        self.deadlines.insert(id, expire_at);
        if self.armed.map_or(true, |armed| expire_at < armed) {
            log::debug!("Expiration timer armed for notification {} at {}", id, expire_at);
            self.armed = Some(expire_at);
        }
        true
    }

    pub fn remove(&mut self, id: NotificationId) -> Option<DateTime<Utc>> {
        let removed = self.deadlines.remove(&id)?;
        if self.armed == Some(removed) {
            self.rearm();
        }
        Some(removed)
    }

    pub fn deadline(&self, id: NotificationId) -> Option<DateTime<Utc>> {
        self.deadlines.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// The deadline the timer is currently armed to.
    pub fn armed(&self) -> Option<DateTime<Utc>> {
        self.armed
    }

    /// How long until the timer fires, or `None` when it is disarmed.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.armed.map(|armed| (armed - now).to_std().unwrap_or(Duration::ZERO))
    }

    /// Replace all deadlines, e.g. with the ones read back from storage.
    pub fn reset(&mut self, deadlines: HashMap<NotificationId, DateTime<Utc>>) {
        self.deadlines = deadlines;
        self.rearm();
    }

    /// Remove and return every notification whose deadline is at or before `now`, earliest first.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<NotificationId> {
        let due = self
            .deadlines
            .iter()
            .filter(|(_, at)| **at <= now)
            .sorted_by_key(|(id, at)| (**at, **id))
            .map(|(id, _)| *id)
            .collect_vec();
        for id in &due {
            self.deadlines.remove(id);
        }
        self.rearm();
        due
    }

    fn rearm(&mut self) {
        self.armed = self.deadlines.values().min().copied();
        match self.armed {
            Some(at) => log::debug!("Expiration timer re-armed to {}", at),
            None => log::debug!("Expiration timer disarmed"),
        }
    }
}
