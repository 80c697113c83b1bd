//! Durable storage of notifications and their expiration deadlines.
//!
//! Writes are grouped into a transaction that is committed once no further writes
//! happened for the configured commit delay. When the database can't be opened,
//! the store is disabled and every operation silently does nothing.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::{
    hints::{HintValue, Hints},
    record::{IconOrigin, Notification, NotificationId},
};

pub mod schema;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Failed to query free disk space: {0}")]
    Nix(#[from] nix::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Only {available} bytes free in {}, need at least {required}", .path.display())]
    InsufficientSpace { path: PathBuf, available: u64, required: u64 },
    #[error("Database integrity check failed: {0}")]
    Corrupt(String),
}

mod internal {
    pub const ICON_ORIGIN: &str = "icon-origin";
    pub const PRIVILEGED_SOURCE: &str = "privileged-source";
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub commit_delay: Duration,
    pub min_free_space: u64,
}

/// Everything read back from the database at startup.
#[derive(Debug, Default)]
pub struct StoredState {
    pub notifications: Vec<Notification>,
    pub expirations: HashMap<NotificationId, DateTime<Utc>>,
}

pub struct Store {
    conn: Option<Connection>,
    path: Option<PathBuf>,
    commit_delay: Duration,
    commit_deadline: Option<Instant>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("enabled", &self.is_enabled())
            .field("commit_deadline", &self.commit_deadline)
            .finish()
    }
}

impl Store {
    /// Open the database at `path`. Never fails: a database that can't be used results in a disabled store.
    ///
    /// A database that fails to open or to pass the integrity check is deleted and created anew, once.
    pub fn open(path: &Path, options: StoreOptions) -> Store {
        let conn = match Self::try_open(path, options.min_free_space) {
            Ok(conn) => Some(conn),
            Err(e @ StoreError::InsufficientSpace { .. }) => {
                log::warn!("Not persisting notifications: {}", e);
                None
            }
            Err(e) => {
                log::warn!("Could not open notification database {}: {}. Recreating it", path.display(), e);
                remove_database_files(path);
                match Self::try_open(path, options.min_free_space) {
                    Ok(conn) => Some(conn),
                    Err(e) => {
                        log::error!("Not persisting notifications, database {} is unusable: {}", path.display(), e);
                        None
                    }
                }
            }
        };
        Store { conn, path: Some(path.to_path_buf()), commit_delay: options.commit_delay, commit_deadline: None }
    }

    fn try_open(path: &Path, min_free_space: u64) -> Result<Connection, StoreError> {
        let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        check_free_space(dir, min_free_space)?;

        let conn = Connection::open(path)?;
        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(StoreError::Corrupt(check));
        }
        schema::prepare(&conn)?;
        Ok(conn)
    }

    pub fn in_memory(commit_delay: Duration) -> Result<Store, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::prepare(&conn)?;
        Ok(Store { conn: Some(conn), path: None, commit_delay, commit_deadline: None })
    }

    pub fn disabled() -> Store {
        Store { conn: None, path: None, commit_delay: Duration::ZERO, commit_deadline: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    /// When the pending transaction should be committed, if there is one.
    pub fn commit_deadline(&self) -> Option<Instant> {
        self.commit_deadline
    }

    fn write(&mut self, what: &str, f: impl FnOnce(&Connection) -> rusqlite::Result<()>) {
        let Some(conn) = &self.conn else { return };
        if conn.is_autocommit() {
            if let Err(e) = conn.execute_batch("BEGIN") {
                log::error!("Failed to begin notification database transaction: {}", e);
                return;
            }
        }
        if let Err(e) = conn.execute_batch("SAVEPOINT write") {
            log::error!("Failed to {}: {}", what, e);
            return;
        }
        let result = match f(conn) {
            Ok(()) => conn.execute_batch("RELEASE write"),
            Err(e) => {
                log::error!("Failed to {}: {}", what, e);
                conn.execute_batch("ROLLBACK TO write; RELEASE write")
            }
        };
        if let Err(e) = result {
            log::error!("Failed to finish writing to the notification database: {}", e);
        }
        self.commit_deadline = Some(Instant::now() + self.commit_delay);
    }

    /// Insert or replace the full state of a notification.
    pub fn save_notification(&mut self, notification: &Notification) {
        let hints = match encode_hints(notification.hints()) {
            Ok(hints) => hints,
            Err(e) => {
                log::error!("Failed to encode hints of notification {}: {}", notification.id(), e);
                return;
            }
        };
        self.write("store notification", |conn| {
            let id = notification.id();
            delete_rows(conn, id)?;
            conn.execute(
                "INSERT INTO notifications (id, app_name, app_icon, summary, body, expire_timeout, disambiguated_app_name, \
                 explicit_app_name) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    notification.app_name(),
                    notification.app_icon(),
                    notification.summary(),
                    notification.body(),
                    notification.expire_timeout(),
                    notification.disambiguated_app_name(),
                    notification.explicit_app_name(),
                ],
            )?;
            let mut insert_action = conn.prepare_cached("INSERT INTO actions (id, action, display_name) VALUES (?1, ?2, ?3)")?;
            for (action, label) in notification.action_pairs() {
                insert_action.execute(params![id, action, label])?;
            }
            let mut insert_hint = conn.prepare_cached("INSERT INTO hints (id, hint, value) VALUES (?1, ?2, ?3)")?;
            for (key, value) in &hints {
                insert_hint.execute(params![id, key, value])?;
            }
            let mut insert_internal =
                conn.prepare_cached("INSERT INTO internal_hints (id, hint, value) VALUES (?1, ?2, ?3)")?;
            insert_internal.execute(params![id, internal::ICON_ORIGIN, notification.app_icon_origin().to_string()])?;
            insert_internal.execute(params![id, internal::PRIVILEGED_SOURCE, notification.privileged_source().to_string()])?;
            Ok(())
        });
    }

    pub fn remove_notification(&mut self, id: NotificationId) {
        self.write("remove notification", |conn| {
            delete_rows(conn, id)?;
            conn.execute("DELETE FROM expiration WHERE id = ?1", params![id])?;
            Ok(())
        });
    }

    pub fn set_expiration(&mut self, id: NotificationId, expire_at: DateTime<Utc>) {
        self.write("store expiration", |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO expiration (id, expire_at) VALUES (?1, ?2)",
                params![id, expire_at.timestamp_millis()],
            )?;
            Ok(())
        });
    }

    pub fn remove_expiration(&mut self, id: NotificationId) {
        self.write("remove expiration", |conn| {
            conn.execute("DELETE FROM expiration WHERE id = ?1", params![id])?;
            Ok(())
        });
    }

    /// Commit pending writes now.
    pub fn commit(&mut self) {
        self.commit_deadline = None;
        let Some(conn) = &self.conn else { return };
        if conn.is_autocommit() {
            return;
        }
        log::debug!("Committing notification database");
        if let Err(e) = conn.execute_batch("COMMIT") {
            log::error!("Failed to commit notification database: {}", e);
        }
    }

    /// Read back every stored notification, flagged as restored, in ascending id order.
    pub fn load(&self) -> Result<StoredState, StoreError> {
        let Some(conn) = &self.conn else { return Ok(StoredState::default()) };

        let mut notifications: Vec<Notification> = conn
            .prepare(
                "SELECT id, app_name, app_icon, summary, body, expire_timeout, disambiguated_app_name, explicit_app_name \
                 FROM notifications ORDER BY id",
            )?
            .query_map([], |row| {
                let text = |idx: usize| row.get::<_, Option<String>>(idx).map(Option::unwrap_or_default);
                let mut notification = Notification::new(text(1)?, text(3)?, text(4)?);
                notification.set_id(row.get(0)?);
                notification.restore_app_icon(text(2)?, IconOrigin::default());
                notification.set_expire_timeout(row.get::<_, Option<i32>>(5)?.unwrap_or(-1));
                notification.set_disambiguated_app_name(text(6)?);
                notification.set_explicit_app_name(text(7)?);
                notification.set_restored(true);
                Ok(notification)
            })?
            .collect::<rusqlite::Result<_>>()?;
        let index: HashMap<NotificationId, usize> =
            notifications.iter().enumerate().map(|(idx, n)| (n.id(), idx)).collect();

        let mut actions: HashMap<NotificationId, Vec<String>> = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, action, display_name FROM actions ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?;
        for row in rows {
            let (id, action, label) = row?;
            actions.entry(id).or_default().extend([action, label]);
        }

        let mut hints: HashMap<NotificationId, Hints> = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, hint, value FROM hints")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?;
        for row in rows {
            let (id, key, value) = row?;
            match serde_json::from_str::<HintValue>(&value) {
                Ok(value) => {
                    hints.entry(id).or_default().insert(key, value);
                }
                Err(e) => log::warn!("Skipping unreadable hint {} of notification {}: {}", key, id, e),
            }
        }

        for (id, actions) in actions {
            if let Some(&idx) = index.get(&id) {
                notifications[idx].set_actions(actions);
            }
        }
        for (id, hints) in hints {
            if let Some(&idx) = index.get(&id) {
                notifications[idx].set_hints(hints);
            }
        }

        let mut stmt = conn.prepare("SELECT id, hint, value FROM internal_hints")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)))?;
        for row in rows {
            let (id, key, value): (NotificationId, String, String) = row?;
            let Some(notification) = index.get(&id).map(|&idx| &mut notifications[idx]) else { continue };
            match key.as_str() {
                internal::ICON_ORIGIN => {
                    let icon = notification.app_icon().to_owned();
                    notification.restore_app_icon(icon, value.parse().unwrap_or_default());
                }
                internal::PRIVILEGED_SOURCE => notification.set_privileged_source(value == "true"),
                _ => log::debug!("Ignoring unknown internal hint {} of notification {}", key, id),
            }
        }

        let mut expirations = HashMap::new();
        let mut stmt = conn.prepare("SELECT id, expire_at FROM expiration")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, NotificationId>(0)?, row.get::<_, i64>(1)?)))?;
        for row in rows {
            let (id, millis) = row?;
            match DateTime::<Utc>::from_timestamp_millis(millis) {
                Some(at) if index.contains_key(&id) => {
                    expirations.insert(id, at);
                }
                _ => log::debug!("Ignoring stale expiration of notification {}", id),
            }
        }

        Ok(StoredState { notifications, expirations })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        self.commit();
    }
}

fn delete_rows(conn: &Connection, id: NotificationId) -> rusqlite::Result<()> {
    for table in ["notifications", "actions", "hints", "internal_hints"] {
        conn.execute(&format!("DELETE FROM {} WHERE id = ?1", table), params![id])?;
    }
    Ok(())
}

fn encode_hints(hints: &Hints) -> Result<Vec<(&str, String)>, serde_json::Error> {
    hints.iter().map(|(key, value)| Ok((key.as_str(), serde_json::to_string(value)?))).collect()
}

fn check_free_space(dir: &Path, required: u64) -> Result<(), StoreError> {
    let stat = nix::sys::statvfs::statvfs(dir)?;
    #[allow(clippy::useless_conversion)]
    let available = u64::from(stat.blocks_available()) * u64::from(stat.fragment_size());
    if available < required {
        return Err(StoreError::InsufficientSpace { path: dir.to_path_buf(), available, required });
    }
    Ok(())
}

fn remove_database_files(path: &Path) {
    let mut journal = path.as_os_str().to_owned();
    journal.push("-journal");
    for file in [path.to_path_buf(), PathBuf::from(journal)] {
        if let Err(e) = std::fs::remove_file(&file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove {}: {}", file.display(), e);
            }
        }
    }
}
