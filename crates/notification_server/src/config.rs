use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::Deserialize;
use smart_default::SmartDefault;

use crate::lookup::{AppInfo, AppPriority, CategoryDefinition};

/// Configuration of the notification server.
#[derive(Debug, Clone, PartialEq, Deserialize, SmartDefault)]
#[serde(default)]
pub struct ServerConfig {
    /// Upper bound of notifications kept when restoring in update mode.
    #[default = 100]
    pub max_restored_notifications: usize,

    /// Timeout applied to notifications that request the server default (-1). 0 means never.
    #[default = 0]
    pub default_expire_timeout_ms: i32,

    /// Quiet period after the last write before pending storage writes get committed.
    #[default = 10_000]
    pub commit_delay_ms: u64,

    /// Persistence is disabled when the database directory has less free space than this.
    #[default = 4_194_304]
    pub min_free_space_bytes: u64,

    /// Minimum interval between two batched modification events.
    #[default = 1_000]
    pub modified_batch_interval_ms: u64,

    /// Process names of the bridge that relays notifications from the compatibility layer.
    #[default(vec!["compat-bridge".to_string()])]
    pub bridge_process_names: Vec<String>,

    /// Appended to the application name of notifications relayed by the bridge.
    #[default("-compat".to_string())]
    pub bridge_app_name_suffix: String,

    /// Bridged notifications with at least this priority always get a preview.
    #[default = 100]
    pub bridge_preview_priority: i32,

    #[default(vec![PathBuf::from("/usr/bin/xdg-dbus-proxy")])]
    pub sandbox_proxy_executables: Vec<PathBuf>,

    /// Members of this group may create and close notifications users can't remove.
    #[default(Some("privileged".to_string()))]
    pub privileged_group: Option<String>,

    /// Display information for processes, keyed by process name.
    pub applications: HashMap<String, AppInfo>,

    /// Priorities for bridged applications, keyed by application name.
    pub priorities: HashMap<String, AppPriority>,

    pub categories: HashMap<String, CategoryDefinition>,
}

impl ServerConfig {
    pub fn commit_delay(&self) -> Duration {
        Duration::from_millis(self.commit_delay_ms)
    }

    pub fn modified_batch_interval(&self) -> Duration {
        Duration::from_millis(self.modified_batch_interval_ms)
    }

    pub fn is_bridge(&self, process_name: &str) -> bool {
        self.bridge_process_names.iter().any(|name| name == process_name)
    }
}
