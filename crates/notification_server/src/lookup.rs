//! Key/value lookups the manager consults: application info, category definitions and per-application priorities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Display information about the application behind a process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

pub trait AppInfoLookup: Send {
    fn lookup(&self, process_name: &str) -> Option<AppInfo>;
}

impl AppInfoLookup for HashMap<String, AppInfo> {
    fn lookup(&self, process_name: &str) -> Option<AppInfo> {
        self.get(process_name).cloned()
    }
}

/// Caches [`AppInfoLookup`] results per process name, including misses.
pub struct AppInfoCache {
    lookup: Box<dyn AppInfoLookup>,
    cache: HashMap<String, Option<AppInfo>>,
}

impl std::fmt::Debug for AppInfoCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppInfoCache").field("cache", &self.cache).finish()
    }
}

impl AppInfoCache {
    pub fn new(lookup: Box<dyn AppInfoLookup>) -> Self {
        AppInfoCache { lookup, cache: HashMap::new() }
    }

    pub fn get(&mut self, process_name: &str) -> Option<&AppInfo> {
        let lookup = &self.lookup;
        self.cache.entry(process_name.to_owned()).or_insert_with(|| lookup.lookup(process_name)).as_ref()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

/// A category definition: defaults for notification fields and hints, keyed by field or hint name.
pub type CategoryDefinition = HashMap<String, String>;

/// Field names recognized in category definitions. Any other key is a hint.
pub mod fields {
    pub const APP_NAME: &str = "appName";
    pub const APP_ICON: &str = "appIcon";
    pub const SUMMARY: &str = "summary";
    pub const BODY: &str = "body";
    pub const EXPIRE_TIMEOUT: &str = "expireTimeout";
}

pub trait CategoryDefinitions: Send {
    fn definition(&self, category: &str) -> Option<CategoryDefinition>;
}

impl CategoryDefinitions for HashMap<String, CategoryDefinition> {
    fn definition(&self, category: &str) -> Option<CategoryDefinition> {
        self.get(category).cloned()
    }
}

/// Priority assigned to an application relayed through the compatibility bridge.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppPriority {
    pub priority: i32,
    #[serde(default)]
    pub feedback: Option<String>,
}

pub trait PriorityLookup: Send {
    fn priority(&self, app_name: &str) -> Option<AppPriority>;
}

impl PriorityLookup for HashMap<String, AppPriority> {
    fn priority(&self, app_name: &str) -> Option<AppPriority> {
        self.get(app_name).cloned()
    }
}
