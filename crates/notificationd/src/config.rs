use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use notification_server::{lookup::CategoryDefinition, ServerConfig};

pub type Categories = HashMap<String, CategoryDefinition>;

/// Read the server configuration. A missing file yields the default configuration.
pub fn read_from_file(path: &Path) -> Result<ServerConfig> {
    if !path.exists() {
        log::info!("No configuration at {}, using defaults", path.display());
        return Ok(ServerConfig::default());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Read a category definitions file. A missing file defines no categories.
pub fn read_categories(path: &Path) -> Result<Categories> {
    if !path.exists() {
        return Ok(Categories::new());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid category definitions in {}", path.display()))
}

/// Categories of the configuration file, overridden by those of the categories file.
pub fn merge_categories(config: &ServerConfig, from_file: Categories) -> Categories {
    let mut categories = config.categories.clone();
    categories.extend(from_file);
    categories
}
