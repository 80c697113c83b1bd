use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

/// Stores references to all the paths relevant to notificationd, and abstracts access to these files and directories
#[derive(Debug, Clone)]
pub struct NotificationdPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub database_file: PathBuf,
    pub log_file: PathBuf,
}

impl NotificationdPaths {
    pub fn from_dirs(config_dir: impl AsRef<Path>, data_dir: impl AsRef<Path>, log_dir: impl AsRef<Path>) -> Result<Self> {
        let config_dir = config_dir.as_ref();
        if config_dir.is_file() {
            bail!("Please provide the path to the config directory, not a file within it")
        }

        let data_dir = data_dir.as_ref().to_path_buf();
        let log_dir = log_dir.as_ref().to_path_buf();
        for dir in [&data_dir, &log_dir] {
            if !dir.exists() {
                log::info!("Creating {}", dir.display());
                std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
            }
        }

        Ok(NotificationdPaths {
            config_dir: config_dir.to_path_buf(),
            database_file: data_dir.join("notifications.db"),
            data_dir,
            log_file: log_dir.join("notificationd.log"),
        })
    }

    /// Paths following the XDG base directories, with an optional override of the config dir.
    pub fn from_env(config_dir: Option<PathBuf>) -> Result<Self> {
        let config_dir = match config_dir {
            Some(dir) => dir,
            None => xdg_dir("XDG_CONFIG_HOME", ".config")?.join("notificationd"),
        };
        let data_dir = xdg_dir("XDG_DATA_HOME", ".local/share")?.join("notificationd");
        let log_dir = xdg_dir("XDG_CACHE_HOME", ".cache")?.join("notificationd");
        Self::from_dirs(config_dir, data_dir, log_dir)
    }

    pub fn with_database_file(mut self, database_file: PathBuf) -> Self {
        self.database_file = database_file;
        self
    }

    pub fn get_config_file(&self) -> PathBuf {
        self.config_dir.join("notificationd.json")
    }

    pub fn get_categories_file(&self) -> PathBuf {
        self.config_dir.join("categories.json")
    }

    pub fn get_database_file(&self) -> &Path {
        self.database_file.as_path()
    }

    pub fn get_image_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }

    pub fn get_log_file(&self) -> &Path {
        self.log_file.as_path()
    }

    pub fn get_config_dir(&self) -> &Path {
        self.config_dir.as_path()
    }
}

fn xdg_dir(var: &str, fallback_in_home: &str) -> Result<PathBuf> {
    match std::env::var(var) {
        Ok(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => {
            let home = std::env::var("HOME").with_context(|| format!("Neither {} nor HOME are set", var))?;
            Ok(PathBuf::from(home).join(fallback_in_home))
        }
    }
}

impl std::fmt::Display for NotificationdPaths {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "config-dir: {}, database: {}, log-file: {}",
            self.config_dir.display(),
            self.database_file.display(),
            self.log_file.display()
        )
    }
}
