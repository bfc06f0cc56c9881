use anyhow::{Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::RwLock,
};

pub const ALLOWED_DOMAIN_ENV: &str = "BILCOUNT_ALLOWED_DOMAIN";
pub const DATA_DIR_ENV: &str = "BILCOUNT_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Sign-up is limited to addresses ending in `@<allowed_domain>`.
    pub allowed_domain: String,
    pub min_password_length: usize,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            allowed_domain: "example.com".into(),
            min_password_length: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CollectionSettings {
    pub locations: String,
    pub users: String,
}

impl Default for CollectionSettings {
    fn default() -> Self {
        Self {
            locations: "locations".into(),
            users: "users".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub auth: AuthSettings,
    pub collections: CollectionSettings,
    /// Realtime path under which each location's occupancy log lives.
    pub log_root: String,
    pub avatar_base_url: String,
    /// How many locations the headless runner keeps crowd trackers for.
    pub crowd_refresh_limit: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            auth: AuthSettings::default(),
            collections: CollectionSettings::default(),
            log_root: "logs".into(),
            avatar_base_url: "https://ui-avatars.com/api/?name=".into(),
            crowd_refresh_limit: 100,
        }
    }
}

impl AppSettings {
    /// Applies environment overrides on top of file values.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(domain) = std::env::var(ALLOWED_DOMAIN_ENV) {
            let domain = domain.trim();
            if !domain.is_empty() {
                self.auth.allowed_domain = domain.to_string();
            }
        }
        self
    }
}

/// Directory for the local database and settings file, honouring
/// `BILCOUNT_DATA_DIR`.
pub fn data_dir() -> PathBuf {
    std::env::var_os(DATA_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".bilcount"))
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_settings(&path)?
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data.with_env_overrides()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AppSettings {
        match self.data.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, change: F) -> Result<AppSettings>
    where
        F: FnOnce(&mut AppSettings),
    {
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        change(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    pub fn reload(&self) -> Result<()> {
        let data = read_settings(&self.path)?.with_env_overrides();
        let mut guard = match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = data;
        Ok(())
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create settings directory {}", parent.display())
            })?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}

fn read_settings(path: &Path) -> Result<AppSettings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    match serde_json::from_str(&contents) {
        Ok(settings) => Ok(settings),
        Err(err) => {
            warn!(
                "Ignoring malformed settings at {}: {err}; using defaults",
                path.display()
            );
            Ok(AppSettings::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json")).unwrap();

        let settings = store.get();
        assert_eq!(settings.collections.locations, "locations");
        assert_eq!(settings.log_root, "logs");
        assert_eq!(settings.auth.min_password_length, 6);
    }

    #[test]
    fn updates_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let store = SettingsStore::new(path.clone()).unwrap();

        store
            .update(|settings| settings.log_root = "sensors".into())
            .unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.get().log_root, "sensors");
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "crowdRefreshLimit": 5 }"#).unwrap();

        let store = SettingsStore::new(path).unwrap();
        let settings = store.get();
        assert_eq!(settings.crowd_refresh_limit, 5);
        assert_eq!(settings.collections.users, "users");
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();

        let store = SettingsStore::new(path).unwrap();
        assert_eq!(store.get().log_root, AppSettings::default().log_root);
    }
}
