//! App configuration.
//!
//! Stored as JSON at `<config dir>/cloudrive/config.json`. Missing files and
//! unparsable content fall back to defaults.

use std::path::{Path, PathBuf};

use cloudrive_drive_client::ClientConfig;
use cloudrive_upload::UploadSettings;
use serde::{Deserialize, Serialize};

/// Environment variable that overrides the stored API token.
pub const TOKEN_ENV: &str = "CLOUDRIVE_TOKEN";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Drive API connection.
    pub api: ClientConfig,

    /// Folder uploads land in when `--folder` is not given.
    pub default_folder_id: i64,

    /// Upload queue tunables.
    pub upload: UploadSettings,
}

impl AppConfig {
    /// Loads the config from `path`, or the default location when `None`,
    /// then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = resolve(path)?;
        let mut config = Self::load_file(&path)?;

        if let Ok(token) = std::env::var(TOKEN_ENV)
            && !token.is_empty()
        {
            config.api.token = token;
        }

        Ok(config)
    }

    /// Loads only what is stored at `path`, ignoring the environment.
    pub fn load_file(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<AppConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse config, using defaults"
                    );
                    AppConfig::default()
                }
            }
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            AppConfig::default()
        };
        Ok(config)
    }

    /// Writes the config to `path` with owner-only permissions.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        set_permissions_0600(path);
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// `path`, or the default location when `None`.
pub fn resolve(path: Option<&Path>) -> anyhow::Result<PathBuf> {
    match path {
        Some(p) => Ok(p.to_path_buf()),
        None => config_path(),
    }
}

/// Default config location.
pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("cloudrive").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME")
            && !xdg.is_empty()
        {
            return Ok(PathBuf::from(xdg));
        }
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home).join(".config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::load(Some(&dir.path().join("none.json"))).unwrap();
        assert_eq!(cfg.default_folder_id, 0);
        assert_eq!(cfg.upload, UploadSettings::default());
    }

    #[test]
    fn garbage_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.upload, UploadSettings::default());
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let mut cfg = AppConfig::default();
        cfg.default_folder_id = 42;
        cfg.upload.chunk_concurrency = 4;
        cfg.api.base_url = "https://drive.example.com/api".into();
        cfg.save(&path).unwrap();

        let loaded = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(loaded.default_folder_id, 42);
        assert_eq!(loaded.upload.chunk_concurrency, 4);
        assert_eq!(loaded.api.base_url, "https://drive.example.com/api");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"upload":{"fileConcurrency":2}}"#).unwrap();
        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.upload.file_concurrency, 2);
        assert_eq!(cfg.upload.chunk_concurrency, 1);
        assert_eq!(cfg.api.base_url, ClientConfig::default().base_url);
    }
}
