//! Settings persisted on the local device.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ClientError, Result};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Run against the in-process backends instead of the hosted providers.
    pub mock_mode: bool,
    /// Prefilled on the sign-in form.
    pub last_nickname: Option<String>,
    /// Target language for message translation.
    pub translate_to: String,
    pub notifications_enabled: bool,
    pub sound_enabled: bool,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            mock_mode: false,
            last_nickname: None,
            translate_to: "en".into(),
            notifications_enabled: true,
            sound_enabled: true,
        }
    }
}

impl ClientSettings {
    /// `settings.json` in the platform config directory.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "chatwii", "chatwii")
            .map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
    }

    /// Read settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let json = match std::fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No settings file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ClientError::Settings(format!("Failed to read settings: {e}"))),
        };
        serde_json::from_str(&json)
            .map_err(|e| ClientError::Settings(format!("Corrupt settings JSON: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .map_err(|e| ClientError::Settings(format!("Failed to create {}: {e}", dir.display())))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ClientError::Settings(format!("Failed to serialize settings: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| ClientError::Settings(format!("Failed to write settings: {e}")))?;
        info!(path = %path.display(), mock_mode = self.mock_mode, "Settings saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ClientSettings::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings, ClientSettings::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join(SETTINGS_FILE);
        let settings = ClientSettings {
            mock_mode: true,
            last_nickname: Some("Nova".into()),
            ..ClientSettings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(ClientSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, r#"{"mockMode":true}"#).unwrap();
        let settings = ClientSettings::load(&path).unwrap();
        assert!(settings.mock_mode);
        assert_eq!(settings.translate_to, "en");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ClientSettings::load(&path),
            Err(ClientError::Settings(_))
        ));
    }
}
