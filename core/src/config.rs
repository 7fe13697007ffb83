//! Configuration for the translation system.

use crate::extractor::SegmentOptions;
use crate::placeholder::NameOptions;
use crate::providers::{Gender, ProviderKind, TranslateOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file is not valid JSON: {0}")]
    Malformed(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslatorConfig {
    /// Directory watched for card PNGs.
    pub characters_dir: PathBuf,
    /// Where untouched originals are archived.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_state_db_path")]
    pub state_db_path: PathBuf,
    #[serde(default = "default_target_lang")]
    pub target_lang: String,
    #[serde(default)]
    pub provider: ProviderKind,
    #[serde(default)]
    pub translate_name: bool,
    #[serde(default)]
    pub translate_angle: bool,
    #[serde(default)]
    pub translate_parentheses: bool,
    #[serde(default)]
    pub translate_brackets: bool,
    #[serde(default = "default_true")]
    pub substitute_names: bool,
    /// Mask the persona with a fixed stand-in instead of the card's name.
    #[serde(default)]
    pub use_stand_in: bool,
    #[serde(default)]
    pub gender_hint: Gender,
    #[serde(default = "default_max_segment_len")]
    pub max_segment_len: usize,
    #[serde(default = "default_max_concurrent_files")]
    pub max_concurrent_files: usize,
    /// Attempts per file when reads hit a half-written PNG.
    #[serde(default = "default_io_retry_limit")]
    pub io_retry_limit: u32,
}

fn default_true() -> bool {
    true
}

fn default_target_lang() -> String {
    "pt".to_string()
}

fn default_max_segment_len() -> usize {
    4500
}

fn default_max_concurrent_files() -> usize {
    2
}

fn default_io_retry_limit() -> u32 {
    3
}

fn default_backup_dir() -> PathBuf {
    default_characters_dir().join("Original")
}

fn default_state_db_path() -> PathBuf {
    default_characters_dir().join("translation_db.json")
}

fn default_characters_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("SillyTavern")
        .join("data")
        .join("default-user")
        .join("characters")
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            characters_dir: default_characters_dir(),
            backup_dir: default_backup_dir(),
            state_db_path: default_state_db_path(),
            target_lang: default_target_lang(),
            provider: ProviderKind::default(),
            translate_name: false,
            translate_angle: false,
            translate_parentheses: false,
            translate_brackets: false,
            substitute_names: true,
            use_stand_in: false,
            gender_hint: Gender::default(),
            max_segment_len: default_max_segment_len(),
            max_concurrent_files: default_max_concurrent_files(),
            io_retry_limit: default_io_retry_limit(),
        }
    }
}

impl TranslatorConfig {
    /// Loads the config at `path`, writing the defaults there first if
    /// the file does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|err| ConfigError::Malformed(err.to_string()))
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path)?;
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(self)
            .map_err(|err| ConfigError::Malformed(err.to_string()))?;
        crate::chunk::write_atomic(path, &serialized)?;
        Ok(())
    }

    pub fn segment_options(&self) -> SegmentOptions {
        SegmentOptions {
            translate_name: self.translate_name,
            translate_angle: self.translate_angle,
            translate_parentheses: self.translate_parentheses,
            translate_square: self.translate_brackets,
            max_segment_len: self.max_segment_len,
        }
    }

    pub fn name_options(&self) -> NameOptions {
        NameOptions {
            substitute_names: self.substitute_names,
            use_stand_in: self.use_stand_in,
            character_name: None,
        }
    }

    pub fn translate_options(&self) -> TranslateOptions {
        TranslateOptions {
            source_lang: "en".to_string(),
            target_lang: self.target_lang.clone(),
            gender: self.gender_hint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TranslatorConfig::load_or_create(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.target_lang, "pt");
        assert!(config.substitute_names);
        assert_eq!(config.max_concurrent_files, 2);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"charactersDir": "/tmp/cards", "targetLang": "de", "provider": "mymemory"}"#,
        )
        .unwrap();

        let config = TranslatorConfig::load_or_create(&path).unwrap();
        assert_eq!(config.characters_dir, PathBuf::from("/tmp/cards"));
        assert_eq!(config.target_lang, "de");
        assert_eq!(config.provider, ProviderKind::MyMemory);
        assert_eq!(config.max_segment_len, 4500);
    }

    #[test]
    fn malformed_config_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "nope").unwrap();
        assert!(matches!(
            TranslatorConfig::load_or_create(&path),
            Err(ConfigError::Malformed(_))
        ));
    }

    #[test]
    fn round_trips_through_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = TranslatorConfig::default();
        config.translate_angle = true;
        config.target_lang = "es".to_string();
        config.save(&path).unwrap();

        let back = TranslatorConfig::load_or_create(&path).unwrap();
        assert!(back.translate_angle);
        assert_eq!(back.target_lang, "es");
    }
}
