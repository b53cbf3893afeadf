//! Configuration loading and root folder resolution
//!
//! Resolution priority for the root folder:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "DISSFORGE_CONFIG";

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV_VAR: &str = "DISSFORGE_ROOT_FOLDER";

/// Logging section of the TOML file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info", "dissforge_gen=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level TOML configuration
///
/// Only the keys shared by every binary are typed here. Service-specific
/// sections (e.g. `[generator]`) stay as raw tables and are deserialized on
/// demand with [`TomlConfig::section`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database, beat library and rendered tracks
    pub root_folder: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Remaining sections, keyed by table name
    #[serde(flatten)]
    pub sections: toml::Table,
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Load from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!(path = %path.display(), "Loaded TOML configuration");
        Ok(config)
    }

    /// Load from `explicit` if given, else the platform config file if present, else defaults
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }
        match config_file_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Deserialize a named section, falling back to `T::default()` when absent
    pub fn section<T>(&self, name: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.sections.get(name) {
            Some(value) => value
                .clone()
                .try_into()
                .map_err(|e| Error::Config(format!("Invalid [{}] section: {}", name, e))),
            None => Ok(T::default()),
        }
    }
}

/// Root folder resolution
///
/// `toml_root` is the `root_folder` value of an already loaded TOML file.
pub fn resolve_root_folder(
    cli_arg: Option<&str>,
    env_var_name: &str,
    toml_root: Option<&str>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = toml_root {
        return PathBuf::from(path);
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Platform config file path
///
/// `DISSFORGE_CONFIG` wins; otherwise `<config_dir>/dissforge/config.toml`,
/// with `/etc/dissforge/config.toml` as a system-wide fallback on Linux.
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(path));
    }

    let user_config = dirs::config_dir().map(|d| d.join("dissforge").join("config.toml"));
    if cfg!(target_os = "linux") {
        if let Some(path) = &user_config {
            if path.exists() {
                return user_config;
            }
        }
        let system_config = PathBuf::from("/etc/dissforge/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    user_config
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "macos") {
        // ~/Library/Application Support/dissforge
        dirs::data_dir()
            .map(|d| d.join("dissforge"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/dissforge"))
    } else {
        // ~/.local/share/dissforge, %LOCALAPPDATA%\dissforge
        dirs::data_local_dir()
            .map(|d| d.join("dissforge"))
            .unwrap_or_else(|| PathBuf::from("./dissforge_data"))
    }
}

/// Creates the root folder layout and hands out well-known paths inside it
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the root folder and its `beats/` subdirectory if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.beats_path())?;
        Ok(())
    }

    /// SQLite database holding persisted stage artifacts
    pub fn database_path(&self) -> PathBuf {
        self.root.join("dissforge.db")
    }

    /// Beat library directory
    pub fn beats_path(&self) -> PathBuf {
        self.root.join("beats")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        #[serde(default)]
        name: String,
        #[serde(default)]
        count: u32,
    }

    #[test]
    fn test_sections_are_kept_raw() {
        let config = TomlConfig::from_toml_str(
            r#"
            root_folder = "/srv/dissforge"

            [logging]
            level = "debug"

            [sample]
            name = "x"
            count = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.root_folder.as_deref(), Some("/srv/dissforge"));
        assert_eq!(config.logging.level, "debug");
        let sample: Sample = config.section("sample").unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "x".to_string(),
                count: 3
            }
        );
    }

    #[test]
    fn test_missing_section_uses_default() {
        let config = TomlConfig::from_toml_str("").unwrap();
        let sample: Sample = config.section("sample").unwrap();
        assert_eq!(sample, Sample::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_malformed_section_is_config_error() {
        let config = TomlConfig::from_toml_str("[sample]\ncount = \"many\"\n").unwrap();
        let result: Result<Sample> = config.section("sample");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    #[serial]
    fn test_root_folder_priority() {
        std::env::set_var("DISSFORGE_TEST_ROOT", "/from/env");
        assert_eq!(
            resolve_root_folder(Some("/from/cli"), "DISSFORGE_TEST_ROOT", Some("/from/toml")),
            PathBuf::from("/from/cli")
        );
        assert_eq!(
            resolve_root_folder(None, "DISSFORGE_TEST_ROOT", Some("/from/toml")),
            PathBuf::from("/from/env")
        );
        std::env::remove_var("DISSFORGE_TEST_ROOT");
        assert_eq!(
            resolve_root_folder(None, "DISSFORGE_TEST_ROOT", Some("/from/toml")),
            PathBuf::from("/from/toml")
        );
    }

    #[test]
    fn test_initializer_creates_layout() {
        let temp = tempfile::TempDir::new().unwrap();
        let init = RootFolderInitializer::new(temp.path().join("root"));
        init.ensure_directory_exists().unwrap();
        assert!(init.beats_path().is_dir());
        assert_eq!(init.database_path(), temp.path().join("root").join("dissforge.db"));
    }
}
