//! Configuration loading and root folder resolution
//!
//! Bootstrap settings come from an optional TOML file. Everything tunable at
//! runtime lives in the database `settings` table instead; see the service
//! crates for those.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "HAVEN_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "haven.db";

/// Local fragment directory inside the root folder
pub const DATA_PAR_DIR: &str = "data-par";

/// Compiled-in fallback values used when no configuration is present
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub port: u16,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            log_level: "info".to_string(),
            port: 5790,
        }
    }
}

/// `[logging]` section of the bootstrap TOML
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Bootstrap configuration file
///
/// ```toml
/// root_folder = "/var/lib/haven"
/// port = 5790
/// transport_gateway = "http://127.0.0.1:6100"
/// suppliers = ["http://peer-a/id.xml", "http://peer-b/id.xml"]
///
/// [logging]
/// level = "debug"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    #[serde(default)]
    pub root_folder: Option<PathBuf>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Base URL of the supplier transport gateway; offline mode when absent
    #[serde(default)]
    pub transport_gateway: Option<String>,
    /// Initial supplier roster, used only when the database has none
    #[serde(default)]
    pub suppliers: Vec<String>,
}

/// Default location of a module's TOML file
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("haven").join(format!("{}.toml", module_name)))
}

/// Load a TOML config file
///
/// A missing file is not an error: the caller gets defaults and a warning.
/// A file that exists but does not parse is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
    info!("Loaded config file {}", path.display());
    Ok(config)
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `HAVEN_ROOT_FOLDER` environment variable
/// 3. `root_folder` in the TOML config
/// 4. OS-dependent compiled default
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml: Option<TomlConfig>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml = Some(config.clone());
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("{}: root folder from command line: {}", self.module_name, path.display());
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!("{}: root folder from {}: {}", self.module_name, ROOT_FOLDER_ENV, path);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = self.toml.as_ref().and_then(|c| c.root_folder.clone()) {
            info!("{}: root folder from config file: {}", self.module_name, path.display());
            return path;
        }

        let path = CompiledDefaults::for_current_platform().root_folder;
        info!("{}: root folder from compiled default: {}", self.module_name, path.display());
        path
    }
}

/// Creates the root folder layout on first run
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder and the `data-par` fragment directory
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        std::fs::create_dir_all(self.data_par_dir())?;
        Ok(())
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE)
    }

    pub fn data_par_dir(&self) -> PathBuf {
        self.root_folder.join(DATA_PAR_DIR)
    }
}

fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("haven"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\haven"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("haven"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/haven"))
    } else {
        dirs::data_local_dir()
            .map(|d| d.join("haven"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/haven"))
    }
}
