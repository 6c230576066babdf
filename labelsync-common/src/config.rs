//! Configuration loading and root folder resolution
//!
//! Root folder resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `LABELSYNC_ROOT_FOLDER`, then `LABELSYNC_ROOT` environment variable
//! 3. `root_folder` key of the module TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup; it is logged and
//! the compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Primary environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "LABELSYNC_ROOT_FOLDER";
/// Alternative (shorter) environment variable naming the root folder
pub const ROOT_ENV: &str = "LABELSYNC_ROOT";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "labelsync.db";

/// Default listen address for the server
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";

/// Values used when nothing else is configured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub bind_address: String,
    pub log_level: String,
}

impl CompiledDefaults {
    /// Defaults for the platform this binary was compiled for
    pub fn for_current_platform() -> Self {
        Self {
            root_folder: default_root_folder(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Get OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/labelsync (or /var/lib/labelsync without a home)
        dirs::data_local_dir()
            .map(|d| d.join("labelsync"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/labelsync"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("labelsync"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/labelsync"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("labelsync"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\labelsync"))
    } else {
        PathBuf::from("./labelsync_data")
    }
}

/// `[logging]` section of the TOML config
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    CompiledDefaults::for_current_platform().log_level
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// `[retention]` section of the TOML config
///
/// A value of 0 disables the sweep for that table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default)]
    pub orders_days: u32,
    #[serde(default)]
    pub files_days: u32,
}

/// Module TOML configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Bearer token required on admin routes; admin routes are open when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,

    /// Client build recommended to installations polling `/api/v1/version`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_recommend: Option<String>,

    #[serde(default)]
    pub retention: RetentionConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Resolves the root folder and config file for one module
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            config_path: None,
        }
    }

    /// Root folder given on the command line, if any
    pub fn with_cli_arg(mut self, root_folder: Option<PathBuf>) -> Self {
        self.cli_arg = root_folder;
        self
    }

    /// Explicit config file path, overriding the per-platform lookup
    pub fn with_config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Locate the module config file
    ///
    /// Linux checks `~/.config/labelsync/<module>.toml` then
    /// `/etc/labelsync/<module>.toml`; other platforms use the user config dir.
    pub fn config_file_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            return Some(path.clone());
        }

        let file_name = format!("{}.toml", self.module_name);
        let user_config = dirs::config_dir().map(|d| d.join("labelsync").join(&file_name));

        if let Some(path) = user_config.filter(|p| p.exists()) {
            return Some(path);
        }

        if cfg!(target_os = "linux") {
            let system_config = PathBuf::from("/etc/labelsync").join(&file_name);
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load the module TOML config, falling back to defaults
    pub fn load_config(&self) -> TomlConfig {
        let Some(path) = self.config_file_path() else {
            debug!("No config file for {}; using defaults", self.module_name);
            return TomlConfig::default();
        };

        match load_toml_config(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{} (continuing with defaults)", e);
                TomlConfig::default()
            }
        }
    }

    /// Resolve the root folder against an already loaded config
    ///
    /// Follows the priority order in the module docs.
    pub fn resolve_with(&self, config: &TomlConfig) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return path.clone();
        }

        // Priority 2: Environment variables
        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(path) = std::env::var(var) {
                if !path.trim().is_empty() {
                    return PathBuf::from(path);
                }
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &config.root_folder {
            return path.clone();
        }

        // Priority 4: OS-dependent compiled default
        CompiledDefaults::for_current_platform().root_folder
    }
}

/// On-disk layout beneath the root folder
#[derive(Debug, Clone, PartialEq, Eq)]
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

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Directory holding the durable mapping snapshot
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Durable mapping snapshot written on every version bump
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir().join("mapping.json")
    }

    /// Label files, one `{key}.pdf` per tracking number
    pub fn labels_dir(&self) -> PathBuf {
        self.root.join("labels")
    }

    /// Per-day bundles, `pdfs-YYYYMMDD.zip`
    pub fn archive_dir(&self) -> PathBuf {
        self.root.join("archives")
    }

    /// Staging area for uploads being ingested
    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join("uploads")
    }

    /// Create the root folder and every subdirectory (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.data_dir(),
            self.labels_dir(),
            self.archive_dir(),
            self.uploads_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Config(format!("Cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}
