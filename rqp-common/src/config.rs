//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "RQP_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "rqp.db";

/// Result artifact folder name inside the root folder
pub const RESULTS_FOLDER: &str = "results";

/// Optional post-processor catalog file inside the root folder
pub const CATALOG_FILE: &str = "catalog.toml";

/// Contents of `config.toml`
///
/// Every field is optional; a missing or unreadable file is equivalent to an
/// empty one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    /// Root folder holding the database and result files
    pub root_folder: Option<PathBuf>,
    /// Log filter directive, e.g. `info` or `rqp_qr=debug`
    pub log_level: Option<String>,
    /// Result folder override (absolute, or relative to the root folder)
    pub results_folder: Option<PathBuf>,
    /// Catalog file override (absolute, or relative to the root folder)
    pub catalog_file: Option<PathBuf>,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config file: {}", e)))
    }

    /// Load the platform config file, falling back to defaults when absent
    pub fn load() -> Self {
        let Ok(path) = find_config_file() else {
            return Self::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => {
                    info!("Loaded config file: {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Ignoring {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &TomlConfig,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root_folder) = &config.root_folder {
        return root_folder.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Get configuration file path for the platform
fn find_config_file() -> Result<PathBuf> {
    // ~/.config/rqp/config.toml first, then /etc/rqp/config.toml
    let user_config = dirs::config_dir().map(|d| d.join("rqp").join("config.toml"));

    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/rqp/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }
    }

    Err(Error::Config("No config file found".to_string()))
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "windows") {
        // %LOCALAPPDATA%\rqp
        dirs::data_local_dir()
            .map(|d| d.join("rqp"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\rqp"))
    } else if cfg!(unix) {
        // ~/.local/share/rqp, ~/Library/Application Support/rqp on macOS
        dirs::data_local_dir()
            .map(|d| d.join("rqp"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/rqp"))
    } else {
        PathBuf::from("./rqp_data")
    }
}

/// File layout derived from a resolved root folder
#[derive(Debug, Clone)]
pub struct RootLayout {
    root: PathBuf,
    results: PathBuf,
    catalog: PathBuf,
}

impl RootLayout {
    /// Layout with the default file names
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            results: root.join(RESULTS_FOLDER),
            catalog: root.join(CATALOG_FILE),
            root,
        }
    }

    /// Layout honouring the overrides in `config`
    pub fn with_config(root: impl Into<PathBuf>, config: &TomlConfig) -> Self {
        let mut layout = Self::new(root);
        if let Some(results) = &config.results_folder {
            layout.results = layout.root.join(results);
        }
        if let Some(catalog) = &config.catalog_file {
            layout.catalog = layout.root.join(catalog);
        }
        layout
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn results_dir(&self) -> &Path {
        &self.results
    }

    /// Catalog file location; the file itself is optional
    pub fn catalog_path(&self) -> &Path {
        &self.catalog
    }

    /// Create the root and result folders if they do not exist yet
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(&self.results)?;
        Ok(())
    }
}
