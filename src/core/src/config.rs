//! OCM configuration file.
//!
//! The file is YAML and carries a list of generic typed configuration
//! objects which are handed to the config context, plus the log setup.
//!
//! ```yaml
//! log:
//!   level: info
//! configurations:
//!   - type: credentials.config.ocm.software
//!     consumers: []
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{OcmError, Result};
use crate::log::LogConfig;
use crate::typed::UnstructuredTypedObject;

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "OCM_CONFIG";

/// Default config file name in the home directory.
pub const DEFAULT_CONFIG_FILE: &str = ".ocmconfig";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcmConfig {
    /// Logging setup
    #[serde(default)]
    pub log: LogConfig,

    /// Typed config objects applied to the config context in order
    #[serde(default)]
    pub configurations: Vec<UnstructuredTypedObject>,
}

impl OcmConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            OcmError::Io(e).wrap(format!("reading config file {}", path.display()))
        })?;
        Self::from_slice(&data)
            .map_err(|e| e.wrap(format!("parsing config file {}", path.display())))
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_slice(data)?)
    }

    /// Resolve the config file location: `$OCM_CONFIG`, then `~/.ocmconfig`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            if !p.is_empty() {
                return Some(PathBuf::from(p));
            }
        }
        dirs::home_dir().map(|h| h.join(DEFAULT_CONFIG_FILE))
    }

    /// Load the default config file, or an empty config if there is none.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }
}
