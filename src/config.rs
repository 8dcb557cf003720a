use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::preview::PreviewMode;

/// file name of the container inside a runtime's lib directory
pub const MODULES_FILE: &str = "modules";

/// reader configuration stored in a toml file
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// container to open when none is given on the command line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<PathBuf>,
    /// whether readers expose the preview namespace
    #[serde(default)]
    pub preview: PreviewMode,
}

impl Config {
    pub fn new(image: impl Into<PathBuf>) -> Self {
        Self {
            image: Some(image.into()),
            preview: PreviewMode::default(),
        }
    }

    /// load config from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }

    /// the container to open: `explicit`, then the configured image, then
    /// `$JAVA_HOME/lib/modules`
    pub fn image_path(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = &self.image {
            return Ok(path.clone());
        }
        std::env::var_os("JAVA_HOME")
            .map(|home| PathBuf::from(home).join("lib").join(MODULES_FILE))
            .ok_or(Error::NoImage)
    }
}
