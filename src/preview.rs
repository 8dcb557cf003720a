use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// environment variable consulted by [`PreviewMode::FromRuntime`]
pub const PREVIEW_ENV: &str = "JIMAGE_ENABLE_PREVIEW";

/// whether a reader exposes the preview namespace
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewMode {
    #[default]
    Disabled,
    Enabled,
    /// decided by the JIMAGE_ENABLE_PREVIEW environment variable
    #[serde(rename = "runtime")]
    FromRuntime,
}

impl PreviewMode {
    pub fn resolve(self) -> bool {
        match self {
            PreviewMode::Disabled => false,
            PreviewMode::Enabled => true,
            PreviewMode::FromRuntime => std::env::var(PREVIEW_ENV)
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
        }
    }
}

impl From<bool> for PreviewMode {
    fn from(enabled: bool) -> Self {
        if enabled {
            PreviewMode::Enabled
        } else {
            PreviewMode::Disabled
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

impl FromStr for PreviewMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" | "off" | "false" => Ok(PreviewMode::Disabled),
            "enabled" | "on" | "true" => Ok(PreviewMode::Enabled),
            "runtime" => Ok(PreviewMode::FromRuntime),
            _ => Err(Error::InvalidPreviewMode(s.to_string())),
        }
    }
}

impl fmt::Display for PreviewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PreviewMode::Disabled => "disabled",
            PreviewMode::Enabled => "enabled",
            PreviewMode::FromRuntime => "runtime",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("enabled".parse::<PreviewMode>().unwrap(), PreviewMode::Enabled);
        assert_eq!("OFF".parse::<PreviewMode>().unwrap(), PreviewMode::Disabled);
        assert_eq!("runtime".parse::<PreviewMode>().unwrap(), PreviewMode::FromRuntime);
        assert!(matches!(
            "sometimes".parse::<PreviewMode>(),
            Err(Error::InvalidPreviewMode(_))
        ));
    }

    #[test]
    fn test_display_matches_parse() {
        for mode in [PreviewMode::Disabled, PreviewMode::Enabled, PreviewMode::FromRuntime] {
            assert_eq!(mode.to_string().parse::<PreviewMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_fixed_modes_resolve() {
        assert!(PreviewMode::Enabled.resolve());
        assert!(!PreviewMode::Disabled.resolve());
        assert_eq!(PreviewMode::from(true), PreviewMode::Enabled);
    }

    #[test]
    fn test_flag_values() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("yes"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag(""));
    }
}
