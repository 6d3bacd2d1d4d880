// crates/statechart-config/src/loader.rs
// ============================================================================
// Module: Machine Config Loader
// Description: Strict parsing of machine configs from documents and files.
// Purpose: Provide fail-closed config loading with format detection.
// Dependencies: statechart-core, serde_json, serde_yaml, toml
// ============================================================================

//! ## Overview
//! Configuration documents are untrusted input. Loading enforces a hard size
//! limit, detects the format from the file extension, and surfaces precise
//! parse errors. All three formats deserialize into the same
//! [`MachineConfig`] shape; insertion order of state and transition maps is
//! preserved by the core config types.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;

use statechart_core::MachineConfig;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;

// ============================================================================
// SECTION: Config Formats
// ============================================================================

/// Supported configuration document formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// JSON document.
    Json,
    /// YAML document.
    Yaml,
    /// TOML document.
    Toml,
}

impl ConfigFormat {
    /// Detects the format from a file extension.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Returns a stable label for error messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
            Self::Toml => "toml",
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading machine configurations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the file failed.
    #[error("failed to read config file `{path}`: {message}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying I/O error message.
        message: String,
    },
    /// The file exceeds the size limit.
    #[error("config file `{path}` exceeds {MAX_CONFIG_FILE_SIZE} bytes")]
    TooLarge {
        /// Offending path.
        path: String,
    },
    /// The file extension maps to no known format.
    #[error("config file `{path}` has an unrecognized extension")]
    UnknownFormat {
        /// Offending path.
        path: String,
    },
    /// The document failed to parse as the detected format.
    #[error("failed to parse {format} config: {message}")]
    Parse {
        /// Format label.
        format: &'static str,
        /// Parser error message.
        message: String,
    },
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses a machine configuration document in the given format.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] when the document does not deserialize
/// into a machine configuration.
pub fn parse_machine_config(
    source: &str,
    format: ConfigFormat,
) -> Result<MachineConfig, ConfigError> {
    match format {
        ConfigFormat::Json => {
            serde_json::from_str(source).map_err(|err| ConfigError::Parse {
                format: format.label(),
                message: err.to_string(),
            })
        }
        ConfigFormat::Yaml => {
            serde_yaml::from_str(source).map_err(|err| ConfigError::Parse {
                format: format.label(),
                message: err.to_string(),
            })
        }
        ConfigFormat::Toml => {
            toml::from_str(source).map_err(|err| ConfigError::Parse {
                format: format.label(),
                message: err.to_string(),
            })
        }
    }
}

/// Loads a machine configuration from a file, detecting the format from the
/// extension.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file cannot be read, exceeds the size
/// limit, has an unrecognized extension, or fails to parse.
pub fn load_machine_config(path: &Path) -> Result<MachineConfig, ConfigError> {
    let display = path.display().to_string();
    let format = path
        .extension()
        .and_then(|extension| extension.to_str())
        .and_then(ConfigFormat::from_extension)
        .ok_or_else(|| ConfigError::UnknownFormat {
            path: display.clone(),
        })?;

    let source = fs::read_to_string(path).map_err(|err| ConfigError::Read {
        path: display.clone(),
        message: err.to_string(),
    })?;
    if source.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::TooLarge {
            path: display,
        });
    }

    parse_machine_config(&source, format)
}
