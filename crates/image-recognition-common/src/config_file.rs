//! Loading [`NodeConfig`] from TOML files.
//!
//! # Example
//!
//! ```toml
//! [zipper]
//! addr = "localhost:9900"
//! function_name = "image-recognition"
//! observe_data_key = 0x10
//!
//! [engine]
//! module_path = "./rust_mobilenet_food_lib_bg.so"
//! entry_point = "infer"
//!
//! [wasi]
//! dirs = [".:."]
//!
//! [accelerator]
//! min_log_level = 3
//! ```

use std::path::Path;

use tracing::debug;

use crate::NodeConfig;

impl NodeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string cannot be parsed as TOML.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        toml::from_str(content).map_err(|e| ConfigFileError::Parse {
            message: e.to_string(),
        })
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}
