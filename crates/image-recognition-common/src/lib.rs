//! Common types, errors, and configuration for image-recognition.
//!
//! This crate provides shared functionality used across the workspace:
//! - Error types using `thiserror` for the engine, host functions and stream
//! - Configuration structures for the node, loadable from TOML

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{AcceleratorConfig, EngineConfig, NodeConfig, WasiConfig, ZipperConfig};
pub use config_file::ConfigFileError;
pub use error::{EngineError, HostFunctionError, InitStage, StreamError};
