//! Configuration structures for the image-recognition node.
//!
//! This module defines configuration options for each component:
//! - [`NodeConfig`]: Top-level configuration containing all settings
//! - [`ZipperConfig`]: Broker connection and stream function identity
//! - [`EngineConfig`]: Wasmtime settings and the model module location
//! - [`WasiConfig`]: Guest arguments, environment and directory mappings
//! - [`AcceleratorConfig`]: Verbosity of the inference host functions

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level node configuration.
///
/// Every section falls back to its defaults, so an empty TOML file is a
/// valid configuration that reproduces the stock deployment.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NodeConfig {
    /// Broker connection settings.
    #[serde(default)]
    pub zipper: ZipperConfig,

    /// Engine and model settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// WASI capability settings.
    #[serde(default)]
    pub wasi: WasiConfig,

    /// Host function verbosity.
    #[serde(default)]
    pub accelerator: AcceleratorConfig,
}

/// Broker ("Zipper") connection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ZipperConfig {
    /// Broker address in `host:port` form.
    #[serde(default = "defaults::zipper_addr")]
    pub addr: String,

    /// Name this stream function registers under.
    #[serde(default = "defaults::function_name")]
    pub function_name: String,

    /// Data key whose messages this node observes.
    #[serde(default = "defaults::observe_data_key")]
    pub observe_data_key: u8,

    /// Status byte returned to the broker for every handled message.
    #[serde(default = "defaults::ack_status")]
    pub ack_status: u8,

    /// Timeout for establishing the TCP connection and handshake.
    #[serde(default = "defaults::connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Largest frame body accepted from or sent to the broker.
    #[serde(default = "defaults::max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ZipperConfig {
    fn default() -> Self {
        Self {
            addr: defaults::zipper_addr(),
            function_name: defaults::function_name(),
            observe_data_key: defaults::observe_data_key(),
            ack_status: defaults::ack_status(),
            connect_timeout_ms: defaults::connect_timeout_ms(),
            max_frame_bytes: defaults::max_frame_bytes(),
        }
    }
}

impl ZipperConfig {
    /// Get the connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Wasmtime engine and model module configuration.
///
/// A fresh engine is built from these settings for every message, so
/// nothing configured here is shared between two executions.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Path of the precompiled model module, relative to the working directory.
    #[serde(default = "defaults::module_path")]
    pub module_path: PathBuf,

    /// Name of the exported byte-array function to call.
    #[serde(default = "defaults::entry_point")]
    pub entry_point: String,

    /// Compile with Cranelift speed optimizations.
    #[serde(default = "defaults::optimize")]
    pub optimize: bool,

    /// Enable fuel metering.
    ///
    /// When enabled, guest CPU usage is bounded by `max_fuel`.
    #[serde(default)]
    pub fuel_metering: bool,

    /// Maximum fuel (CPU instructions) per execution context.
    ///
    /// The budget is set once when the store is created and shared by every
    /// invocation on that context. Model inference is expensive; a MobileNet
    /// pass can burn billions.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Maximum linear memory per execution context in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_path: defaults::module_path(),
            entry_point: defaults::entry_point(),
            optimize: defaults::optimize(),
            fuel_metering: false,
            max_fuel: defaults::max_fuel(),
            max_memory_mb: defaults::max_memory_mb(),
        }
    }
}

impl EngineConfig {
    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        (self.max_memory_mb as usize) * 1024 * 1024
    }
}

/// WASI preview 1 capability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WasiConfig {
    /// Arguments passed to the guest (argv[1..]).
    #[serde(default)]
    pub args: Vec<String>,

    /// Pass the host process environment through to the guest.
    #[serde(default = "defaults::inherit_env")]
    pub inherit_env: bool,

    /// Let the guest write to the host's stdout and stderr.
    #[serde(default = "defaults::inherit_stdio")]
    pub inherit_stdio: bool,

    /// Directory mappings in `host:guest` form.
    #[serde(default = "defaults::dirs")]
    pub dirs: Vec<String>,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            inherit_env: defaults::inherit_env(),
            inherit_stdio: defaults::inherit_stdio(),
            dirs: defaults::dirs(),
        }
    }
}

impl WasiConfig {
    /// Split a directory mapping into its host and guest halves.
    ///
    /// A mapping without a colon maps the path onto itself. Empty halves
    /// are rejected.
    pub fn parse_dir_mapping(mapping: &str) -> Option<(&str, &str)> {
        let (host, guest) = mapping.split_once(':').unwrap_or((mapping, mapping));
        if host.is_empty() || guest.is_empty() {
            return None;
        }
        Some((host, guest))
    }
}

/// Verbosity of the tensor inference host functions.
///
/// Levels follow the TensorFlow convention: 0 shows everything,
/// 1 hides info, 2 hides warnings, 3 hides errors too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct AcceleratorConfig {
    /// Minimum severity of host function log lines.
    #[serde(default = "defaults::quiet_level")]
    pub min_log_level: u8,

    /// Minimum level of per-call verbose tracing.
    #[serde(default = "defaults::quiet_level")]
    pub min_vlog_level: u8,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            min_log_level: defaults::quiet_level(),
            min_vlog_level: defaults::quiet_level(),
        }
    }
}

impl AcceleratorConfig {
    /// Configuration that lets every host function message through.
    pub const fn verbose() -> Self {
        Self {
            min_log_level: 0,
            min_vlog_level: 0,
        }
    }

    /// Returns `true` if a message of the given severity should be emitted.
    pub fn allows(&self, severity: u8) -> bool {
        severity >= self.min_log_level
    }

    /// Returns `true` if verbose per-call tracing should be emitted.
    pub fn allows_verbose(&self) -> bool {
        self.min_vlog_level < defaults::quiet_level()
    }
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    pub fn zipper_addr() -> String {
        "localhost:9900".to_string()
    }

    pub fn function_name() -> String {
        "image-recognition".to_string()
    }

    pub const fn observe_data_key() -> u8 {
        0x10
    }

    pub const fn ack_status() -> u8 {
        0x11
    }

    pub const fn connect_timeout_ms() -> u64 {
        3000
    }

    pub const fn max_frame_bytes() -> usize {
        16 * 1024 * 1024
    }

    pub fn module_path() -> PathBuf {
        PathBuf::from("rust_mobilenet_food_lib_bg.so")
    }

    pub fn entry_point() -> String {
        "infer".to_string()
    }

    pub const fn optimize() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        10_000_000_000
    }

    pub const fn max_memory_mb() -> u32 {
        512
    }

    pub const fn inherit_env() -> bool {
        true
    }

    pub const fn inherit_stdio() -> bool {
        true
    }

    pub fn dirs() -> Vec<String> {
        vec![".:.".to_string()]
    }

    pub const fn quiet_level() -> u8 {
        3
    }
}
