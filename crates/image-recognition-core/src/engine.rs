//! Wasmtime engine configuration and creation.
//!
//! A [`WasmEngine`] is the configuration object of one execution context.
//! It is built per message and dropped after the context that was created
//! from it, so compilation settings never leak between messages.

use tracing::debug;
use wasmtime::{Config, Engine, OptLevel};

use image_recognition_common::{EngineConfig, EngineError};

/// WebAssembly engine wrapper.
///
/// Wraps a Wasmtime [`Engine`] configured for synchronous execution of
/// core modules with optional fuel metering.
#[derive(Clone)]
pub struct WasmEngine {
    engine: Engine,
    fuel_metering: bool,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if Wasmtime rejects the
    /// configuration.
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let mut wasmtime_config = Config::new();

        // Synchronous execution is the default; host functions block and the
        // handler already runs off the async runtime.
        wasmtime_config.consume_fuel(config.fuel_metering);

        let opt_level = if config.optimize {
            OptLevel::Speed
        } else {
            OptLevel::None
        };
        wasmtime_config.cranelift_opt_level(opt_level);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            EngineError::configuration(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        debug!(
            fuel_metering = config.fuel_metering,
            optimize = config.optimize,
            "Wasmtime engine configured"
        );

        Ok(Self {
            engine,
            fuel_metering: config.fuel_metering,
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Check if fuel metering is enabled.
    pub fn is_fuel_metered(&self) -> bool {
        self.fuel_metering
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("fuel_metering", &self.fuel_metering)
            .finish_non_exhaustive()
    }
}
