//! Per-context store data and store creation.
//!
//! This module provides:
//! - [`HostState`]: State reachable from host functions through the store
//! - [`ExecutionMetrics`]: Performance metrics of the last invocation
//! - [`build_wasi`]: WASI preview 1 context from [`WasiConfig`]

use std::time::{Duration, Instant};

use tracing::debug;
use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::preview1::WasiP1Ctx;
use wasmtime_wasi::{DirPerms, FilePerms, WasiCtxBuilder};

use crate::WasmEngine;
use image_recognition_common::{EngineConfig, EngineError, WasiConfig};

/// Per-context store data.
///
/// One `HostState` lives inside the [`Store`] of each execution context and
/// is dropped together with it. Host functions reach it through
/// [`wasmtime::Caller::data`].
pub struct HostState {
    /// WASI preview 1 context.
    wasi: WasiP1Ctx,

    /// Memory and table limits for the guest.
    limits: StoreLimits,

    /// Unique context identifier for tracing.
    pub context_id: String,

    /// Metrics of the last invocation.
    pub metrics: ExecutionMetrics,

    /// Context creation time.
    created_at: Instant,
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed by the last invocation.
    pub fuel_consumed: u64,

    /// Duration of the last invocation.
    pub duration: Option<Duration>,

    /// Number of completed invocations.
    pub invocations: u32,
}

impl HostState {
    /// Create store data around a prepared WASI context.
    pub fn new(wasi: WasiP1Ctx, max_memory_bytes: usize, context_id: String) -> Self {
        let limits = StoreLimitsBuilder::new()
            .memory_size(max_memory_bytes)
            .build();

        Self {
            wasi,
            limits,
            context_id,
            metrics: ExecutionMetrics::default(),
            created_at: Instant::now(),
        }
    }

    /// Get the WASI context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Get elapsed time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Record the outcome of one invocation.
    pub fn record_invocation(&mut self, fuel_consumed: u64, duration: Duration) {
        self.metrics.fuel_consumed = fuel_consumed;
        self.metrics.duration = Some(duration);
        self.metrics.invocations += 1;
    }
}

/// Build a WASI preview 1 context.
///
/// Arguments are passed through as given, the host environment is inherited
/// when configured, and each `host:guest` directory mapping is preopened
/// with full permissions.
///
/// # Errors
///
/// Returns [`EngineError::Environment`] for malformed mappings or
/// directories that cannot be opened.
pub fn build_wasi(config: &WasiConfig) -> Result<WasiP1Ctx, EngineError> {
    let mut builder = WasiCtxBuilder::new();

    builder.args(config.args.as_slice());

    if config.inherit_env {
        builder.inherit_env();
    }

    if config.inherit_stdio {
        builder.inherit_stdout().inherit_stderr();
    }

    for mapping in &config.dirs {
        let (host, guest) = WasiConfig::parse_dir_mapping(mapping).ok_or_else(|| {
            EngineError::environment(format!("Malformed directory mapping '{mapping}'"))
        })?;

        builder
            .preopened_dir(host, guest, DirPerms::all(), FilePerms::all())
            .map_err(|e| {
                EngineError::environment(format!("Failed to preopen '{host}' as '{guest}': {e}"))
            })?;

        debug!(host = %host, guest = %guest, "Directory preopened");
    }

    Ok(builder.build_p1())
}

/// Create a new Wasmtime store for one execution context.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &EngineConfig,
    wasi: WasiP1Ctx,
    context_id: String,
) -> Result<Store<HostState>, EngineError> {
    let state = HostState::new(wasi, config.max_memory_bytes(), context_id);
    let mut store = Store::new(engine.inner(), state);

    store.limiter(|state| &mut state.limits);

    // Set fuel limit if metering is enabled
    if engine.is_fuel_metered() {
        store
            .set_fuel(config.max_fuel)
            .map_err(|e| EngineError::configuration(format!("Failed to set fuel: {e}")))?;
    }

    Ok(store)
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<HostState>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<HostState>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet_wasi() -> WasiConfig {
        WasiConfig {
            inherit_env: false,
            inherit_stdio: false,
            dirs: Vec::new(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_wasi_default_mapping() {
        let config = WasiConfig {
            args: vec!["--top".into(), "1".into()],
            ..Default::default()
        };
        assert!(build_wasi(&config).is_ok());
    }

    #[test]
    fn test_build_wasi_missing_directory() {
        let config = WasiConfig {
            dirs: vec!["/definitely/not/a/dir:/data".into()],
            ..quiet_wasi()
        };

        let result = build_wasi(&config);
        assert!(matches!(result, Err(EngineError::Environment { .. })));
    }

    #[test]
    fn test_build_wasi_malformed_mapping() {
        let config = WasiConfig {
            dirs: vec![":/data".into()],
            ..quiet_wasi()
        };

        let result = build_wasi(&config);
        assert!(matches!(result, Err(EngineError::Environment { .. })));
    }

    #[test]
    fn test_store_creation() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let wasi = build_wasi(&quiet_wasi()).unwrap();

        let store = create_store(&engine, &EngineConfig::default(), wasi, "ctx-1".into()).unwrap();
        assert_eq!(store.data().context_id, "ctx-1");
        assert_eq!(store.data().metrics.invocations, 0);
    }

    #[test]
    fn test_store_fuel() {
        let config = EngineConfig {
            fuel_metering: true,
            max_fuel: 1000,
            ..Default::default()
        };
        let engine = WasmEngine::new(&config).unwrap();
        let wasi = build_wasi(&quiet_wasi()).unwrap();

        let store = create_store(&engine, &config, wasi, "ctx-fuel".into()).unwrap();
        assert_eq!(get_remaining_fuel(&store), Some(1000));
        assert_eq!(calculate_fuel_consumed(1000, &store), 0);
    }

    #[test]
    fn test_record_invocation() {
        let wasi = build_wasi(&quiet_wasi()).unwrap();
        let mut state = HostState::new(wasi, 1024 * 1024, "ctx".into());

        state.record_invocation(42, Duration::from_millis(3));
        state.record_invocation(7, Duration::from_millis(1));

        assert_eq!(state.metrics.fuel_consumed, 7);
        assert_eq!(state.metrics.invocations, 2);
        assert_eq!(state.metrics.duration, Some(Duration::from_millis(1)));
    }
}
