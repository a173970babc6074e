//! Execution context lifecycle.
//!
//! [`EngineAdapter`] turns configuration into a ready-to-call
//! [`ExecutionContext`]. A context is built for one message, used for one
//! or more invocations and then released. Release is tied to the context
//! value itself, so it only ever happens for contexts that finished
//! initializing, and it happens exactly once.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use wasmtime::{Instance, Linker, Store};
use wasmtime_wasi::preview1;

use crate::instance::call_bytes;
use crate::store::{build_wasi, calculate_fuel_consumed, create_store, get_remaining_fuel};
use crate::{CompiledModule, HostState, ImportProvider, ImportSet, WasmEngine};
use image_recognition_common::{
    AcceleratorConfig, EngineConfig, EngineError, NodeConfig, WasiConfig,
};

/// Counters over the lifetime of an [`EngineAdapter`].
#[derive(Debug, Default)]
pub struct LifecycleStats {
    initialized: AtomicU64,
    failed: AtomicU64,
    released: AtomicU64,
}

impl LifecycleStats {
    /// Contexts that finished initializing.
    pub fn initialized(&self) -> u64 {
        self.initialized.load(Ordering::Acquire)
    }

    /// Initialization attempts that failed.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Acquire)
    }

    /// Contexts that have been released.
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Acquire)
    }

    /// Contexts currently alive.
    pub fn live(&self) -> u64 {
        self.initialized().saturating_sub(self.released())
    }
}

/// Builds execution contexts.
///
/// The adapter holds only configuration and the import provider; every
/// call to [`initialize`](Self::initialize) pays the full cost of engine
/// setup, compilation and instantiation, so no state crosses messages.
pub struct EngineAdapter {
    config: EngineConfig,
    wasi: WasiConfig,
    accelerator: AcceleratorConfig,
    imports: Arc<dyn ImportProvider>,
    stats: Arc<LifecycleStats>,
}

impl EngineAdapter {
    /// Create an adapter from its individual settings.
    pub fn new(
        config: EngineConfig,
        wasi: WasiConfig,
        accelerator: AcceleratorConfig,
        imports: Arc<dyn ImportProvider>,
    ) -> Self {
        Self {
            config,
            wasi,
            accelerator,
            imports,
            stats: Arc::new(LifecycleStats::default()),
        }
    }

    /// Create an adapter from the node configuration.
    pub fn from_node_config(config: &NodeConfig, imports: Arc<dyn ImportProvider>) -> Self {
        Self::new(
            config.engine.clone(),
            config.wasi.clone(),
            config.accelerator,
            imports,
        )
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get the lifecycle counters.
    pub fn stats(&self) -> &LifecycleStats {
        &self.stats
    }

    /// Build a new execution context.
    ///
    /// Steps, each mapped to its [`InitStage`] on failure: engine
    /// configuration, WASI environment, import registration, module load,
    /// validation, instantiation. Nothing is retried.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's [`EngineError`].
    ///
    /// [`InitStage`]: image_recognition_common::InitStage
    #[instrument(skip(self), fields(module = %self.config.module_path.display()))]
    pub fn initialize(&self) -> Result<ExecutionContext, EngineError> {
        let start = Instant::now();
        let context_id = Uuid::new_v4().to_string();

        match self.build(context_id) {
            Ok(context) => {
                self.stats.initialized.fetch_add(1, Ordering::AcqRel);
                debug!(
                    context_id = %context.id(),
                    duration_ms = start.elapsed().as_millis(),
                    "Execution context initialized"
                );
                Ok(context)
            }
            Err(e) => {
                self.stats.failed.fetch_add(1, Ordering::AcqRel);
                warn!(stage = ?e.stage(), error = %e, "Execution context initialization failed");
                Err(e)
            }
        }
    }

    fn build(&self, context_id: String) -> Result<ExecutionContext, EngineError> {
        let engine = WasmEngine::new(&self.config)?;

        let wasi = build_wasi(&self.wasi)?;

        let mut linker: Linker<HostState> = Linker::new(engine.inner());
        preview1::add_to_linker_sync(&mut linker, HostState::wasi_mut).map_err(|e| {
            EngineError::import_registration("wasi_snapshot_preview1", e.to_string())
        })?;

        // Released on every early return below
        let imports = ImportSet::new(self.imports.tables(&self.accelerator));
        imports.register_all(&mut linker)?;

        let module = CompiledModule::from_file(engine.inner(), &self.config.module_path)?;

        let mut store = create_store(&engine, &self.config, wasi, context_id)?;

        let instance = linker
            .instantiate(&mut store, module.inner())
            .map_err(|e| EngineError::instantiation(format!("{e:#}")))?;

        Ok(ExecutionContext {
            imports,
            instance,
            store,
            module,
            engine,
            entry_point: self.config.entry_point.clone(),
            stats: Arc::clone(&self.stats),
        })
    }
}

impl std::fmt::Debug for EngineAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineAdapter")
            .field("module_path", &self.config.module_path)
            .field("entry_point", &self.config.entry_point)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

/// One instantiated module bound to its host import tables.
///
/// Fields drop in declaration order: import tables first, then the
/// instance and store, then the engine the store was created from.
pub struct ExecutionContext {
    imports: ImportSet,
    instance: Instance,
    store: Store<HostState>,
    module: CompiledModule,
    engine: WasmEngine,
    entry_point: String,
    stats: Arc<LifecycleStats>,
}

impl ExecutionContext {
    /// Unique identifier of this context.
    pub fn id(&self) -> &str {
        &self.store.data().context_id
    }

    /// Run the entry point on `payload` and return its output bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the export is missing, the guest traps, fuel runs
    /// out or guest memory is accessed out of bounds. The context stays
    /// usable and is still released normally.
    #[instrument(skip(self, payload), fields(context_id = %self.id(), payload_len = payload.len()))]
    pub fn invoke(&mut self, payload: &[u8]) -> Result<Vec<u8>, EngineError> {
        let start = Instant::now();
        let initial_fuel = get_remaining_fuel(&self.store).unwrap_or(0);

        let result = call_bytes(&mut self.store, &self.instance, &self.entry_point, payload);

        let fuel_consumed = if self.engine.is_fuel_metered() {
            calculate_fuel_consumed(initial_fuel, &self.store)
        } else {
            0
        };
        let duration = start.elapsed();
        self.store.data_mut().record_invocation(fuel_consumed, duration);

        match &result {
            Ok(output) => info!(
                entry_point = %self.entry_point,
                output_len = output.len(),
                duration_ms = duration.as_millis(),
                fuel_consumed = fuel_consumed,
                "Invocation completed"
            ),
            Err(e) => warn!(
                entry_point = %self.entry_point,
                duration_ms = duration.as_millis(),
                error = %e,
                "Invocation failed"
            ),
        }

        result
    }

    /// Release the context.
    ///
    /// Equivalent to dropping it; spelled out for call sites that want the
    /// end of the context to be visible.
    pub fn release(self) {
        drop(self);
    }

    /// Namespaces of the registered import tables.
    pub fn import_modules(&self) -> Vec<&str> {
        self.imports.module_names()
    }

    /// The module this context was instantiated from.
    pub fn module(&self) -> &CompiledModule {
        &self.module
    }

    /// Store data of this context.
    pub fn host_state(&self) -> &HostState {
        self.store.data()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.stats.released.fetch_add(1, Ordering::AcqRel);
        debug!(
            context_id = %self.store.data().context_id,
            invocations = self.store.data().metrics.invocations,
            lifetime_ms = self.store.data().elapsed().as_millis(),
            "Execution context released"
        );
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("context_id", &self.store.data().context_id)
            .field("entry_point", &self.entry_point)
            .field("imports", &self.imports)
            .finish_non_exhaustive()
    }
}
