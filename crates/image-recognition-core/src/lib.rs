//! Wasmtime engine adapter for image-recognition.
//!
//! This crate owns the lifecycle of one execution context per message:
//! - [`WasmEngine`]: Engine configuration object built from [`EngineConfig`]
//! - [`CompiledModule`]: Module read from disk, validated and compiled
//! - [`HostState`]: Per-context store data (WASI, limits, metrics)
//! - [`ImportTable`] / [`ImportProvider`]: Host function tables linked in
//! - [`EngineAdapter`] / [`ExecutionContext`]: initialize, invoke, release
//!
//! # Lifecycle
//!
//! ```text
//! EngineAdapter::initialize()
//!   ├─ WASI context (args, env, dirs)
//!   ├─ WasmEngine (configuration object)
//!   ├─ import tables registered on the linker
//!   ├─ module loaded, validated, compiled
//!   └─ instance ──────────────► ExecutionContext
//!                                  ├─ invoke(payload) -> bytes
//!                                  └─ drop: import tables, store, engine
//! ```
//!
//! [`EngineConfig`]: image_recognition_common::EngineConfig

pub mod context;
pub mod engine;
pub mod imports;
pub mod instance;
pub mod module;
pub mod store;

pub use context::{EngineAdapter, ExecutionContext, LifecycleStats};
pub use engine::WasmEngine;
pub use imports::{ImportProvider, ImportSet, ImportTable};
pub use instance::call_bytes;
pub use module::CompiledModule;
pub use store::{ExecutionMetrics, HostState};
