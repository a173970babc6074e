//! WebAssembly module loading and validation.
//!
//! [`CompiledModule`] wraps a Wasmtime [`Module`] that went through the
//! three steps an execution context needs before instantiation:
//!
//! 1. **Load**: read the module bytes from disk
//! 2. **Validate**: check the header and the module structure
//! 3. **Compile**: produce machine code for the engine

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, instrument};
use wasmtime::{Engine, Module};

use image_recognition_common::EngineError;

/// A validated and compiled WebAssembly module.
#[derive(Clone)]
pub struct CompiledModule {
    /// The compiled Wasmtime module.
    inner: Module,

    /// Where the module came from.
    origin: PathBuf,

    /// Hash of the original Wasm bytes.
    content_hash: String,
}

impl CompiledModule {
    /// Load, validate and compile a module file.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ModuleLoad`] if the file cannot be read and
    /// [`EngineError::Validation`] if it is not a valid module.
    #[instrument(skip(engine, path), fields(path = %path.as_ref().display()))]
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| EngineError::ModuleLoad {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::from_bytes(engine, &bytes, path)
    }

    /// Validate and compile a module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if the header, the structure or
    /// compilation is rejected.
    pub fn from_bytes(
        engine: &Engine,
        bytes: &[u8],
        origin: impl Into<PathBuf>,
    ) -> Result<Self, EngineError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        Module::validate(engine, bytes)
            .map_err(|e| EngineError::validation(format!("Invalid module structure: {e}")))?;

        let module = Module::from_binary(engine, bytes)
            .map_err(|e| EngineError::validation(format!("Module compilation failed: {e}")))?;

        let content_hash = compute_hash(bytes);
        let origin = origin.into();

        debug!(
            origin = %origin.display(),
            content_hash = %content_hash,
            bytes_len = bytes.len(),
            duration_ms = start.elapsed().as_millis(),
            "Module validated and compiled"
        );

        Ok(Self {
            inner: module,
            origin,
            content_hash,
        })
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for testing purposes.
    ///
    /// # Errors
    ///
    /// Returns an error if the text does not compile.
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, EngineError> {
        let module = Module::new(engine, wat)
            .map_err(|e| EngineError::validation(format!("WAT compilation failed: {e}")))?;

        Ok(Self {
            inner: module,
            origin: PathBuf::from("<wat>"),
            content_hash: compute_hash(wat.as_bytes()),
        })
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    /// Get where the module was loaded from.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Check whether the module exports a function with the given name.
    pub fn exports_function(&self, name: &str) -> bool {
        let export = self.inner.get_export(name);
        export.is_some_and(|ty| ty.func().is_some())
    }

    /// Validate WebAssembly header (magic number).
    fn validate_wasm_header(bytes: &[u8]) -> Result<(), EngineError> {
        if bytes.len() < 8 {
            return Err(EngineError::validation("Invalid Wasm: file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(EngineError::validation("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("origin", &self.origin)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
