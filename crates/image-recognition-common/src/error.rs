//! Error types for image-recognition.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`EngineError`]: Execution context initialization and invocation
//! - [`HostFunctionError`]: Errors from the inference and image host functions
//! - [`StreamError`]: Broker connection and framing errors

use std::fmt;
use std::io;

use thiserror::Error;

/// The step of execution context initialization that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Building the WASI environment (args, env, directory mappings).
    Environment,
    /// Creating the engine configuration object.
    Configuration,
    /// Registering host import tables on the linker.
    ImportRegistration,
    /// Reading the module file from disk.
    ModuleLoad,
    /// Structural validation and compilation of the module.
    Validation,
    /// Instantiating the module against the linker.
    Instantiation,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InitStage::Environment => "environment",
            InitStage::Configuration => "configuration",
            InitStage::ImportRegistration => "import-registration",
            InitStage::ModuleLoad => "module-load",
            InitStage::Validation => "validation",
            InitStage::Instantiation => "instantiation",
        };
        f.write_str(name)
    }
}

/// Errors from the engine adapter.
///
/// Initialization errors carry the [`InitStage`] that failed; they are fatal
/// to the message being processed. Invocation errors are recoverable: the
/// message is still acknowledged.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The WASI environment could not be built.
    #[error("WASI environment setup failed: {reason}")]
    Environment {
        /// Description of the failure.
        reason: String,
    },

    /// The engine configuration was rejected.
    #[error("Engine configuration failed: {reason}")]
    Configuration {
        /// Description of the failure.
        reason: String,
    },

    /// A host import table could not be registered.
    #[error("Failed to register import table '{module}': {reason}")]
    ImportRegistration {
        /// Import module namespace.
        module: String,
        /// Description of the failure.
        reason: String,
    },

    /// The module file could not be read.
    #[error("Failed to load module '{path}': {source}")]
    ModuleLoad {
        /// Path of the module file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The module failed structural validation or compilation.
    #[error("Module validation failed: {reason}")]
    Validation {
        /// Description of the failure.
        reason: String,
    },

    /// The module could not be instantiated.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the failure.
        reason: String,
    },

    /// A required export is missing or has the wrong signature.
    #[error("Missing export '{name}'")]
    MissingExport {
        /// Name of the export.
        name: String,
    },

    /// The guest function trapped or returned an error.
    #[error("Invocation of '{function}' failed: {message}")]
    Invocation {
        /// Name of the called function.
        function: String,
        /// Description of the failure.
        message: String,
    },

    /// Guest memory could not be read or written.
    #[error("Guest memory access failed: {reason}")]
    GuestMemory {
        /// Description of the failure.
        reason: String,
    },

    /// Execution exhausted the configured fuel limit.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,
}

impl EngineError {
    /// Create a new `Environment` error.
    pub fn environment(reason: impl Into<String>) -> Self {
        Self::Environment {
            reason: reason.into(),
        }
    }

    /// Create a new `Configuration` error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a new `ImportRegistration` error.
    pub fn import_registration(module: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ImportRegistration {
            module: module.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Validation` error.
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `Invocation` error.
    pub fn invocation(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            function: function.into(),
            message: message.into(),
        }
    }

    /// Create a new `GuestMemory` error.
    pub fn guest_memory(reason: impl Into<String>) -> Self {
        Self::GuestMemory {
            reason: reason.into(),
        }
    }

    /// The initialization stage this error belongs to, if any.
    pub fn stage(&self) -> Option<InitStage> {
        match self {
            Self::Environment { .. } => Some(InitStage::Environment),
            Self::Configuration { .. } => Some(InitStage::Configuration),
            Self::ImportRegistration { .. } => Some(InitStage::ImportRegistration),
            Self::ModuleLoad { .. } => Some(InitStage::ModuleLoad),
            Self::Validation { .. } => Some(InitStage::Validation),
            Self::Instantiation { .. } => Some(InitStage::Instantiation),
            Self::MissingExport { .. }
            | Self::Invocation { .. }
            | Self::GuestMemory { .. }
            | Self::FuelExhausted => None,
        }
    }

    /// Returns `true` if this error came from context initialization.
    pub fn is_initialization(&self) -> bool {
        self.stage().is_some()
    }
}

/// Errors from host function implementations.
///
/// Host functions never propagate these into the guest as traps; they are
/// logged and mapped to a non-zero status code.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// The guest passed a pointer/length outside its linear memory.
    #[error("Guest memory out of bounds: ptr={ptr} len={len}")]
    OutOfBounds {
        /// Guest pointer.
        ptr: i64,
        /// Requested length.
        len: i64,
    },

    /// The guest module does not export a linear memory.
    #[error("Guest module exports no memory")]
    NoMemory,

    /// The session handle is unknown or already deleted.
    #[error("Unknown session: {handle}")]
    UnknownSession {
        /// Session handle.
        handle: u64,
    },

    /// The tensor handle is unknown.
    #[error("Unknown tensor: {handle}")]
    UnknownTensor {
        /// Tensor handle.
        handle: u64,
    },

    /// No inference backend is available to run the session.
    #[error("Inference backend unavailable: {backend}")]
    BackendUnavailable {
        /// Backend name.
        backend: String,
    },

    /// The inference backend failed.
    #[error("Inference failed: {reason}")]
    Inference {
        /// Description of the failure.
        reason: String,
    },

    /// The image could not be decoded.
    #[error("Image decode failed: {reason}")]
    Decode {
        /// Description of the failure.
        reason: String,
    },

    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },
}

impl HostFunctionError {
    /// Create a new `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Create a new `Inference` error.
    pub fn inference(reason: impl Into<String>) -> Self {
        Self::Inference {
            reason: reason.into(),
        }
    }
}

/// Errors from the broker connection.
#[derive(Error, Debug)]
pub enum StreamError {
    /// The TCP connection to the broker could not be established.
    #[error("Failed to connect to zipper at {addr}: {reason}")]
    Connect {
        /// Broker address.
        addr: String,
        /// Description of the failure.
        reason: String,
    },

    /// The broker rejected or garbled the handshake.
    #[error("Handshake with zipper failed: {reason}")]
    Handshake {
        /// Description of the failure.
        reason: String,
    },

    /// A frame could not be encoded or decoded.
    #[error("Frame error: {reason}")]
    Frame {
        /// Description of the failure.
        reason: String,
    },

    /// The stream function could not be registered.
    #[error("Failed to register stream function: {reason}")]
    Registration {
        /// Description of the failure.
        reason: String,
    },

    /// The connection was closed unexpectedly.
    #[error("Connection to zipper closed")]
    Closed,

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// Create a new `Connect` error.
    pub fn connect(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Connect {
            addr: addr.into(),
            reason: reason.into(),
        }
    }

    /// Create a new `Handshake` error.
    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    /// Create a new `Frame` error.
    pub fn frame(reason: impl Into<String>) -> Self {
        Self::Frame {
            reason: reason.into(),
        }
    }

    /// Create a new `Registration` error.
    pub fn registration(reason: impl Into<String>) -> Self {
        Self::Registration {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the node never got a usable connection.
    pub fn is_startup_failure(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Handshake { .. } | Self::Registration { .. }
        )
    }
}
