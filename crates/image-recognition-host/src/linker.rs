//! The standard set of import tables.

use std::sync::Arc;

use image_recognition_common::AcceleratorConfig;
use image_recognition_core::{ImportProvider, ImportTable};

use crate::backend::{InferenceBackend, UnavailableBackend};
use crate::imaging::ImageImports;
use crate::tensorflow::TensorflowImports;
use crate::tensorflow_lite::TensorflowLiteImports;

/// Provides the tables a model module links against, in registration
/// order:
///
/// 1. `wasmedge_tensorflow`
/// 2. `wasmedge_tensorflowlite`
/// 3. `wasmedge_image`
///
/// Every execution context gets fresh tables with empty session tables;
/// only the backend is shared.
#[derive(Clone)]
pub struct StandardImports {
    backend: Arc<dyn InferenceBackend>,
}

impl StandardImports {
    /// Create a provider delegating inference to `backend`.
    pub fn new(backend: Arc<dyn InferenceBackend>) -> Self {
        Self { backend }
    }

    /// Name of the inference backend.
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}

impl Default for StandardImports {
    fn default() -> Self {
        Self::new(Arc::new(UnavailableBackend))
    }
}

impl ImportProvider for StandardImports {
    fn tables(&self, accelerator: &AcceleratorConfig) -> Vec<Box<dyn ImportTable>> {
        vec![
            Box::new(TensorflowImports::new(
                Arc::clone(&self.backend),
                *accelerator,
            )),
            Box::new(TensorflowLiteImports::new(
                Arc::clone(&self.backend),
                *accelerator,
            )),
            Box::new(ImageImports::new(*accelerator)),
        ]
    }
}

impl std::fmt::Debug for StandardImports {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardImports")
            .field("backend", &self.backend.name())
            .finish()
    }
}
