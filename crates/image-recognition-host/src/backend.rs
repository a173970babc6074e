//! Inference backends.
//!
//! The session tables collect a model, its inputs and the requested
//! outputs, then hand everything to an [`InferenceBackend`] in one call.

use std::fmt;

use image_recognition_common::HostFunctionError;

use crate::tensor::{NamedTensor, OutputSpec};

/// Serialized model format of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFormat {
    /// Frozen TensorFlow graph (`.pb`).
    TensorFlow,
    /// TensorFlow Lite flatbuffer (`.tflite`).
    TensorFlowLite,
}

impl fmt::Display for ModelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFormat::TensorFlow => f.write_str("tensorflow"),
            ModelFormat::TensorFlowLite => f.write_str("tensorflowlite"),
        }
    }
}

/// Everything a backend needs to run one session.
#[derive(Debug)]
pub struct InferenceRequest<'a> {
    pub format: ModelFormat,
    pub model: &'a [u8],
    pub inputs: &'a [NamedTensor],
    /// Requested outputs. Empty means every output of the model.
    pub outputs: &'a [OutputSpec],
}

/// Runs models on behalf of guest sessions.
pub trait InferenceBackend: Send + Sync {
    /// Backend name used in diagnostics.
    fn name(&self) -> &str;

    /// Run a session and return its output tensors.
    fn run(&self, request: &InferenceRequest<'_>) -> Result<Vec<NamedTensor>, HostFunctionError>;
}

/// Backend used when no accelerator is linked in.
///
/// Sessions can still be created and fed, but every run fails with
/// [`HostFunctionError::BackendUnavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableBackend;

impl InferenceBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "unavailable"
    }

    fn run(&self, request: &InferenceRequest<'_>) -> Result<Vec<NamedTensor>, HostFunctionError> {
        Err(HostFunctionError::BackendUnavailable {
            backend: request.format.to_string(),
        })
    }
}
