//! Host functions for image-recognition.
//!
//! This crate provides the import tables a model module links against:
//!
//! - [`tensorflow`]: `wasmedge_tensorflow`, full TensorFlow sessions
//! - [`tensorflow_lite`]: `wasmedge_tensorflowlite`, TensorFlow Lite sessions
//! - [`imaging`]: `wasmedge_image`, JPEG/PNG decoding into model input tensors
//!
//! Tensor inference itself is delegated to an [`InferenceBackend`]. The
//! tables only move bytes between guest memory and the backend and keep
//! track of session and tensor handles.
//!
//! # Status Codes
//!
//! Host functions never trap the guest. Failures are logged (subject to
//! [`AcceleratorConfig`]) and reported as a non-zero status or a zero
//! handle. Functions without a return value only log.
//!
//! [`AcceleratorConfig`]: image_recognition_common::AcceleratorConfig

pub mod backend;
pub mod imaging;
pub mod linker;
pub mod memory;
pub mod session;
pub mod tensor;
pub mod tensorflow;
pub mod tensorflow_lite;

pub use backend::{InferenceBackend, InferenceRequest, ModelFormat, UnavailableBackend};
pub use imaging::ImageImports;
pub use linker::StandardImports;
pub use session::{SessionHost, SessionTable};
pub use tensor::{DataType, NamedTensor, OutputSpec, Tensor};
pub use tensorflow::TensorflowImports;
pub use tensorflow_lite::TensorflowLiteImports;
