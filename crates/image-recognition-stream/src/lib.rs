//! Stream function node for image-recognition.
//!
//! This crate connects to a Zipper broker, receives image payloads and runs
//! each one through a fresh execution context:
//!
//! - [`frame`]: wire frames and their codec
//! - [`node`]: broker connection, handshake and the serve loop
//! - [`handler`]: per-message initialize / invoke / release
//! - [`diagnostics`]: payload fingerprint and message counter
//! - [`state`]: state shared by every handler invocation
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use image_recognition_stream::{NodeState, StreamFunction};
//!
//! let state = NodeState::new(Arc::new(adapter), 0x11);
//! let mut sfn = StreamFunction::new("image-recognition", "localhost:9900");
//! sfn.observe_data_key(0x10);
//! sfn.set_handler(state)?;
//!
//! let connection = sfn.connect().await?;
//! connection.serve(shutdown_signal()).await?;
//! ```

pub mod diagnostics;
pub mod frame;
pub mod handler;
pub mod node;
pub mod state;

pub use diagnostics::{MessageCounter, fingerprint};
pub use frame::{Frame, FrameCodec, Handshake};
pub use handler::{InferenceOutcome, MessageHandler, MessageReport, Reply, handle, process};
pub use node::{Connection, StreamFunction, shutdown_signal};
pub use state::NodeState;
