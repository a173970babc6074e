//! Per-message processing.
//!
//! Every inbound message gets its own execution context:
//!
//! 1. Initialize a context. On failure the error is logged with its stage
//!    and inference is skipped.
//! 2. Invoke the entry point on the payload and log the decoded result or
//!    the failure.
//! 3. Release the context (only if it was initialized).
//! 4. Fingerprint the payload, bump the message counter and log both.
//!
//! The broker always receives the same acknowledgment status, whatever
//! happened to inference.

use tracing::{error, info, instrument};

use crate::diagnostics::fingerprint;
use crate::state::NodeState;

/// Response to one message: a status byte and optional payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u8,
    pub payload: Option<Vec<u8>>,
}

impl Reply {
    /// Acknowledgment without response bytes.
    pub fn ack(status: u8) -> Self {
        Self {
            status,
            payload: None,
        }
    }
}

/// What happened to inference for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InferenceOutcome {
    /// The guest returned a result, decoded as lossy UTF-8.
    Completed(String),
    /// The guest was invoked but failed.
    Failed(String),
    /// No execution context could be initialized.
    Skipped,
}

/// Diagnostics of one processed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageReport {
    pub sequence: u64,
    pub fingerprint: String,
    pub size: usize,
    pub inference: InferenceOutcome,
}

/// Handles data frames delivered by the broker.
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one payload and produce the reply for the broker.
    fn handle(&self, payload: &[u8]) -> Reply;
}

impl<F> MessageHandler for F
where
    F: Fn(&[u8]) -> Reply + Send + Sync + 'static,
{
    fn handle(&self, payload: &[u8]) -> Reply {
        self(payload)
    }
}

/// Run one message through a fresh execution context.
#[instrument(skip_all, fields(size = payload.len()))]
pub fn process(state: &NodeState, payload: &[u8]) -> MessageReport {
    let inference = match state.engine().initialize() {
        Ok(mut context) => {
            let outcome = match context.invoke(payload) {
                Ok(output) => {
                    let result = String::from_utf8_lossy(&output).into_owned();
                    info!(result = %result, "Inference completed");
                    InferenceOutcome::Completed(result)
                }
                Err(e) => {
                    error!(error = %e, "Inference failed");
                    InferenceOutcome::Failed(e.to_string())
                }
            };
            context.release();
            outcome
        }
        Err(e) => {
            error!(stage = ?e.stage(), error = %e, "Failed to initialize execution context");
            InferenceOutcome::Skipped
        }
    };

    let fingerprint = fingerprint(payload);
    let sequence = state.counter().next();
    info!(
        sequence,
        fingerprint = %fingerprint,
        size = payload.len(),
        "Message processed"
    );

    MessageReport {
        sequence,
        fingerprint,
        size: payload.len(),
        inference,
    }
}

/// Process one message and acknowledge it.
pub fn handle(state: &NodeState, payload: &[u8]) -> Reply {
    process(state, payload);
    Reply::ack(state.ack_status())
}
