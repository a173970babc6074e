//! State shared by every handler invocation.

use std::sync::Arc;

use image_recognition_core::EngineAdapter;

use crate::diagnostics::MessageCounter;
use crate::handler::{self, MessageHandler, Reply};

/// Shared node state.
///
/// Cheap to clone; every clone refers to the same adapter and counter.
#[derive(Debug, Clone)]
pub struct NodeState {
    engine: Arc<EngineAdapter>,
    counter: Arc<MessageCounter>,
    ack_status: u8,
}

impl NodeState {
    /// Create state with a fresh message counter.
    pub fn new(engine: Arc<EngineAdapter>, ack_status: u8) -> Self {
        Self {
            engine,
            counter: Arc::new(MessageCounter::new()),
            ack_status,
        }
    }

    /// Get the engine adapter.
    pub fn engine(&self) -> &EngineAdapter {
        &self.engine
    }

    /// Get the message counter.
    pub fn counter(&self) -> &MessageCounter {
        &self.counter
    }

    /// Status byte sent back for every message.
    pub fn ack_status(&self) -> u8 {
        self.ack_status
    }
}

impl MessageHandler for NodeState {
    fn handle(&self, payload: &[u8]) -> Reply {
        handler::handle(self, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image_recognition_common::{AcceleratorConfig, NodeConfig};
    use image_recognition_core::{ImportProvider, ImportTable};

    #[test]
    fn test_clones_share_counter() {
        let imports: Arc<dyn ImportProvider> =
            Arc::new(|_: &AcceleratorConfig| -> Vec<Box<dyn ImportTable>> { Vec::new() });
        let adapter = EngineAdapter::from_node_config(&NodeConfig::default(), imports);
        let state = NodeState::new(Arc::new(adapter), 0x11);
        let clone = state.clone();

        state.counter().next();
        assert_eq!(clone.counter().current(), 1);
        assert_eq!(clone.ack_status(), 0x11);
    }
}
