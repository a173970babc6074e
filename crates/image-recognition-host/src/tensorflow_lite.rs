//! The `wasmedge_tensorflowlite` import table.
//!
//! TensorFlow Lite sessions take raw input bytes whose shape is fixed by
//! the model, and every output of the model is available after a run.

use std::sync::Arc;

use wasmtime::{Caller, Linker};

use image_recognition_common::{AcceleratorConfig, EngineError};
use image_recognition_core::{HostState, ImportTable};

use crate::backend::{InferenceBackend, ModelFormat};
use crate::memory::{read_bytes, read_string, write_bytes};
use crate::session::SessionHost;
use crate::tensor::{NamedTensor, Tensor};

/// Import module namespace.
pub const MODULE: &str = "wasmedge_tensorflowlite";

/// Host functions for TensorFlow Lite sessions.
#[derive(Debug)]
pub struct TensorflowLiteImports {
    host: SessionHost,
}

impl TensorflowLiteImports {
    /// Create a table with an empty session table.
    pub fn new(backend: Arc<dyn InferenceBackend>, accelerator: AcceleratorConfig) -> Self {
        Self {
            host: SessionHost::new(MODULE, ModelFormat::TensorFlowLite, backend, accelerator),
        }
    }

    /// Shared session state.
    pub fn host(&self) -> &SessionHost {
        &self.host
    }
}

fn registration_error(e: &wasmtime::Error) -> EngineError {
    EngineError::import_registration(MODULE, e.to_string())
}

impl ImportTable for TensorflowLiteImports {
    fn module_name(&self) -> &str {
        MODULE
    }

    fn register(&self, linker: &mut Linker<HostState>) -> Result<(), EngineError> {
        let host = self.host.clone();
        linker
            .func_wrap(
                MODULE,
                "create_session",
                move |mut caller: Caller<'_, HostState>, model_ptr: i32, model_len: i32| -> u64 {
                    host.create_session(read_bytes(&mut caller, model_ptr, model_len))
                },
            )
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(MODULE, "delete_session", move |session: u64| {
                host.delete_session(session);
            })
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(
                MODULE,
                "append_input",
                move |mut caller: Caller<'_, HostState>,
                      session: u64,
                      name_ptr: i32,
                      name_len: i32,
                      tensor_ptr: i32,
                      tensor_len: i32| {
                    let result = read_string(&mut caller, name_ptr, name_len)
                        .and_then(|name| {
                            let data = read_bytes(&mut caller, tensor_ptr, tensor_len)?;
                            Ok(NamedTensor {
                                name,
                                index: 0,
                                tensor: Tensor::raw(data),
                            })
                        })
                        .and_then(|input| host.with_table(|t| t.append_input(session, input)));
                    host.report_result("append_input", result);
                },
            )
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(MODULE, "run_session", move |session: u64| -> u32 {
                host.run_session(session)
            })
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(
                MODULE,
                "get_output_tensor",
                move |mut caller: Caller<'_, HostState>,
                      session: u64,
                      name_ptr: i32,
                      name_len: i32|
                      -> u64 {
                    let name = read_string(&mut caller, name_ptr, name_len);
                    host.output_tensor(session, name, 0)
                },
            )
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(MODULE, "get_tensor_len", move |tensor: u64| -> u32 {
                host.tensor_len(tensor)
            })
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(
                MODULE,
                "get_tensor_data",
                move |mut caller: Caller<'_, HostState>, tensor: u64, buf_ptr: i32| {
                    let result = host
                        .tensor_data(tensor)
                        .and_then(|data| write_bytes(&mut caller, buf_ptr, &data));
                    host.report_result("get_tensor_data", result);
                },
            )
            .map_err(|e| registration_error(&e))?;

        Ok(())
    }

    fn release(&self) {
        self.host.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnavailableBackend;
    use image_recognition_common::EngineConfig;
    use image_recognition_core::WasmEngine;

    #[test]
    fn test_register() {
        let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
        let mut linker = Linker::new(engine.inner());

        let table =
            TensorflowLiteImports::new(Arc::new(UnavailableBackend), AcceleratorConfig::default());
        assert!(table.register(&mut linker).is_ok());
    }

    #[test]
    fn test_release_clears_sessions() {
        let table =
            TensorflowLiteImports::new(Arc::new(UnavailableBackend), AcceleratorConfig::default());
        table.host().create_session(Ok(b"TFL3".to_vec()));
        assert_eq!(table.host().with_table(|t| t.session_count()), 1);

        table.release();
        assert_eq!(table.host().with_table(|t| t.session_count()), 0);
    }
}
