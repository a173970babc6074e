//! The `wasmedge_tensorflow` import table.
//!
//! Full TensorFlow sessions: inputs carry an explicit shape and data type,
//! outputs must be requested by operation name and index before the run.

use std::sync::Arc;

use wasmtime::{Caller, Linker};

use image_recognition_common::{AcceleratorConfig, EngineError, HostFunctionError};
use image_recognition_core::{HostState, ImportTable};

use crate::backend::{InferenceBackend, ModelFormat};
use crate::memory::{read_bytes, read_string, write_bytes};
use crate::session::SessionHost;
use crate::tensor::{DataType, NamedTensor, OutputSpec, Tensor, decode_dims};

/// Import module namespace.
pub const MODULE: &str = "wasmedge_tensorflow";

/// Host functions for TensorFlow sessions.
#[derive(Debug)]
pub struct TensorflowImports {
    host: SessionHost,
}

impl TensorflowImports {
    /// Create a table with an empty session table.
    pub fn new(backend: Arc<dyn InferenceBackend>, accelerator: AcceleratorConfig) -> Self {
        Self {
            host: SessionHost::new(MODULE, ModelFormat::TensorFlow, backend, accelerator),
        }
    }

    /// Shared session state.
    pub fn host(&self) -> &SessionHost {
        &self.host
    }
}

/// Arguments of `append_input`, read from guest memory.
#[allow(clippy::too_many_arguments)]
fn read_input(
    caller: &mut Caller<'_, HostState>,
    name_ptr: i32,
    name_len: i32,
    index: u32,
    dim_ptr: i32,
    dim_count: u32,
    data_type: u32,
    tensor_ptr: i32,
    tensor_len: i32,
) -> Result<NamedTensor, HostFunctionError> {
    let name = read_string(caller, name_ptr, name_len)?;
    let dims_len = dim_count
        .checked_mul(8)
        .and_then(|n| i32::try_from(n).ok())
        .ok_or_else(|| HostFunctionError::invalid_argument("Too many dimensions"))?;
    let dims = decode_dims(&read_bytes(caller, dim_ptr, dims_len)?)?;
    let dtype = DataType::from_code(data_type)?;
    let data = read_bytes(caller, tensor_ptr, tensor_len)?;

    Ok(NamedTensor {
        name,
        index,
        tensor: Tensor::new(dtype, dims, data)?,
    })
}

fn registration_error(e: &wasmtime::Error) -> EngineError {
    EngineError::import_registration(MODULE, e.to_string())
}

impl ImportTable for TensorflowImports {
    fn module_name(&self) -> &str {
        MODULE
    }

    #[allow(clippy::too_many_lines)]
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
                      index: u32,
                      dim_ptr: i32,
                      dim_count: u32,
                      data_type: u32,
                      tensor_ptr: i32,
                      tensor_len: i32| {
                    let result = read_input(
                        &mut caller,
                        name_ptr,
                        name_len,
                        index,
                        dim_ptr,
                        dim_count,
                        data_type,
                        tensor_ptr,
                        tensor_len,
                    )
                    .and_then(|input| host.with_table(|t| t.append_input(session, input)));
                    host.report_result("append_input", result);
                },
            )
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(
                MODULE,
                "append_output",
                move |mut caller: Caller<'_, HostState>,
                      session: u64,
                      name_ptr: i32,
                      name_len: i32,
                      index: u32| {
                    let result = read_string(&mut caller, name_ptr, name_len).and_then(|name| {
                        host.with_table(|t| t.append_output(session, OutputSpec { name, index }))
                    });
                    host.report_result("append_output", result);
                },
            )
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(MODULE, "clear_input", move |session: u64| {
                let result = host.with_table(|t| t.clear_inputs(session));
                host.report_result("clear_input", result);
            })
            .map_err(|e| registration_error(&e))?;

        let host = self.host.clone();
        linker
            .func_wrap(MODULE, "clear_output", move |session: u64| {
                let result = host.with_table(|t| t.clear_outputs(session));
                host.report_result("clear_output", result);
            })
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
                      name_len: i32,
                      index: u32|
                      -> u64 {
                    let name = read_string(&mut caller, name_ptr, name_len);
                    host.output_tensor(session, name, index)
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
