//! Session and tensor handles.
//!
//! Guests refer to sessions and output tensors by opaque `u64` handles.
//! [`SessionTable`] owns the objects behind those handles for one import
//! table of one execution context; [`SessionHost`] wraps it with the
//! backend and the diagnostics settings so host function closures stay
//! small.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use image_recognition_common::{AcceleratorConfig, HostFunctionError};

use crate::backend::{InferenceBackend, InferenceRequest, ModelFormat};
use crate::tensor::{NamedTensor, OutputSpec, Tensor};

/// Status returned to the guest on success.
pub const STATUS_OK: u32 = 0;

/// Status returned to the guest on failure.
pub const STATUS_FAILED: u32 = 1;

/// Handle value the guest receives when creation fails.
pub const INVALID_HANDLE: u64 = 0;

/// Severity of informational host messages.
pub(crate) const SEVERITY_INFO: u8 = 0;

/// Severity of failed host calls.
pub(crate) const SEVERITY_ERROR: u8 = 2;

#[derive(Debug)]
struct Session {
    format: ModelFormat,
    model: Vec<u8>,
    inputs: Vec<NamedTensor>,
    outputs: Vec<OutputSpec>,
    results: Vec<NamedTensor>,
}

/// Sessions and output tensors of one import table.
#[derive(Debug, Default)]
pub struct SessionTable {
    last_handle: u64,
    sessions: HashMap<u64, Session>,
    tensors: HashMap<u64, Tensor>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_handle(&mut self) -> u64 {
        // Handles start at 1, leaving 0 for failures
        self.last_handle += 1;
        self.last_handle
    }

    fn session_mut(&mut self, handle: u64) -> Result<&mut Session, HostFunctionError> {
        self.sessions
            .get_mut(&handle)
            .ok_or(HostFunctionError::UnknownSession { handle })
    }

    /// Create a session around a serialized model.
    pub fn create(&mut self, format: ModelFormat, model: Vec<u8>) -> u64 {
        let handle = self.next_handle();
        self.sessions.insert(
            handle,
            Session {
                format,
                model,
                inputs: Vec::new(),
                outputs: Vec::new(),
                results: Vec::new(),
            },
        );
        handle
    }

    /// Delete a session. Returns `false` if the handle was unknown.
    pub fn delete(&mut self, handle: u64) -> bool {
        self.sessions.remove(&handle).is_some()
    }

    /// Add an input tensor to a session.
    pub fn append_input(
        &mut self,
        handle: u64,
        input: NamedTensor,
    ) -> Result<(), HostFunctionError> {
        self.session_mut(handle)?.inputs.push(input);
        Ok(())
    }

    /// Request an output from a session.
    pub fn append_output(
        &mut self,
        handle: u64,
        output: OutputSpec,
    ) -> Result<(), HostFunctionError> {
        self.session_mut(handle)?.outputs.push(output);
        Ok(())
    }

    /// Drop every input of a session.
    pub fn clear_inputs(&mut self, handle: u64) -> Result<(), HostFunctionError> {
        self.session_mut(handle)?.inputs.clear();
        Ok(())
    }

    /// Drop every requested output of a session.
    pub fn clear_outputs(&mut self, handle: u64) -> Result<(), HostFunctionError> {
        self.session_mut(handle)?.outputs.clear();
        Ok(())
    }

    /// Run a session on `backend`, replacing its previous results.
    ///
    /// Returns the number of output tensors produced.
    pub fn run(
        &mut self,
        handle: u64,
        backend: &dyn InferenceBackend,
    ) -> Result<usize, HostFunctionError> {
        let session = self.session_mut(handle)?;
        let request = InferenceRequest {
            format: session.format,
            model: &session.model,
            inputs: &session.inputs,
            outputs: &session.outputs,
        };

        let results = backend.run(&request)?;
        session.results = results;
        Ok(session.results.len())
    }

    /// Look up a result of the last run and return a tensor handle for it.
    pub fn output_tensor(
        &mut self,
        handle: u64,
        name: &str,
        index: u32,
    ) -> Result<u64, HostFunctionError> {
        let tensor = self
            .session_mut(handle)?
            .results
            .iter()
            .find(|result| result.name == name && result.index == index)
            .map(|result| result.tensor.clone())
            .ok_or_else(|| {
                HostFunctionError::invalid_argument(format!(
                    "Session {handle} has no output '{name}:{index}'"
                ))
            })?;

        let tensor_handle = self.next_handle();
        self.tensors.insert(tensor_handle, tensor);
        Ok(tensor_handle)
    }

    /// Get an output tensor by handle.
    pub fn tensor(&self, handle: u64) -> Result<&Tensor, HostFunctionError> {
        self.tensors
            .get(&handle)
            .ok_or(HostFunctionError::UnknownTensor { handle })
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of live output tensors.
    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }

    /// Drop every session and tensor.
    pub fn clear(&mut self) {
        self.sessions.clear();
        self.tensors.clear();
    }
}

/// Shared state behind the host functions of one session-based table.
#[derive(Clone)]
pub struct SessionHost {
    module: &'static str,
    format: ModelFormat,
    table: Arc<Mutex<SessionTable>>,
    backend: Arc<dyn InferenceBackend>,
    accelerator: AcceleratorConfig,
}

impl SessionHost {
    /// Create state for the `module` namespace.
    pub fn new(
        module: &'static str,
        format: ModelFormat,
        backend: Arc<dyn InferenceBackend>,
        accelerator: AcceleratorConfig,
    ) -> Self {
        Self {
            module,
            format,
            table: Arc::new(Mutex::new(SessionTable::new())),
            backend,
            accelerator,
        }
    }

    /// Import module namespace.
    pub fn module(&self) -> &'static str {
        self.module
    }

    /// Run `f` with the session table locked.
    pub fn with_table<R>(&self, f: impl FnOnce(&mut SessionTable) -> R) -> R {
        f(&mut *self.table.lock())
    }

    /// Create a session, returning [`INVALID_HANDLE`] if the model could not
    /// be read.
    pub fn create_session(&self, model: Result<Vec<u8>, HostFunctionError>) -> u64 {
        match model {
            Ok(model) => {
                let model_len = model.len();
                let handle = self.with_table(|t| t.create(self.format, model));
                self.trace("create_session", handle);
                if self.accelerator.allows(SEVERITY_INFO) {
                    info!(
                        module = self.module,
                        session = handle,
                        model_len,
                        "Session created"
                    );
                }
                handle
            }
            Err(e) => {
                self.report("create_session", &e);
                INVALID_HANDLE
            }
        }
    }

    /// Delete a session.
    pub fn delete_session(&self, handle: u64) {
        self.trace("delete_session", handle);
        if !self.with_table(|t| t.delete(handle)) {
            self.report(
                "delete_session",
                &HostFunctionError::UnknownSession { handle },
            );
        }
    }

    /// Run a session on the backend.
    pub fn run_session(&self, handle: u64) -> u32 {
        self.trace("run_session", handle);
        let result = self.with_table(|t| t.run(handle, self.backend.as_ref()));
        match result {
            Ok(outputs) => {
                if self.accelerator.allows(SEVERITY_INFO) {
                    info!(
                        module = self.module,
                        session = handle,
                        backend = self.backend.name(),
                        outputs,
                        "Session run completed"
                    );
                }
                STATUS_OK
            }
            Err(e) => {
                self.report("run_session", &e);
                STATUS_FAILED
            }
        }
    }

    /// Resolve an output tensor handle, returning [`INVALID_HANDLE`] on
    /// failure.
    pub fn output_tensor(
        &self,
        handle: u64,
        name: Result<String, HostFunctionError>,
        index: u32,
    ) -> u64 {
        self.trace("get_output_tensor", handle);
        let result =
            name.and_then(|name| self.with_table(|t| t.output_tensor(handle, &name, index)));
        self.handle_or_invalid("get_output_tensor", result)
    }

    /// Byte length of an output tensor, `0` if unknown.
    pub fn tensor_len(&self, tensor: u64) -> u32 {
        self.trace("get_tensor_len", tensor);
        let result = self.with_table(|t| {
            t.tensor(tensor).and_then(|tensor| {
                u32::try_from(tensor.byte_len()).map_err(|_| {
                    HostFunctionError::invalid_argument("Tensor larger than guest address space")
                })
            })
        });
        match result {
            Ok(len) => len,
            Err(e) => {
                self.report("get_tensor_len", &e);
                0
            }
        }
    }

    /// Bytes of an output tensor.
    pub fn tensor_data(&self, tensor: u64) -> Result<Vec<u8>, HostFunctionError> {
        self.trace("get_tensor_data", tensor);
        self.with_table(|t| t.tensor(tensor).map(|tensor| tensor.data.clone()))
    }

    /// Log the failure of a host call that has no status to return.
    pub fn report_result(&self, function: &str, result: Result<(), HostFunctionError>) {
        if let Err(e) = result {
            self.report(function, &e);
        }
    }

    fn handle_or_invalid(&self, function: &str, result: Result<u64, HostFunctionError>) -> u64 {
        match result {
            Ok(handle) => handle,
            Err(e) => {
                self.report(function, &e);
                INVALID_HANDLE
            }
        }
    }

    /// Log a failed host call.
    pub fn report(&self, function: &str, error: &HostFunctionError) {
        if self.accelerator.allows(SEVERITY_ERROR) {
            warn!(module = self.module, function, error = %error, "Host function failed");
        }
    }

    fn trace(&self, function: &str, handle: u64) {
        if self.accelerator.allows_verbose() {
            debug!(
                module = self.module,
                function,
                handle,
                "Host function called"
            );
        }
    }

    /// Drop every session and tensor.
    pub fn release(&self) {
        let mut table = self.table.lock();
        let sessions = table.session_count();
        let tensors = table.tensor_count();
        table.clear();
        if self.accelerator.allows(SEVERITY_INFO) && sessions + tensors > 0 {
            info!(
                module = self.module,
                sessions,
                tensors,
                "Session table cleared"
            );
        }
    }
}

impl std::fmt::Debug for SessionHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHost")
            .field("module", &self.module)
            .field("format", &self.format)
            .field("backend", &self.backend.name())
            .field("accelerator", &self.accelerator)
            .finish_non_exhaustive()
    }
}
