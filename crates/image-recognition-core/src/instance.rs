//! Byte-array calling convention for guest exports.
//!
//! Guests built with wasm-bindgen style glue export:
//!
//! - `memory`: the linear memory
//! - `__wbindgen_malloc(size) -> ptr`: allocator used for arguments
//! - `__wbindgen_free(ptr, size)`: optional deallocator
//! - the entry point `fn(ret_ptr, in_ptr, in_len)`, which writes the
//!   `(out_ptr, out_len)` pair of its result as two little-endian `i32`s
//!   into the 8-byte return slot at `ret_ptr`

use tracing::{debug, warn};
use wasmtime::{Instance, Memory, Store, Trap};

use crate::HostState;
use image_recognition_common::EngineError;

/// Allocator export used to pass arguments into the guest.
pub const MALLOC_EXPORT: &str = "__wbindgen_malloc";

/// Deallocator export, used when present.
pub const FREE_EXPORT: &str = "__wbindgen_free";

/// Size of the `(ptr, len)` return slot.
const RETURN_SLOT_LEN: i32 = 8;

/// Call `function` with `input` and return the bytes it produced.
///
/// # Errors
///
/// - [`EngineError::MissingExport`] if the function, `memory` or the
///   allocator is not exported with the expected signature
/// - [`EngineError::Invocation`] if the guest traps
/// - [`EngineError::FuelExhausted`] if fuel runs out
/// - [`EngineError::GuestMemory`] if a pointer falls outside guest memory
pub fn call_bytes(
    store: &mut Store<HostState>,
    instance: &Instance,
    function: &str,
    input: &[u8],
) -> Result<Vec<u8>, EngineError> {
    let func = instance
        .get_typed_func::<(i32, i32, i32), ()>(&mut *store, function)
        .map_err(|_| EngineError::missing_export(function))?;

    let memory = instance
        .get_memory(&mut *store, "memory")
        .ok_or_else(|| EngineError::missing_export("memory"))?;

    let malloc = instance
        .get_typed_func::<i32, i32>(&mut *store, MALLOC_EXPORT)
        .map_err(|_| EngineError::missing_export(MALLOC_EXPORT))?;

    let free = instance
        .get_typed_func::<(i32, i32), ()>(&mut *store, FREE_EXPORT)
        .ok();

    let input_len = i32::try_from(input.len())
        .map_err(|_| EngineError::guest_memory("Input larger than guest address space"))?;

    let ret_ptr = malloc
        .call(&mut *store, RETURN_SLOT_LEN)
        .map_err(|e| call_error(MALLOC_EXPORT, &e))?;
    let in_ptr = malloc
        .call(&mut *store, input_len)
        .map_err(|e| call_error(MALLOC_EXPORT, &e))?;

    write_guest(&memory, store, in_ptr, input)?;

    debug!(function = %function, input_len = input.len(), "Calling guest export");

    func.call(&mut *store, (ret_ptr, in_ptr, input_len))
        .map_err(|e| call_error(function, &e))?;

    let mut slot = [0u8; 8];
    read_guest(&memory, store, ret_ptr, &mut slot)?;
    let out_ptr = i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
    let out_len = i32::from_le_bytes([slot[4], slot[5], slot[6], slot[7]]);

    let len = usize::try_from(out_len).map_err(|_| {
        EngineError::guest_memory(format!("Guest returned negative length {out_len}"))
    })?;

    let mut output = vec![0u8; len];
    read_guest(&memory, store, out_ptr, &mut output)?;

    if let Some(free) = free {
        for (ptr, size) in [(out_ptr, out_len), (ret_ptr, RETURN_SLOT_LEN)] {
            if let Err(e) = free.call(&mut *store, (ptr, size)) {
                warn!(ptr = ptr, size = size, error = %e, "Guest deallocation failed");
            }
        }
    }

    Ok(output)
}

/// Reinterpret a guest `i32` pointer as an offset into linear memory.
#[allow(clippy::cast_sign_loss)]
fn offset(ptr: i32) -> usize {
    ptr as u32 as usize
}

fn write_guest(
    memory: &Memory,
    store: &mut Store<HostState>,
    ptr: i32,
    data: &[u8],
) -> Result<(), EngineError> {
    memory.write(&mut *store, offset(ptr), data).map_err(|e| {
        EngineError::guest_memory(format!("Write of {} bytes at {ptr:#x}: {e}", data.len()))
    })
}

fn read_guest(
    memory: &Memory,
    store: &Store<HostState>,
    ptr: i32,
    buf: &mut [u8],
) -> Result<(), EngineError> {
    let len = buf.len();
    memory
        .read(store, offset(ptr), buf)
        .map_err(|e| EngineError::guest_memory(format!("Read of {len} bytes at {ptr:#x}: {e}")))
}

/// Map a failed guest call to an engine error.
fn call_error(function: &str, error: &wasmtime::Error) -> EngineError {
    if is_out_of_fuel(error) {
        return EngineError::FuelExhausted;
    }

    let (message, code) = extract_trap_info(error);
    match code {
        Some(code) => EngineError::invocation(function, format!("{code}: {message}")),
        None => EngineError::invocation(function, message),
    }
}

/// Extract human-readable trap information.
fn extract_trap_info(error: &wasmtime::Error) -> (String, Option<String>) {
    let message = error.to_string();

    // Try to get the trap code
    let code = error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}"));

    (message, code)
}

/// Check if an error is due to fuel exhaustion.
fn is_out_of_fuel(error: &wasmtime::Error) -> bool {
    error
        .downcast_ref::<Trap>()
        .is_some_and(|trap| *trap == Trap::OutOfFuel)
}
