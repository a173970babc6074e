//! Guest linear memory access for host functions.
//!
//! Host functions receive `(ptr, len)` pairs from the guest. Every access
//! goes through these helpers, which reject negative values and ranges
//! that fall outside the guest's `memory` export.

use wasmtime::{Caller, Extern, Memory};

use image_recognition_common::HostFunctionError;
use image_recognition_core::HostState;

/// Resolve the guest's `memory` export.
///
/// # Errors
///
/// Returns [`HostFunctionError::NoMemory`] if the guest exports none.
pub fn guest_memory(caller: &mut Caller<'_, HostState>) -> Result<Memory, HostFunctionError> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or(HostFunctionError::NoMemory)
}

/// Validate a guest `(ptr, len)` pair against a memory of `size` bytes.
///
/// Returns the byte range on success.
#[allow(clippy::cast_sign_loss)]
pub fn checked_range(
    ptr: i32,
    len: usize,
    size: usize,
) -> Result<std::ops::Range<usize>, HostFunctionError> {
    let out_of_bounds = || HostFunctionError::OutOfBounds {
        ptr: i64::from(ptr),
        len: i64::try_from(len).unwrap_or(i64::MAX),
    };

    if ptr < 0 {
        return Err(out_of_bounds());
    }

    let start = ptr as usize;
    let end = start.checked_add(len).ok_or_else(out_of_bounds)?;
    if end > size {
        return Err(out_of_bounds());
    }

    Ok(start..end)
}

/// Convert a guest length argument to `usize`.
///
/// # Errors
///
/// Returns [`HostFunctionError::OutOfBounds`] for negative lengths.
pub fn guest_len(ptr: i32, len: i32) -> Result<usize, HostFunctionError> {
    usize::try_from(len).map_err(|_| HostFunctionError::OutOfBounds {
        ptr: i64::from(ptr),
        len: i64::from(len),
    })
}

/// Copy `len` bytes at `ptr` out of guest memory.
///
/// # Errors
///
/// Returns an error if the guest has no memory or the range is out of
/// bounds.
pub fn read_bytes(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, HostFunctionError> {
    let len = guest_len(ptr, len)?;
    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let range = checked_range(ptr, len, data.len())?;
    Ok(data[range].to_vec())
}

/// Read a UTF-8 string from guest memory.
///
/// # Errors
///
/// Returns [`HostFunctionError::InvalidArgument`] if the bytes are not
/// valid UTF-8, besides the errors of [`read_bytes`].
pub fn read_string(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> Result<String, HostFunctionError> {
    let bytes = read_bytes(caller, ptr, len)?;
    String::from_utf8(bytes)
        .map_err(|e| HostFunctionError::invalid_argument(format!("Name is not UTF-8: {e}")))
}

/// Check that `len` bytes at `ptr` fit in guest memory, without touching
/// them.
///
/// # Errors
///
/// Returns an error if the guest has no memory or the range is out of
/// bounds.
pub fn check_writable(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: usize,
) -> Result<(), HostFunctionError> {
    let memory = guest_memory(caller)?;
    checked_range(ptr, len, memory.data_size(&*caller))?;
    Ok(())
}

/// Copy `bytes` into guest memory at `ptr`.
///
/// # Errors
///
/// Returns an error if the guest has no memory or the range is out of
/// bounds.
pub fn write_bytes(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    bytes: &[u8],
) -> Result<(), HostFunctionError> {
    let memory = guest_memory(caller)?;
    let data = memory.data_mut(&mut *caller);
    let range = checked_range(ptr, bytes.len(), data.len())?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_range_in_bounds() {
        assert_eq!(checked_range(0, 4, 16).unwrap(), 0..4);
        assert_eq!(checked_range(12, 4, 16).unwrap(), 12..16);
        assert_eq!(checked_range(16, 0, 16).unwrap(), 16..16);
    }

    #[test]
    fn test_checked_range_past_end() {
        let err = checked_range(13, 4, 16).unwrap_err();
        assert!(matches!(
            err,
            HostFunctionError::OutOfBounds { ptr: 13, len: 4 }
        ));
    }

    #[test]
    fn test_checked_range_negative_pointer() {
        assert!(checked_range(-1, 1, 16).is_err());
    }

    #[test]
    fn test_checked_range_overflow() {
        assert!(checked_range(i32::MAX, usize::MAX, usize::MAX).is_err());
    }

    #[test]
    fn test_guest_len() {
        assert_eq!(guest_len(0, 7).unwrap(), 7);
        assert!(matches!(
            guest_len(8, -2),
            Err(HostFunctionError::OutOfBounds { ptr: 8, len: -2 })
        ));
    }
}
