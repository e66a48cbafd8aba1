//! Host function registration for Wasmtime linkers.
//!
//! Everything the guest imports lives under the `env` module, plus the
//! WASI preview1 functions:
//!
//! | Import | Signature | Result |
//! |---|---|---|
//! | `log` | `(level, ptr, len)` | none |
//! | `fs_size` | `(path_ptr, path_len) -> i64` | size, or -1 if missing |
//! | `fs_read` | `(path_ptr, path_len, buf_ptr, buf_len) -> i64` | bytes copied, or -1 |
//! | `fs_write` | `(path_ptr, path_len, data_ptr, data_len) -> i32` | 0, or -1 |
//!
//! Pointers outside guest memory trap with
//! [`HostFunctionError::OutOfBounds`]. Filesystem misses are reported as -1.

use std::ops::Range;

use tracing::{debug, warn};
use wasmtime::{Caller, Extern, Linker, Memory};

use crate::logging::{LoggingHost, level_from_i32};
use edge_bundle_archive::{VirtualFs, ensure_directory_chain};
use edge_bundle_common::{HostFunctionError, RuntimeError};
use edge_bundle_core::store::WorkerContext;

/// Register every host import on a core module linker.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_all(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    register_logging(linker)?;
    register_filesystem(linker)?;
    register_wasi(linker)?;
    Ok(())
}

/// Register `env::log(level: i32, ptr: i32, len: i32)`.
///
/// Invalid pointers are logged and ignored rather than trapping.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_logging(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            "env",
            "log",
            |mut caller: Caller<'_, WorkerContext>, level: i32, ptr: i32, len: i32| {
                let message = match read_guest(&mut caller, ptr, len) {
                    Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                    Err(e) => {
                        warn!(error = %e, "Dropping guest log line");
                        return;
                    }
                };

                LoggingHost::log(caller.data_mut(), level_from_i32(level), &message);
            },
        )
        .map_err(|e| registration_failed("log", &e))?;

    Ok(())
}

/// Register `env::fs_size`, `env::fs_read` and `env::fs_write` over the
/// hydrated filesystem.
///
/// # Errors
///
/// Returns an error if function registration fails.
pub fn register_filesystem(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    linker
        .func_wrap(
            "env",
            "fs_size",
            |mut caller: Caller<'_, WorkerContext>,
             path_ptr: i32,
             path_len: i32|
             -> wasmtime::Result<i64> {
                let path = read_path(&mut caller, path_ptr, path_len)?;
                let size = caller
                    .data()
                    .vfs
                    .metadata(&path)
                    .filter(|meta| !meta.is_dir)
                    .and_then(|meta| i64::try_from(meta.len).ok())
                    .unwrap_or(-1);
                Ok(size)
            },
        )
        .map_err(|e| registration_failed("fs_size", &e))?;

    linker
        .func_wrap(
            "env",
            "fs_read",
            |mut caller: Caller<'_, WorkerContext>,
             path_ptr: i32,
             path_len: i32,
             buf_ptr: i32,
             buf_len: i32|
             -> wasmtime::Result<i64> {
                let path = read_path(&mut caller, path_ptr, path_len)?;
                let Some(data) = caller.data().vfs.read_file(&path) else {
                    debug!(path = %path, "fs_read miss");
                    return Ok(-1);
                };

                let capacity = usize::try_from(buf_len).map_err(|_| invalid("negative buffer"))?;
                let count = data.len().min(capacity);
                write_guest(&mut caller, buf_ptr, &data[..count])?;
                Ok(i64::try_from(count)?)
            },
        )
        .map_err(|e| registration_failed("fs_read", &e))?;

    linker
        .func_wrap(
            "env",
            "fs_write",
            |mut caller: Caller<'_, WorkerContext>,
             path_ptr: i32,
             path_len: i32,
             data_ptr: i32,
             data_len: i32|
             -> wasmtime::Result<i32> {
                let path = read_path(&mut caller, path_ptr, path_len)?;
                let data = read_guest(&mut caller, data_ptr, data_len)?;

                let vfs = &caller.data().vfs;
                let written = match path.rsplit_once('/') {
                    Some((parent, _)) if !parent.is_empty() => {
                        ensure_directory_chain(vfs.as_ref(), parent).map(|_| ())
                    }
                    _ => Ok(()),
                }
                .and_then(|()| vfs.write_file(&path, &data));

                match written {
                    Ok(()) => Ok(0),
                    Err(e) => {
                        debug!(path = %path, error = %e, "fs_write failed");
                        Ok(-1)
                    }
                }
            },
        )
        .map_err(|e| registration_failed("fs_write", &e))?;

    Ok(())
}

/// Link WASI preview1 so guests built for `wasm32-wasip1` resolve their
/// imports. Only stdout and stderr are inherited.
///
/// # Errors
///
/// Returns an error if the WASI functions cannot be added.
pub fn register_wasi(linker: &mut Linker<WorkerContext>) -> Result<(), RuntimeError> {
    wasmtime_wasi::preview1::add_to_linker_async(linker, WorkerContext::wasi_mut)
        .map_err(|e| registration_failed("wasi_snapshot_preview1", &e))
}

fn registration_failed(name: &str, error: &wasmtime::Error) -> RuntimeError {
    RuntimeError::invalid_config(format!("Failed to register {name}: {error}"))
}

fn invalid(reason: &str) -> HostFunctionError {
    HostFunctionError::InvalidArgument {
        reason: reason.to_string(),
    }
}

fn guest_memory(caller: &mut Caller<'_, WorkerContext>) -> Result<Memory, HostFunctionError> {
    caller
        .get_export("memory")
        .and_then(Extern::into_memory)
        .ok_or_else(|| invalid("guest does not export memory"))
}

/// Validate a guest `(ptr, len)` pair against the memory size.
fn guest_range(ptr: i32, len: i32, memory_len: usize) -> Result<Range<usize>, HostFunctionError> {
    let (Ok(start), Ok(len)) = (usize::try_from(ptr), usize::try_from(len)) else {
        return Err(invalid("negative pointer or length"));
    };

    match start.checked_add(len) {
        Some(end) if end <= memory_len => Ok(start..end),
        _ => Err(HostFunctionError::OutOfBounds { offset: start, len }),
    }
}

fn read_guest(
    caller: &mut Caller<'_, WorkerContext>,
    ptr: i32,
    len: i32,
) -> Result<Vec<u8>, HostFunctionError> {
    let memory = guest_memory(caller)?;
    let data = memory.data(&*caller);
    let range = guest_range(ptr, len, data.len())?;
    Ok(data[range].to_vec())
}

fn write_guest(
    caller: &mut Caller<'_, WorkerContext>,
    ptr: i32,
    bytes: &[u8],
) -> Result<(), HostFunctionError> {
    let memory = guest_memory(caller)?;
    let len = i32::try_from(bytes.len()).map_err(|_| invalid("write too large"))?;
    let data = memory.data_mut(&mut *caller);
    let range = guest_range(ptr, len, data.len())?;
    data[range].copy_from_slice(bytes);
    Ok(())
}

fn read_path(
    caller: &mut Caller<'_, WorkerContext>,
    ptr: i32,
    len: i32,
) -> Result<String, HostFunctionError> {
    let bytes = read_guest(caller, ptr, len)?;
    String::from_utf8(bytes).map_err(|_| invalid("path is not UTF-8"))
}
