//! Error types for edge-bundle.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for the guest runtime
//! - [`HydrationError`]: Failures while materializing the bundle filesystem
//! - [`AssetError`]: Failures reported by an asset source
//! - [`HostFunctionError`]: Errors from host function implementations

use std::io;
use std::sync::Arc;

use thiserror::Error;

use edge_bundle_archive::{ArchiveError, VfsError};

/// Top-level runtime errors.
///
/// These errors represent failures across the lifecycle of the single guest
/// instance, from compilation to request execution.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// WebAssembly compilation failed.
    #[error("Compilation failed: {reason}")]
    CompilationFailed {
        /// Description of the compilation failure.
        reason: String,
    },

    /// Linking or instantiating the guest failed.
    #[error("Instantiation failed: {reason}")]
    InstantiationFailed {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// The guest does not export a required item.
    #[error("Guest export missing: {name}")]
    MissingExport {
        /// Name of the missing export.
        name: String,
    },

    /// The process-wide runtime instance has not been created yet.
    #[error("Runtime instance not initialized")]
    NotInitialized,

    /// Execution exceeded the configured timeout.
    #[error("Execution timeout after {duration_ms}ms")]
    ExecutionTimeout {
        /// The timeout duration in milliseconds.
        duration_ms: u64,
    },

    /// Execution exhausted the configured fuel limit.
    ///
    /// This indicates the WebAssembly code consumed more CPU cycles
    /// than allowed by the fuel metering configuration.
    #[error("Fuel exhausted: CPU limit exceeded")]
    FuelExhausted,

    /// The bundle filesystem could not be hydrated.
    ///
    /// Hydration failure is terminal: every caller sees the same error.
    #[error("Filesystem hydration failed: {0}")]
    Hydration(#[from] Arc<HydrationError>),

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    HostFunction(#[from] HostFunctionError),

    /// The guest returned a response the host could not decode.
    #[error("Invalid guest response: {reason}")]
    InvalidGuestResponse {
        /// Description of the decoding failure.
        reason: String,
    },

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error.
        reason: String,
    },
}

/// Errors raised while hydrating the in-memory filesystem from the bundle.
#[derive(Error, Debug)]
pub enum HydrationError {
    /// The asset source has no archive at the configured path.
    #[error("Bundle archive not found: {path}")]
    ArchiveMissing {
        /// Path the archive was requested under.
        path: String,
    },

    /// Fetching the archive failed.
    #[error("Failed to fetch bundle: {0}")]
    Fetch(#[from] AssetError),

    /// The gzip stream was corrupt or ended early.
    #[error("Failed to decompress bundle: {source}")]
    Decompress {
        #[source]
        source: io::Error,
    },

    /// The tar payload could not be decoded.
    #[error("Failed to decode bundle: {0}")]
    Decode(#[from] ArchiveError),

    /// Preparing writable directories or runtime files failed.
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] VfsError),

    /// The hydration task stopped before reporting an outcome.
    #[error("Hydration aborted: {reason}")]
    Aborted {
        /// Description of how the task ended.
        reason: String,
    },
}

/// Errors reported by an asset source.
#[derive(Error, Debug)]
pub enum AssetError {
    /// The HTTP request could not be completed.
    #[error("Asset request failed: {url}: {reason}")]
    Request {
        /// The URL that was requested.
        url: String,
        /// Description of the failure.
        reason: String,
    },

    /// The upstream answered with an unexpected status.
    #[error("Asset request failed: {url} (status: {status})")]
    Status {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Reading an asset from disk failed.
    #[error("Failed to read asset '{path}': {source}")]
    Io {
        /// Path of the asset.
        path: String,
        #[source]
        source: io::Error,
    },

    /// The asset source was configured with an unusable base.
    #[error("Invalid asset base: {reason}")]
    InvalidBase {
        /// Description of the problem.
        reason: String,
    },
}

/// Errors from host function implementations.
///
/// These errors occur when host functions (provided by the runtime to
/// the guest module) fail to complete their operations.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },

    /// A pointer/length pair fell outside guest memory.
    #[error("Guest memory access out of bounds: {offset}+{len}")]
    OutOfBounds {
        /// Start offset requested.
        offset: usize,
        /// Length requested.
        len: usize,
    },

    /// A filesystem host call failed.
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] VfsError),
}

impl RuntimeError {
    /// Create a new `CompilationFailed` error.
    pub fn compilation_failed(reason: impl Into<String>) -> Self {
        Self::CompilationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `InstantiationFailed` error.
    pub fn instantiation_failed(reason: impl Into<String>) -> Self {
        Self::InstantiationFailed {
            reason: reason.into(),
        }
    }

    /// Create a new `MissingExport` error.
    pub fn missing_export(name: impl Into<String>) -> Self {
        Self::MissingExport { name: name.into() }
    }

    /// Create a new `InvalidGuestResponse` error.
    pub fn invalid_guest_response(reason: impl Into<String>) -> Self {
        Self::InvalidGuestResponse {
            reason: reason.into(),
        }
    }

    /// Create a new `Trap` error.
    pub fn trap(message: impl Into<String>) -> Self {
        Self::Trap {
            message: message.into(),
        }
    }

    /// Create a new `InvalidConfig` error.
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Returns `true` if this error indicates a resource limit was exceeded.
    pub fn is_resource_limit(&self) -> bool {
        matches!(self, Self::FuelExhausted | Self::ExecutionTimeout { .. })
    }

    /// Returns `true` if this error came from filesystem hydration.
    pub fn is_hydration(&self) -> bool {
        matches!(self, Self::Hydration(_))
    }
}

impl HydrationError {
    /// Create a new `ArchiveMissing` error.
    pub fn archive_missing(path: impl Into<String>) -> Self {
        Self::ArchiveMissing { path: path.into() }
    }

    /// Create a new `Aborted` error.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted {
            reason: reason.into(),
        }
    }
}

impl AssetError {
    /// Create a new `Request` error.
    pub fn request(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Request {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a new `Io` error.
    pub fn io(path: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::missing_export("handle_request");
        assert_eq!(err.to_string(), "Guest export missing: handle_request");

        let err = RuntimeError::FuelExhausted;
        assert_eq!(err.to_string(), "Fuel exhausted: CPU limit exceeded");
    }

    #[test]
    fn test_hydration_error_chain() {
        let hydration = HydrationError::from(AssetError::Status {
            url: "https://assets.example.com/app.tar.gz".into(),
            status: 503,
        });
        let runtime_err: RuntimeError = Arc::new(hydration).into();

        assert!(runtime_err.is_hydration());
        assert_eq!(
            runtime_err.to_string(),
            "Filesystem hydration failed: Failed to fetch bundle: \
             Asset request failed: https://assets.example.com/app.tar.gz (status: 503)"
        );
    }

    #[test]
    fn test_hydration_from_archive() {
        let archive = ArchiveError::TruncatedArchive {
            offset: 0,
            declared: 1_000_000,
            available: 10,
        };
        let err: HydrationError = archive.into();
        assert!(matches!(err, HydrationError::Decode(ref e) if e.is_truncated()));
    }

    #[test]
    fn test_error_from_host_function() {
        let host_err = HostFunctionError::OutOfBounds {
            offset: 65_530,
            len: 16,
        };
        let runtime_err: RuntimeError = host_err.into();

        assert!(matches!(runtime_err, RuntimeError::HostFunction(_)));
    }

    #[test]
    fn test_is_resource_limit() {
        assert!(RuntimeError::FuelExhausted.is_resource_limit());
        assert!(RuntimeError::ExecutionTimeout { duration_ms: 100 }.is_resource_limit());
        assert!(!RuntimeError::NotInitialized.is_resource_limit());
        assert!(!RuntimeError::trap("unreachable").is_resource_limit());
    }
}
