//! Guest module compilation.
//!
//! This module provides [`CompiledModule`], a wrapper around Wasmtime's [`Module`]
//! that handles compilation from binary, text, or pre-compiled artifacts.
//!
//! # Compilation Strategies
//!
//! - **JIT**: Compile from Wasm bytes at startup
//! - **AOT**: Pre-compile and serialize to disk (fast cold start)
//!
//! The guest language runtime is large, so AOT artifacts are worth using
//! whenever the deployment controls the Wasmtime version.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::Path;
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::{Engine, Module};

use edge_bundle_common::RuntimeError;

/// A compiled guest module.
///
/// # Thread Safety
///
/// `CompiledModule` is cheap to clone and can be shared between threads.
#[derive(Clone)]
pub struct CompiledModule {
    inner: Module,

    /// Hash of the original Wasm bytes.
    content_hash: String,

    /// When this module was compiled.
    compiled_at: Instant,
}

impl CompiledModule {
    /// Compile a core module from WebAssembly bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if compilation fails (e.g., invalid Wasm).
    #[instrument(skip(engine, bytes), fields(bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        Self::validate_wasm_header(bytes)?;

        let module = Module::new(engine, bytes).map_err(|e| {
            RuntimeError::compilation_failed(format!("Core module compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(bytes);

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Guest module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or compilation fails.
    #[instrument(skip(engine, wat))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        let start = Instant::now();

        let module = Module::new(engine, wat).map_err(|e| {
            RuntimeError::compilation_failed(format!("WAT compilation failed: {e}"))
        })?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Load a guest module from disk.
    ///
    /// `.cwasm` files are treated as pre-compiled artifacts, `.wat` files as
    /// text, and everything else as a binary module.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or compiled.
    pub fn from_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("cwasm") => Self::from_precompiled(engine, path),
            Some("wat") => {
                let text = std::fs::read_to_string(path)?;
                Self::from_wat(engine, &text)
            }
            _ => {
                let bytes = std::fs::read(path)?;
                Self::from_bytes(engine, &bytes)
            }
        }
    }

    /// Load a pre-compiled module from disk.
    ///
    /// # Safety
    ///
    /// This deserializes pre-compiled machine code. Only load artifacts that
    /// were compiled by the same version of Wasmtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the artifact cannot be loaded or is incompatible.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, path))]
    pub fn from_precompiled(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let start = Instant::now();

        // SAFETY: artifacts come from our own `serialize` with the same engine settings
        let module = unsafe { Module::deserialize_file(engine, path) }.map_err(|e| {
            RuntimeError::compilation_failed(format!(
                "Failed to load precompiled module from {}: {e}",
                path.display()
            ))
        })?;

        // Convention: {hash}.cwasm
        let content_hash = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        debug!(
            path = %path.display(),
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Ok(Self {
            inner: module,
            content_hash,
            compiled_at: Instant::now(),
        })
    }

    /// Serialize the compiled module for AOT caching.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, RuntimeError> {
        self.inner.serialize().map_err(|e| {
            RuntimeError::compilation_failed(format!("Module serialization failed: {e}"))
        })
    }

    /// Get the content hash of the original Wasm bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Get when this module was compiled.
    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }

    /// Get the inner Wasmtime module.
    pub fn inner(&self) -> &Module {
        &self.inner
    }

    fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: file too small",
            ));
        }

        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::compilation_failed(
                "Invalid Wasm: bad magic number",
            ));
        }

        Ok(())
    }
}

impl std::fmt::Debug for CompiledModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModule")
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
