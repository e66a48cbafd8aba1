//! Configuration structures for edge-bundle.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Wasmtime engine settings (pooling, caching)
//! - [`ExecutionConfig`]: Per-request execution limits (fuel, memory, timeout)
//! - [`BootstrapConfig`]: Where and how the bundle is hydrated

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// This structure contains all configuration options for the runtime.
/// It is usually loaded as the `[runtime]` table of the TOML config file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-request execution configuration.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Filesystem hydration configuration.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

/// Wasmtime engine configuration.
///
/// These settings affect the global Wasmtime engine behavior,
/// including memory allocation strategy and compilation caching.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable pooling allocator.
    ///
    /// A single long-lived instance gains little from pooling, so this is
    /// off by default.
    #[serde(default = "defaults::pooling_allocator")]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,

    /// Memory per instance slot in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,

    /// Enable Wasmtime's on-disk cache of compiled modules.
    #[serde(default = "defaults::cache_compiled_modules")]
    pub cache_compiled_modules: bool,

    /// Path to a Wasmtime cache configuration file.
    ///
    /// Only effective when `cache_compiled_modules` is enabled; the
    /// Wasmtime default location is used when unset.
    #[serde(default)]
    pub cache_config: Option<String>,

    /// Enable epoch-based interruption.
    ///
    /// This allows interrupting long-running WebAssembly execution
    /// based on time rather than fuel consumption.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pooling_allocator: defaults::pooling_allocator(),
            max_instances: defaults::max_instances(),
            instance_memory_mb: defaults::instance_memory_mb(),
            cache_compiled_modules: defaults::cache_compiled_modules(),
            cache_config: None,
            epoch_interruption: defaults::epoch_interruption(),
        }
    }
}

/// Per-request execution configuration.
///
/// These settings control resource limits for each guest request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    /// Maximum fuel (CPU instructions) per request.
    ///
    /// Fuel is refilled to this value before every request. A framework
    /// boot inside the guest can consume hundreds of millions.
    #[serde(default = "defaults::max_fuel")]
    pub max_fuel: u64,

    /// Execution timeout in milliseconds.
    ///
    /// Enforced through epoch interruption, one tick per millisecond.
    #[serde(default = "defaults::timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum linear memory in megabytes.
    #[serde(default = "defaults::max_memory_mb")]
    pub max_memory_mb: u32,

    /// Enable fuel metering.
    ///
    /// When enabled, CPU usage is tracked and limited by the `max_fuel` setting.
    #[serde(default = "defaults::fuel_metering")]
    pub fuel_metering: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_fuel: defaults::max_fuel(),
            timeout_ms: defaults::timeout_ms(),
            max_memory_mb: defaults::max_memory_mb(),
            fuel_metering: defaults::fuel_metering(),
        }
    }
}

impl ExecutionConfig {
    /// Get the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Get the memory limit in bytes.
    pub fn max_memory_bytes(&self) -> usize {
        self.max_memory_mb as usize * 1024 * 1024
    }
}

/// Filesystem hydration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BootstrapConfig {
    /// Logical asset name of the compressed bundle.
    #[serde(default = "defaults::archive_name")]
    pub archive_name: String,

    /// Absolute path the bundle is unpacked under.
    #[serde(default = "defaults::mount_root")]
    pub mount_root: String,

    /// Directories created after unpacking and made world-writable.
    #[serde(default = "defaults::writable_dirs")]
    pub writable_dirs: Vec<String>,

    /// Files rewritten on every readiness check.
    #[serde(default)]
    pub runtime_files: Vec<RuntimeFile>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            archive_name: defaults::archive_name(),
            mount_root: defaults::mount_root(),
            writable_dirs: defaults::writable_dirs(),
            runtime_files: Vec::new(),
        }
    }
}

/// A small file the guest runtime expects next to the bundle.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuntimeFile {
    /// Absolute path inside the virtual filesystem.
    pub path: String,

    /// File contents.
    pub contents: String,
}

/// Default value functions for serde.
mod defaults {
    pub const fn pooling_allocator() -> bool {
        false
    }

    pub const fn max_instances() -> u32 {
        16
    }

    pub const fn instance_memory_mb() -> u32 {
        256
    }

    pub const fn cache_compiled_modules() -> bool {
        false
    }

    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn max_fuel() -> u64 {
        1_000_000_000
    }

    pub const fn timeout_ms() -> u64 {
        10_000
    }

    pub const fn max_memory_mb() -> u32 {
        256
    }

    pub const fn fuel_metering() -> bool {
        true
    }

    pub fn archive_name() -> String {
        "app.tar.gz".to_string()
    }

    pub fn mount_root() -> String {
        "/app".to_string()
    }

    pub fn writable_dirs() -> Vec<String> {
        [
            "/app/storage/framework/sessions",
            "/app/storage/framework/cache",
            "/app/storage/framework/views",
            "/app/storage/logs",
            "/app/bootstrap/cache",
            "/tmp",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}
