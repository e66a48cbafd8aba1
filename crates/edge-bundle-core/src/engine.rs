//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is the foundation of the runtime. It is:
//! - Thread-safe and shared by the guest instance and the epoch ticker
//! - Set up with fuel metering and epoch interruption for resource limiting
//! - Optionally backed by the pooling allocator and the on-disk module cache

use std::sync::Arc;

use tracing::{debug, info, warn};
use wasmtime::{Config, Engine, InstanceAllocationStrategy, PoolingAllocationConfig};

use edge_bundle_common::{EngineConfig, RuntimeError};

/// Thread-safe WebAssembly engine wrapper.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Fuel Metering**: Deterministic CPU limiting, refilled per request
/// - **Epoch Interruption**: Wall-clock deadline, one tick per millisecond
/// - **Async Support**: Required by the WASI preview1 bindings
///
/// # Example
///
/// ```ignore
/// use edge_bundle_common::EngineConfig;
/// use edge_bundle_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is invalid or the
    /// pooling allocator cannot reserve its slots.
    pub fn new(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);
        wasmtime_config.consume_fuel(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        if config.pooling_allocator {
            let pooling_config = Self::create_pooling_config(config);

            wasmtime_config
                .allocation_strategy(InstanceAllocationStrategy::Pooling(pooling_config));

            info!(
                max_instances = config.max_instances,
                instance_memory_mb = config.instance_memory_mb,
                "Pooling allocator enabled"
            );
        }

        if config.cache_compiled_modules {
            let loaded = match config.cache_config {
                Some(ref path) => wasmtime_config.cache_config_load(path).map(|_| ()),
                None => wasmtime_config.cache_config_load_default().map(|_| ()),
            };

            match loaded {
                Ok(()) => debug!(cache_config = ?config.cache_config, "Module cache enabled"),
                Err(e) => warn!(error = %e, "Module cache unavailable, compiling without it"),
            }
        }

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::invalid_config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            epoch_interruption = config.epoch_interruption,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        let max_memory_bytes = (config.instance_memory_mb as usize) * 1024 * 1024;
        pooling.max_memory_size(max_memory_bytes);

        pooling
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Increment the epoch counter.
    ///
    /// Called every millisecond by the server's ticker task so that
    /// `timeout_ms` maps directly to epoch ticks.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Check if epoch-based interruption is enabled.
    pub fn is_epoch_enabled(&self) -> bool {
        self.config.epoch_interruption
    }

    /// Check if the pooling allocator is enabled.
    pub fn is_pooling_enabled(&self) -> bool {
        self.config.pooling_allocator
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("pooling_allocator", &self.config.pooling_allocator)
            .field("epoch_interruption", &self.config.epoch_interruption)
            .finish_non_exhaustive()
    }
}
