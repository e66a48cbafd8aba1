//! Guest execution context and store management.
//!
//! This module provides:
//! - [`WorkerContext`]: State accessible from host functions
//! - [`LogEntry`] and [`LogLevel`]: Structured logging from guest code
//! - [`ExecutionMetrics`]: Performance metrics for the current request
//!
//! Unlike a per-request sandbox, the store lives as long as the process.
//! [`begin_request`] resets the per-request parts (fuel, deadline, logs,
//! metrics) before every call into the guest.

use std::sync::Arc;
use std::time::{Duration, Instant};

use wasmtime::{Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::{MemFs, WasmEngine};
use edge_bundle_common::{ExecutionConfig, RuntimeError};

/// Execution context stored in the guest's [`Store`].
///
/// Host functions reach it through [`wasmtime::Caller::data`].
pub struct WorkerContext {
    wasi: WasiP1Ctx,

    limits: StoreLimits,

    /// The hydrated bundle filesystem.
    pub vfs: Arc<MemFs>,

    /// Identifier of the request currently executing.
    pub request_id: String,

    /// Logs collected from guest code during the current request.
    pub logs: Vec<LogEntry>,

    /// Metrics for the current request.
    pub metrics: ExecutionMetrics,

    start_time: Instant,
}

/// A single log entry from guest code.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Log level (debug, info, warn, error).
    pub level: LogLevel,

    /// Log message content.
    pub message: String,

    /// Timestamp when the log was recorded.
    pub timestamp: Instant,
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Execution performance metrics.
#[derive(Debug, Clone, Default)]
pub struct ExecutionMetrics {
    /// Fuel consumed during execution.
    pub fuel_consumed: u64,

    /// Linear memory size in bytes after execution.
    pub memory_used_bytes: usize,

    /// Total execution duration.
    pub duration: Option<Duration>,
}

impl WorkerContext {
    /// Create a context over the shared filesystem.
    ///
    /// `max_memory_bytes` caps linear memory growth.
    pub fn new(vfs: Arc<MemFs>, max_memory_bytes: usize) -> Self {
        let wasi = WasiCtxBuilder::new()
            .inherit_stdout()
            .inherit_stderr()
            .build_p1();

        let limits = StoreLimitsBuilder::new()
            .memory_size(max_memory_bytes)
            .instances(1)
            .build();

        Self {
            wasi,
            limits,
            vfs,
            request_id: String::from("bootstrap"),
            logs: Vec::new(),
            metrics: ExecutionMetrics::default(),
            start_time: Instant::now(),
        }
    }

    /// Add a log entry.
    pub fn log(&mut self, level: LogLevel, message: String) {
        self.logs.push(LogEntry {
            level,
            message,
            timestamp: Instant::now(),
        });
    }

    /// Get the WASI preview1 context.
    pub fn wasi_mut(&mut self) -> &mut WasiP1Ctx {
        &mut self.wasi
    }

    /// Get elapsed time since the current request started.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Finalize metrics after execution.
    pub fn finalize_metrics(&mut self) {
        self.metrics.duration = Some(self.start_time.elapsed());
    }

    fn reset(&mut self, request_id: String) {
        self.request_id = request_id;
        self.logs.clear();
        self.metrics = ExecutionMetrics::default();
        self.start_time = Instant::now();
    }
}

/// Create the guest store.
///
/// Fuel and the epoch deadline are armed immediately so that module start
/// functions and `_initialize` run under the same limits as requests.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn create_store(
    engine: &WasmEngine,
    config: &ExecutionConfig,
    vfs: Arc<MemFs>,
) -> Result<Store<WorkerContext>, RuntimeError> {
    let context = WorkerContext::new(vfs, config.max_memory_bytes());
    let mut store = Store::new(engine.inner(), context);
    store.limiter(|ctx| &mut ctx.limits);

    arm_limits(&mut store, engine, config)?;
    Ok(store)
}

/// Prepare the store for the next request.
///
/// Refills fuel, resets the epoch deadline, and clears the previous
/// request's logs and metrics.
///
/// # Errors
///
/// Returns an error if fuel cannot be set on the store.
pub fn begin_request(
    store: &mut Store<WorkerContext>,
    engine: &WasmEngine,
    config: &ExecutionConfig,
    request_id: String,
) -> Result<(), RuntimeError> {
    store.data_mut().reset(request_id);
    arm_limits(store, engine, config)
}

fn arm_limits(
    store: &mut Store<WorkerContext>,
    engine: &WasmEngine,
    config: &ExecutionConfig,
) -> Result<(), RuntimeError> {
    // Fuel metering is always compiled in, so an unmetered store gets the
    // maximum instead of zero.
    let fuel = if config.fuel_metering {
        config.max_fuel
    } else {
        u64::MAX
    };
    store
        .set_fuel(fuel)
        .map_err(|e| RuntimeError::invalid_config(format!("Failed to set fuel: {e}")))?;

    // One epoch tick per millisecond.
    if engine.is_epoch_enabled() {
        store.set_epoch_deadline(config.timeout_ms);
    }

    Ok(())
}

/// Get remaining fuel from a store.
pub fn get_remaining_fuel(store: &Store<WorkerContext>) -> Option<u64> {
    store.get_fuel().ok()
}

/// Calculate fuel consumed.
pub fn calculate_fuel_consumed(initial_fuel: u64, store: &Store<WorkerContext>) -> u64 {
    let remaining = get_remaining_fuel(store).unwrap_or(0);
    initial_fuel.saturating_sub(remaining)
}
