//! The long-lived guest instance.
//!
//! This module provides [`GuestInstance`], which owns the one instantiated
//! guest and its store for the lifetime of the process:
//!
//! 1. Link host functions with the module
//! 2. Instantiate once and run `_initialize` if the guest exports it
//! 3. Serve requests one at a time through the exported `handle_request`
//! 4. Collect logs and metrics after every call

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use wasmtime::{Linker, Memory, Store, Trap, TypedFunc};

use crate::abi::{GuestRequest, GuestResponse};
use crate::store::{
    LogEntry, WorkerContext, begin_request, calculate_fuel_consumed, create_store,
    get_remaining_fuel,
};
use crate::{CompiledModule, MemFs, WasmEngine};
use edge_bundle_common::{ExecutionConfig, HostFunctionError, RuntimeError};

/// Instantiated guest with its exports resolved.
///
/// # Thread Safety
///
/// `GuestInstance` is `Send + Sync`. Calls into the guest are serialized by
/// an async mutex around the store, so the guest always runs single-threaded.
pub struct GuestInstance {
    store: Mutex<Store<WorkerContext>>,
    memory: Memory,
    alloc: TypedFunc<i32, i32>,
    handle: TypedFunc<(i32, i32), i64>,
    dealloc: Option<TypedFunc<(i32, i32), ()>>,
    engine: WasmEngine,
    config: ExecutionConfig,
}

impl GuestInstance {
    /// Instantiate the guest module.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Linking or instantiation fails
    /// - A required export (`memory`, `alloc`, `handle_request`) is missing
    /// - `_initialize` traps or runs out of fuel
    #[instrument(skip_all, fields(content_hash = %module.content_hash()))]
    pub async fn instantiate(
        engine: &WasmEngine,
        linker: &Linker<WorkerContext>,
        module: &CompiledModule,
        config: ExecutionConfig,
        vfs: Arc<MemFs>,
    ) -> Result<Self, RuntimeError> {
        let start = Instant::now();
        let mut store = create_store(engine, &config, vfs)?;

        debug!("Instantiating guest module");

        let instance = linker
            .instantiate_async(&mut store, module.inner())
            .await
            .map_err(|e| RuntimeError::instantiation_failed(format!("{e:#}")))?;

        let memory = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| RuntimeError::missing_export("memory"))?;
        let alloc = instance
            .get_typed_func::<i32, i32>(&mut store, "alloc")
            .map_err(|_| RuntimeError::missing_export("alloc"))?;
        let handle = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, "handle_request")
            .map_err(|_| RuntimeError::missing_export("handle_request"))?;
        let dealloc = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, "dealloc")
            .ok();

        if let Ok(initialize) = instance.get_typed_func::<(), ()>(&mut store, "_initialize") {
            debug!("Running guest _initialize");
            initialize
                .call_async(&mut store, ())
                .await
                .map_err(|e| classify_error(e, &config))?;
        }

        info!(
            duration_ms = start.elapsed().as_millis(),
            has_dealloc = dealloc.is_some(),
            "Guest instantiated"
        );

        Ok(Self {
            store: Mutex::new(store),
            memory,
            alloc,
            handle,
            dealloc,
            engine: engine.clone(),
            config,
        })
    }

    /// Hand one request to the guest and decode its response.
    ///
    /// Fuel and the epoch deadline are re-armed before the call.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::FuelExhausted`] or
    /// [`RuntimeError::ExecutionTimeout`] when a limit is hit, and
    /// [`RuntimeError::InvalidGuestResponse`] for a malformed response frame.
    #[instrument(skip(self, request), fields(method = %request.method, uri = %request.uri))]
    pub async fn request(
        &self,
        request: &GuestRequest,
        request_id: String,
    ) -> Result<GuestResponse, RuntimeError> {
        let start = Instant::now();
        let mut store = self.store.lock().await;

        begin_request(&mut store, &self.engine, &self.config, request_id)?;
        let initial_fuel = get_remaining_fuel(&store).unwrap_or(0);

        let result = self.exchange(&mut store, request).await;

        let fuel_consumed = calculate_fuel_consumed(initial_fuel, &store);
        let memory_used = self.memory.data_size(&*store);
        {
            let ctx = store.data_mut();
            ctx.metrics.fuel_consumed = fuel_consumed;
            ctx.metrics.memory_used_bytes = memory_used;
            ctx.finalize_metrics();
        }

        match &result {
            Ok(response) => debug!(
                status = response.status,
                body_len = response.body.len(),
                fuel_consumed,
                duration_ms = start.elapsed().as_millis(),
                "Guest request completed"
            ),
            Err(e) if e.is_resource_limit() => warn!(
                error = %e,
                fuel_consumed,
                duration_ms = start.elapsed().as_millis(),
                "Guest request hit a resource limit"
            ),
            Err(e) => error!(
                error = %e,
                duration_ms = start.elapsed().as_millis(),
                "Guest request failed"
            ),
        }

        result
    }

    /// Logs the guest produced during the most recent request.
    pub async fn last_logs(&self) -> Vec<LogEntry> {
        self.store.lock().await.data().logs.clone()
    }

    async fn exchange(
        &self,
        store: &mut Store<WorkerContext>,
        request: &GuestRequest,
    ) -> Result<GuestResponse, RuntimeError> {
        let frame = request.to_frame()?;
        let frame_len = i32::try_from(frame.len()).map_err(|_| {
            RuntimeError::invalid_config(format!("request frame of {} bytes", frame.len()))
        })?;

        let ptr = self
            .alloc
            .call_async(&mut *store, frame_len)
            .await
            .map_err(|e| classify_error(e, &self.config))?;
        self.memory
            .write(&mut *store, guest_offset(ptr), &frame)
            .map_err(|_| {
                RuntimeError::HostFunction(HostFunctionError::OutOfBounds {
                    offset: guest_offset(ptr),
                    len: frame.len(),
                })
            })?;

        let packed = self
            .handle
            .call_async(&mut *store, (ptr, frame_len))
            .await
            .map_err(|e| classify_error(e, &self.config))?;
        let (out_ptr, out_len) = unpack(packed);

        let memory_len = self.memory.data_size(&*store);
        if out_ptr.checked_add(out_len).is_none_or(|end| end > memory_len) {
            return Err(RuntimeError::invalid_guest_response(format!(
                "response {out_ptr}+{out_len} outside {memory_len} bytes of memory"
            )));
        }

        let mut output = vec![0u8; out_len];
        self.memory
            .read(&*store, out_ptr, &mut output)
            .map_err(|e| RuntimeError::invalid_guest_response(e.to_string()))?;

        if let Some(dealloc) = &self.dealloc {
            dealloc
                .call_async(&mut *store, (ptr, frame_len))
                .await
                .map_err(|e| classify_error(e, &self.config))?;
            dealloc
                .call_async(&mut *store, (guest_i32(out_ptr), guest_i32(out_len)))
                .await
                .map_err(|e| classify_error(e, &self.config))?;
        }

        GuestResponse::from_frame(&output)
    }
}

impl std::fmt::Debug for GuestInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestInstance")
            .field("has_dealloc", &self.dealloc.is_some())
            .finish_non_exhaustive()
    }
}

#[allow(clippy::cast_sign_loss)]
fn guest_offset(ptr: i32) -> usize {
    ptr as u32 as usize
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn guest_i32(value: usize) -> i32 {
    value as u32 as i32
}

/// Split `ptr << 32 | len`.
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn unpack(packed: i64) -> (usize, usize) {
    let packed = packed as u64;
    ((packed >> 32) as usize, (packed as u32) as usize)
}

/// Map a wasmtime error to the runtime's error type.
fn classify_error(error: wasmtime::Error, config: &ExecutionConfig) -> RuntimeError {
    match error.downcast_ref::<Trap>() {
        Some(Trap::OutOfFuel) => return RuntimeError::FuelExhausted,
        Some(Trap::Interrupt) => {
            return RuntimeError::ExecutionTimeout {
                duration_ms: config.timeout_ms,
            };
        }
        _ => {}
    }

    match error.downcast::<HostFunctionError>() {
        Ok(host) => RuntimeError::HostFunction(host),
        Err(error) => RuntimeError::trap(format!("{error:#}")),
    }
}
