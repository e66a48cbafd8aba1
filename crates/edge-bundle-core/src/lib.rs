//! Guest runtime for edge-bundle.
//!
//! This crate provides the pieces that turn a compiled guest and a bundle
//! archive into something that can answer requests:
//! - [`WasmEngine`]: Configured Wasmtime engine
//! - [`CompiledModule`]: Compiled guest module wrapper
//! - [`MemFs`]: In-memory filesystem the bundle is hydrated into
//! - [`GuestInstance`]: The single instantiated guest and its store
//! - [`RuntimeInstance`]: Bootstrap state machine and process-wide singleton
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     WasmEngine                          │
//! │  (Shared, thread-safe, ticked by the epoch task)        │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                   CompiledModule                        │
//! │  (Compiled once at startup)                             │
//! └─────────────────────────────────────────────────────────┘
//!                            │
//!                            ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  RuntimeInstance                        │
//! │  - GuestInstance: Store<WorkerContext> behind a mutex   │
//! │  - MemFs: hydrated lazily from the bundle archive       │
//! │  - Hydration state: NotStarted → InProgress → Complete  │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod abi;
pub mod asset;
pub mod engine;
pub mod instance;
pub mod module;
pub mod runtime;
pub mod store;
pub mod vfs;

pub use abi::{GuestRequest, GuestResponse};
pub use asset::{Asset, AssetBody, AssetSource};
pub use engine::WasmEngine;
pub use instance::GuestInstance;
pub use module::CompiledModule;
pub use runtime::{
    HydrationState, RuntimeInstance, RuntimeStatus, get_or_create_instance, hydrate, instance,
};
pub use store::{ExecutionMetrics, LogEntry, LogLevel, WorkerContext};
pub use vfs::{MemFs, MemFsStats, NodeMeta};
