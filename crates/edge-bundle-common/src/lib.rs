//! Common types, errors, and configuration for edge-bundle.
//!
//! This crate provides shared functionality used across the edge-bundle workspace:
//! - Error types using `thiserror` for the runtime, hydration, and asset layers
//! - Configuration structures for the engine, guest execution, and bootstrap
//! - The TOML configuration file loaded by the `serve` command

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{
    BootstrapConfig, EngineConfig, ExecutionConfig, RuntimeConfig, RuntimeFile,
};
pub use config_file::{
    AdminConfig, AssetSourceKind, AssetsConfig, ConfigFile, ConfigFileError, GuestConfig,
    ServerConfigFile,
};
pub use error::{AssetError, HostFunctionError, HydrationError, RuntimeError};
