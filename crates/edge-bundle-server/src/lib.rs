//! HTTP server for edge-bundle.
//!
//! This crate puts an HTTP front on the single guest runtime:
//!
//! - Static assets are served straight from the asset source
//! - Every other request hydrates the filesystem (once) and goes to the guest
//! - Health, readiness and an optional token-guarded admin API
//!
//! # Quick Start
//!
//! ```ignore
//! use edge_bundle_common::ConfigFile;
//! use edge_bundle_server::EdgeServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConfigFile::from_file("edge.toml")?;
//!     EdgeServer::from_config(&config).await?.run().await?;
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod handler;
pub mod request;
pub mod response;
pub mod router;
pub mod server;
pub mod state;

pub use router::{AdminRouterConfig, build_router, build_router_with_admin};
pub use server::{EdgeServer, ServerConfig, TestHandle};
pub use state::{AppState, StaticRoutes};
