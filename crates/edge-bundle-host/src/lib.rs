//! Host side of edge-bundle.
//!
//! # Modules
//!
//! - [`linker`]: Host imports linked into the guest (`env::*` and WASI)
//! - [`logging`]: Capture of guest log calls
//! - [`asset_source`]: Directory and HTTP asset sources
//!
//! # Guest Memory
//!
//! Every import that takes a pointer validates it against the guest's
//! exported `memory` before touching it. Out-of-range pointers trap the
//! guest instead of reading host memory.

pub mod asset_source;
pub mod linker;
pub mod logging;

pub use asset_source::{DirAssetSource, HttpAssetSource, guess_content_type};
pub use linker::register_all;
pub use logging::LoggingHost;
