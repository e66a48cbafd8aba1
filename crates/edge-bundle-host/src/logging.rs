//! Logging host function implementation.
//!
//! Guest log calls are captured into the [`WorkerContext`] for the current
//! request and emitted through `tracing` as they happen.

use edge_bundle_core::store::{LogLevel, WorkerContext};
use tracing::{debug, error, info, warn};

/// Host side of `env::log`.
pub struct LoggingHost;

impl LoggingHost {
    /// Record a guest log line.
    ///
    /// The entry is stored in the context and emitted with
    /// `guest_log = true` so it can be filtered apart from host logs.
    pub fn log(ctx: &mut WorkerContext, level: LogLevel, message: &str) {
        ctx.log(level, message.to_string());

        let request_id = ctx.request_id.as_str();
        match level {
            LogLevel::Debug => debug!(request_id, guest_log = true, "{}", message),
            LogLevel::Info => info!(request_id, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(request_id, guest_log = true, "{}", message),
            LogLevel::Error => error!(request_id, guest_log = true, "{}", message),
        }
    }
}

/// Convert the guest's numeric level (0=debug, 1=info, 2=warn, 3=error).
///
/// Unknown values map to info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}
