//! Runtime bootstrap.
//!
//! [`RuntimeInstance`] ties the guest, the in-memory filesystem and the
//! bundle together. The guest is instantiated once, eagerly, when the
//! instance is created. Filesystem hydration is lazy: the first call to
//! [`RuntimeInstance::ensure_filesystem_ready`] starts it, concurrent callers
//! wait on the same in-flight task, and the outcome is kept forever.
//!
//! ```text
//! NotStarted ──► InProgress ──► Complete
//!                    │
//!                    └────────► Failed (terminal)
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OnceCell, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use wasmtime::Linker;

use crate::abi::{GuestRequest, GuestResponse};
use crate::asset::AssetSource;
use crate::instance::GuestInstance;
use crate::store::WorkerContext;
use crate::vfs::MemFsStats;
use crate::{CompiledModule, MemFs, WasmEngine};
use edge_bundle_archive::{ArchiveInflater, DecodeReport, VirtualFs, decode, ensure_directory_chain};
use edge_bundle_common::{BootstrapConfig, HydrationError, RuntimeConfig, RuntimeError};

const WRITABLE_MODE: u32 = 0o777;

type Outcome = Result<(), Arc<HydrationError>>;

static INSTANCE: OnceCell<Arc<RuntimeInstance>> = OnceCell::const_new();

/// Observable hydration state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HydrationState {
    /// Nobody has asked for the filesystem yet.
    NotStarted,
    /// A hydration task is running.
    InProgress,
    /// The bundle is in place.
    Complete,
    /// Hydration failed. Never retried.
    Failed,
}

enum HydrationPhase {
    NotStarted,
    InProgress(watch::Receiver<Option<Outcome>>),
    Complete,
    Failed(Arc<HydrationError>),
}

impl HydrationPhase {
    fn state(&self) -> HydrationState {
        match self {
            Self::NotStarted => HydrationState::NotStarted,
            Self::InProgress(_) => HydrationState::InProgress,
            Self::Complete => HydrationState::Complete,
            Self::Failed(_) => HydrationState::Failed,
        }
    }

    fn settled(&self) -> Option<Outcome> {
        match self {
            Self::Complete => Some(Ok(())),
            Self::Failed(e) => Some(Err(Arc::clone(e))),
            Self::NotStarted | Self::InProgress(_) => None,
        }
    }
}

/// Snapshot for health and admin endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatus {
    /// Current hydration state.
    pub hydration: HydrationState,
    /// Hydration error message, when failed.
    pub hydration_error: Option<String>,
    /// Content hash of the guest module.
    pub guest_hash: String,
    /// Requests handed to the guest so far.
    pub requests_served: u64,
    /// Seconds since the instance was created.
    pub uptime_secs: u64,
    /// Filesystem counters.
    pub filesystem: MemFsStats,
}

/// The process-wide runtime.
pub struct RuntimeInstance {
    engine: WasmEngine,
    guest: GuestInstance,
    guest_hash: String,
    vfs: Arc<MemFs>,
    assets: Arc<dyn AssetSource>,
    bootstrap: Arc<BootstrapConfig>,
    phase: Mutex<HydrationPhase>,
    requests: AtomicU64,
    created_at: Instant,
}

impl RuntimeInstance {
    /// Instantiate the guest over a fresh, empty filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the guest cannot be instantiated.
    pub async fn new(
        engine: WasmEngine,
        linker: &Linker<WorkerContext>,
        module: &CompiledModule,
        config: &RuntimeConfig,
        assets: Arc<dyn AssetSource>,
    ) -> Result<Self, RuntimeError> {
        let vfs = Arc::new(MemFs::new());
        let guest = GuestInstance::instantiate(
            &engine,
            linker,
            module,
            config.execution.clone(),
            Arc::clone(&vfs),
        )
        .await?;

        info!(
            assets = %assets.describe(),
            archive = %config.bootstrap.archive_name,
            mount_root = %config.bootstrap.mount_root,
            "Runtime instance created"
        );

        Ok(Self {
            engine,
            guest,
            guest_hash: module.content_hash().to_string(),
            vfs,
            assets,
            bootstrap: Arc::new(config.bootstrap.clone()),
            phase: Mutex::new(HydrationPhase::NotStarted),
            requests: AtomicU64::new(0),
            created_at: Instant::now(),
        })
    }

    /// Make sure the bundle is hydrated, then (re)write the runtime files.
    ///
    /// Safe to call from any number of tasks at once: hydration runs at most
    /// once and every caller observes the same outcome.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::Hydration`] if hydration failed, now or
    /// earlier, or if a runtime file could not be written.
    pub async fn ensure_filesystem_ready(&self) -> Result<(), RuntimeError> {
        self.hydration().await?;
        self.write_runtime_files()
            .map_err(|e| RuntimeError::Hydration(Arc::new(e)))
    }

    /// Hand a request to the guest.
    ///
    /// # Errors
    ///
    /// Propagates any [`RuntimeError`] raised while the guest runs.
    pub async fn handle_request(&self, request: GuestRequest) -> Result<GuestResponse, RuntimeError> {
        let request_id = Uuid::new_v4().to_string();
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.guest.request(&request, request_id).await
    }

    /// Current hydration state.
    pub fn hydration_state(&self) -> HydrationState {
        self.phase.lock().state()
    }

    /// Status snapshot.
    pub fn status(&self) -> RuntimeStatus {
        let (hydration, hydration_error) = {
            let phase = self.phase.lock();
            let error = match &*phase {
                HydrationPhase::Failed(e) => Some(e.to_string()),
                _ => None,
            };
            (phase.state(), error)
        };

        RuntimeStatus {
            hydration,
            hydration_error,
            guest_hash: self.guest_hash.clone(),
            requests_served: self.requests.load(Ordering::Relaxed),
            uptime_secs: self.created_at.elapsed().as_secs(),
            filesystem: self.vfs.stats(),
        }
    }

    /// The filesystem the guest sees.
    pub fn vfs(&self) -> &Arc<MemFs> {
        &self.vfs
    }

    /// The engine the guest was compiled with.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// The instantiated guest.
    pub fn guest(&self) -> &GuestInstance {
        &self.guest
    }

    async fn hydration(&self) -> Outcome {
        let mut rx = {
            let mut phase = self.phase.lock();
            if let Some(outcome) = phase.settled() {
                return outcome;
            }
            let in_flight = match &*phase {
                HydrationPhase::InProgress(rx) => Some(rx.clone()),
                _ => None,
            };
            in_flight.unwrap_or_else(|| {
                let rx = self.spawn_hydration();
                *phase = HydrationPhase::InProgress(rx.clone());
                rx
            })
        };

        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone().unwrap_or(Ok(())),
            Err(_) => Err(Arc::new(HydrationError::aborted(
                "hydration task ended without reporting an outcome",
            ))),
        };

        let mut phase = self.phase.lock();
        if let Some(settled) = phase.settled() {
            return settled;
        }
        *phase = match &outcome {
            Ok(()) => HydrationPhase::Complete,
            Err(e) => HydrationPhase::Failed(Arc::clone(e)),
        };
        outcome
    }

    fn spawn_hydration(&self) -> watch::Receiver<Option<Outcome>> {
        let (tx, rx) = watch::channel(None);
        let vfs = Arc::clone(&self.vfs);
        let assets = Arc::clone(&self.assets);
        let bootstrap = Arc::clone(&self.bootstrap);

        debug!("Starting filesystem hydration");
        tokio::spawn(async move {
            let outcome = hydrate(&vfs, assets.as_ref(), &bootstrap)
                .await
                .map(|_| ())
                .map_err(|e| {
                    warn!(error = %e, "Filesystem hydration failed");
                    Arc::new(e)
                });
            tx.send_replace(Some(outcome));
        });

        rx
    }

    fn write_runtime_files(&self) -> Result<(), HydrationError> {
        for file in &self.bootstrap.runtime_files {
            if let Some((parent, _)) = file.path.rsplit_once('/') {
                if !parent.is_empty() {
                    ensure_directory_chain(self.vfs.as_ref(), parent)?;
                }
            }
            self.vfs.write_file(&file.path, file.contents.as_bytes())?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for RuntimeInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeInstance")
            .field("guest_hash", &self.guest_hash)
            .field("hydration", &self.hydration_state())
            .finish_non_exhaustive()
    }
}

/// Fetch, inflate and unpack the bundle into `vfs`, then prepare the
/// writable directories.
///
/// # Errors
///
/// Returns the first [`HydrationError`] hit. Whatever was written before
/// the failure stays in place.
#[instrument(skip_all, fields(archive = %bootstrap.archive_name, mount_root = %bootstrap.mount_root))]
pub async fn hydrate(
    vfs: &MemFs,
    assets: &dyn AssetSource,
    bootstrap: &BootstrapConfig,
) -> Result<DecodeReport, HydrationError> {
    let start = Instant::now();

    let asset = assets
        .fetch(&bootstrap.archive_name)
        .await?
        .ok_or_else(|| HydrationError::archive_missing(&bootstrap.archive_name))?;

    let mut body = asset.body;
    let mut inflater = ArchiveInflater::new();
    while let Some(chunk) = body.next_chunk().await? {
        inflater
            .push(&chunk)
            .map_err(|source| HydrationError::Decompress { source })?;
    }
    let compressed_len = inflater.compressed_len();
    let tar = inflater
        .finish()
        .map_err(|source| HydrationError::Decompress { source })?;

    ensure_directory_chain(vfs, &bootstrap.mount_root)?;
    let report = decode(&tar, vfs, &bootstrap.mount_root)?;

    for dir in &bootstrap.writable_dirs {
        ensure_directory_chain(vfs, dir)?;
        vfs.chmod(dir, WRITABLE_MODE)?;
    }

    info!(
        compressed_bytes = compressed_len,
        archive_bytes = tar.len(),
        directories = report.directories,
        files = report.files,
        skipped = report.skipped,
        duration_ms = start.elapsed().as_millis(),
        "Filesystem hydrated"
    );

    Ok(report)
}

/// Get the process-wide runtime, creating it with `init` on first use.
///
/// Concurrent first callers run `init` once; a failed `init` leaves the
/// cell empty so startup can report the error.
///
/// # Errors
///
/// Returns the error produced by `init`.
pub async fn get_or_create_instance<F, Fut>(init: F) -> Result<Arc<RuntimeInstance>, RuntimeError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<RuntimeInstance, RuntimeError>>,
{
    INSTANCE
        .get_or_try_init(move || async move { init().await.map(Arc::new) })
        .await
        .map(Arc::clone)
}

/// The process-wide runtime, if it has been created.
pub fn instance() -> Option<Arc<RuntimeInstance>> {
    INSTANCE.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_state() {
        assert_eq!(HydrationPhase::NotStarted.state(), HydrationState::NotStarted);
        assert_eq!(HydrationPhase::Complete.state(), HydrationState::Complete);

        let (_tx, rx) = watch::channel(None);
        assert_eq!(HydrationPhase::InProgress(rx).state(), HydrationState::InProgress);

        let failed = HydrationPhase::Failed(Arc::new(HydrationError::archive_missing("app.tar.gz")));
        assert_eq!(failed.state(), HydrationState::Failed);
    }

    #[test]
    fn test_settled_outcomes() {
        assert!(HydrationPhase::NotStarted.settled().is_none());
        assert!(matches!(HydrationPhase::Complete.settled(), Some(Ok(()))));

        let error = Arc::new(HydrationError::aborted("boom"));
        let failed = HydrationPhase::Failed(Arc::clone(&error));
        let Some(Err(settled)) = failed.settled() else {
            panic!("expected a failure");
        };
        assert!(Arc::ptr_eq(&settled, &error));
    }

    #[test]
    fn test_state_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&HydrationState::InProgress).unwrap(),
            "\"in_progress\""
        );
    }
}
