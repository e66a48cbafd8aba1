//! Shared application state.
//!
//! This module provides [`AppState`], which holds the runtime, the asset
//! source and the static routing rules for every request handler.

use std::sync::Arc;

use tracing::info;
use wasmtime::Linker;

use edge_bundle_common::{AssetsConfig, ConfigFile, RuntimeError};
use edge_bundle_core::store::WorkerContext;
use edge_bundle_core::{AssetSource, CompiledModule, RuntimeInstance, WasmEngine, get_or_create_instance};
use edge_bundle_host::{asset_source, register_all};

/// Which request paths are static assets.
#[derive(Debug, Clone, Default)]
pub struct StaticRoutes {
    prefixes: Vec<String>,
    extensions: Vec<String>,
}

impl StaticRoutes {
    /// Build from path prefixes and file extensions (without the dot).
    pub fn new(prefixes: Vec<String>, extensions: Vec<String>) -> Self {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        Self {
            prefixes,
            extensions,
        }
    }

    /// Returns `true` if `path` matches a prefix or ends in a static
    /// extension.
    pub fn is_static(&self, path: &str) -> bool {
        if self.prefixes.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            return true;
        }

        let file_name = path.rsplit('/').next().unwrap_or(path);
        file_name
            .rsplit_once('.')
            .is_some_and(|(_, ext)| {
                self.extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }
}

impl From<&AssetsConfig> for StaticRoutes {
    fn from(config: &AssetsConfig) -> Self {
        Self::new(
            config.static_prefixes.clone(),
            config.static_extensions.clone(),
        )
    }
}

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    runtime: Arc<RuntimeInstance>,
    assets: Arc<dyn AssetSource>,
    routes: Arc<StaticRoutes>,
}

impl AppState {
    /// Create state over an existing runtime.
    pub fn new(
        runtime: Arc<RuntimeInstance>,
        assets: Arc<dyn AssetSource>,
        routes: StaticRoutes,
    ) -> Self {
        Self {
            runtime,
            assets,
            routes: Arc::new(routes),
        }
    }

    /// Build everything a server needs from a config file: engine, guest
    /// module, host imports, asset source and the process-wide runtime.
    ///
    /// The guest is instantiated here, before any request arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine, the guest module, the asset source or
    /// guest instantiation fails.
    pub async fn from_config(config: &ConfigFile) -> Result<Self, RuntimeError> {
        let assets: Arc<dyn AssetSource> = Arc::from(
            asset_source::from_config(&config.assets)
                .map_err(|e| RuntimeError::invalid_config(e.to_string()))?,
        );

        let runtime = get_or_create_instance(|| async {
            let engine = WasmEngine::new(&config.runtime.engine)?;
            let module = CompiledModule::from_file(engine.inner(), &config.guest.module)?;

            let mut linker: Linker<WorkerContext> = Linker::new(engine.inner());
            register_all(&mut linker)?;

            RuntimeInstance::new(engine, &linker, &module, &config.runtime, Arc::clone(&assets))
                .await
        })
        .await?;

        info!(
            guest = %config.guest.module,
            assets = %assets.describe(),
            "Application state ready"
        );

        Ok(Self::new(runtime, assets, StaticRoutes::from(&config.assets)))
    }

    /// The runtime.
    pub fn runtime(&self) -> &Arc<RuntimeInstance> {
        &self.runtime
    }

    /// The asset source.
    pub fn assets(&self) -> &dyn AssetSource {
        self.assets.as_ref()
    }

    /// Static routing rules.
    pub fn routes(&self) -> &StaticRoutes {
        &self.routes
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("assets", &self.assets.describe())
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}
