//! End-to-end tests over a real socket.
//!
//! The server reads its bundle and static files from a temporary directory
//! through `DirAssetSource`, exactly as `edge-bundle serve` does.

use std::sync::Arc;

use wasmtime::Linker;

use edge_bundle_archive::{TarEncoder, gzip};
use edge_bundle_common::{EngineConfig, RuntimeConfig};
use edge_bundle_core::store::WorkerContext;
use edge_bundle_core::{AssetSource, CompiledModule, HydrationState, RuntimeInstance, WasmEngine};
use edge_bundle_host::{DirAssetSource, register_all};
use edge_bundle_server::{AppState, EdgeServer, StaticRoutes};

/// Answers every request with the contents of `/app/public/index.txt`.
const GUEST: &str = r#"
    (module
        (import "env" "fs_size" (func $fs_size (param i32 i32) (result i64)))
        (import "env" "fs_read" (func $fs_read (param i32 i32 i32 i32) (result i64)))
        (memory (export "memory") 2)
        (global $heap (mut i32) (i32.const 70000))
        (data (i32.const 16) "/app/public/index.txt")
        (data (i32.const 64) "\0e\00\00\00{\"status\":200}")
        (data (i32.const 128) "\0e\00\00\00{\"status\":404}")
        (func (export "alloc") (param $len i32) (result i32)
            (local $ptr i32)
            (local.set $ptr (global.get $heap))
            (global.set $heap (i32.add (global.get $heap) (local.get $len)))
            (local.get $ptr))
        (func (export "handle_request") (param $ptr i32) (param $len i32) (result i64)
            (local $n i64)
            (if (i64.lt_s (call $fs_size (i32.const 16) (i32.const 21)) (i64.const 0))
                (then (return (i64.or (i64.shl (i64.const 128) (i64.const 32)) (i64.const 18)))))
            (local.set $n
                (call $fs_read (i32.const 16) (i32.const 21) (i32.const 82) (i32.const 60000)))
            (i64.or
                (i64.shl (i64.const 64) (i64.const 32))
                (i64.add (i64.const 18) (local.get $n))))
    )
"#;

fn write_site(dir: &std::path::Path) {
    let mut encoder = TarEncoder::new(Vec::new()).with_mtime(0);
    encoder.append_directory("public").unwrap();
    encoder.append_file("public/index.txt", b"from the bundle").unwrap();
    let bundle = gzip(&encoder.finish().unwrap()).unwrap();

    std::fs::write(dir.join("app.tar.gz"), bundle).unwrap();
    std::fs::create_dir_all(dir.join("build")).unwrap();
    std::fs::write(dir.join("build/app.js"), "console.log(1)").unwrap();
}

async fn state(dir: &std::path::Path) -> AppState {
    let engine = WasmEngine::new(&EngineConfig::default()).unwrap();
    let mut linker: Linker<WorkerContext> = Linker::new(engine.inner());
    register_all(&mut linker).unwrap();
    let module = CompiledModule::from_wat(engine.inner(), GUEST).unwrap();

    let assets: Arc<dyn AssetSource> = Arc::new(DirAssetSource::new(dir));
    let runtime = RuntimeInstance::new(
        engine,
        &linker,
        &module,
        &RuntimeConfig::default(),
        Arc::clone(&assets),
    )
    .await
    .unwrap();

    AppState::new(
        Arc::new(runtime),
        assets,
        StaticRoutes::new(vec!["/build/".into()], vec!["js".into()]),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_serves_static_and_guest_over_http() {
    let dir = tempfile::tempdir().unwrap();
    write_site(dir.path());

    let handle = EdgeServer::start_test(state(dir.path()).await).await.unwrap();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/build/app.js", handle.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers()["content-type"],
        "text/javascript; charset=utf-8"
    );
    assert_eq!(response.text().await.unwrap(), "console.log(1)");
    assert_eq!(
        handle.state().runtime().hydration_state(),
        HydrationState::NotStarted
    );

    let response = client
        .get(format!("{}/dashboard?tab=1", handle.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "from the bundle");
    assert_eq!(
        handle.state().runtime().hydration_state(),
        HydrationState::Complete
    );

    let response = client
        .get(format!("{}/_edge/ready", handle.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_first_requests_share_hydration() {
    let dir = tempfile::tempdir().unwrap();
    write_site(dir.path());

    let handle = EdgeServer::start_test(state(dir.path()).await).await.unwrap();
    let client = reqwest::Client::new();

    let requests = (0..8).map(|i| {
        let client = client.clone();
        let url = format!("{}/page/{i}", handle.url());
        tokio::spawn(async move { client.get(url).send().await.unwrap().text().await.unwrap() })
    });

    for request in requests.collect::<Vec<_>>() {
        assert_eq!(request.await.unwrap(), "from the bundle");
    }
    assert_eq!(handle.state().runtime().status().requests_served, 8);

    handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_bundle_returns_500_text() {
    let dir = tempfile::tempdir().unwrap();

    let handle = EdgeServer::start_test(state(dir.path()).await).await.unwrap();

    let response = reqwest::get(format!("{}/", handle.url())).await.unwrap();
    assert_eq!(response.status(), 500);
    assert!(
        response
            .text()
            .await
            .unwrap()
            .contains("Bundle archive not found")
    );

    let response = reqwest::get(format!("{}/_edge/ready", handle.url()))
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    handle.shutdown().await;
}
