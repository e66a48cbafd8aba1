//! edge-bundle CLI entry point.
//!
//! - `edge-bundle serve` instantiates the guest and runs the HTTP server.
//! - `edge-bundle pack` collects an application tree into a gzipped ustar
//!   bundle.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use edge_bundle_archive::{Collector, HostFs, encode, gzip};
use edge_bundle_common::ConfigFile;
use edge_bundle_server::EdgeServer;

#[derive(Debug, Parser)]
#[command(name = "edge-bundle", version, about)]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Instantiate the guest and serve HTTP.
    Serve {
        /// TOML config file. Defaults apply when omitted.
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Bind address, overriding the config file.
        #[arg(long, env = "BIND_ADDR")]
        bind: Option<SocketAddr>,

        /// Print the effective configuration as TOML and exit.
        #[arg(long)]
        print_config: bool,
    },

    /// Pack an application tree into a gzipped ustar bundle.
    Pack {
        /// Directory the bundle paths are relative to.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Path under the root to include (repeatable). Defaults to the
        /// whole root.
        #[arg(long)]
        include: Vec<String>,

        /// Wildcard pattern to exclude (repeatable).
        #[arg(long)]
        exclude: Vec<String>,

        /// Output file.
        #[arg(long, short, default_value = "app.tar.gz")]
        output: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,edge_bundle=debug".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            bind,
            print_config,
        } => serve(config, bind, print_config).await,
        Command::Pack {
            root,
            include,
            exclude,
            output,
        } => pack(&root, &include, &exclude, &output),
    }
}

async fn serve(
    path: Option<PathBuf>,
    bind: Option<SocketAddr>,
    print_config: bool,
) -> anyhow::Result<()> {
    let mut config = match &path {
        Some(path) => ConfigFile::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ConfigFile::default(),
    };
    if let Some(bind) = bind {
        config.server.bind_addr = bind.to_string();
    }

    if print_config {
        print!(
            "{}",
            toml::to_string_pretty(&config).context("Failed to render config")?
        );
        return Ok(());
    }

    let source = path
        .as_ref()
        .map_or_else(|| "<defaults>".to_string(), |p| p.display().to_string());
    info!(
        config = %source,
        guest = %config.guest.module,
        "Starting edge-bundle"
    );

    let server = EdgeServer::from_config(&config)
        .await
        .context("Failed to initialize runtime")?;

    info!("Server initialized. Available endpoints:");
    info!("  GET  /_edge/health        - Liveness");
    info!("  GET  /_edge/ready         - Hydration state");
    if config.admin.is_configured() {
        info!("  GET  {}/status       - Runtime status (admin)", config.admin.prefix);
    }
    info!("  *    /*                   - Static assets, then the guest");

    server.run().await?;
    Ok(())
}

fn pack(
    root: &Path,
    include: &[String],
    exclude: &[String],
    output: &Path,
) -> anyhow::Result<()> {
    let start = Instant::now();

    let mut collector = Collector::new(root);
    if include.is_empty() {
        collector = collector.include(".");
    }
    for path in include {
        collector = collector.include(path);
    }
    for pattern in exclude {
        collector = collector.exclude(pattern);
    }
    if let Some(relative) = path_under_root(root, output) {
        debug!(path = %relative, "Excluding output file from bundle");
        collector = collector.exclude_path(relative);
    }

    let entries = collector.collect().context("Failed to collect files")?;
    let archive = encode(&entries, &HostFs).context("Failed to encode archive")?;
    let compressed = gzip(&archive).context("Failed to compress archive")?;

    std::fs::write(output, &compressed)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        output = %output.display(),
        entries = entries.len(),
        archive_bytes = archive.len(),
        compressed_bytes = compressed.len(),
        duration_ms = start.elapsed().as_millis(),
        "Bundle written"
    );
    Ok(())
}

/// `output` as a `/`-separated path relative to `root`, if it lies inside it.
///
/// The output file may not exist yet, so only its parent is resolved.
fn path_under_root(root: &Path, output: &Path) -> Option<String> {
    let root = std::fs::canonicalize(root).ok()?;
    let parent = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let output = std::fs::canonicalize(parent).ok()?.join(output.file_name()?);

    let names = output
        .strip_prefix(&root)
        .ok()?
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(names.join("/"))
}
