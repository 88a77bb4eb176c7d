//! Keel Engine Runtime
//!
//! Minimal binary that boots the core services: logging, the job system,
//! and optionally input layers and a resource cluster from the command
//! line. Exits 0 on success, non-zero on unrecoverable init failure.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use keel_core::aio::{AioPort, PortInfo};
use keel_core::jobs::{JobSystem, JobSystemInfo};

struct Options {
    threadpool_size: u32,
    input_script: Option<PathBuf>,
    pack: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Options> {
    let mut options = Options {
        threadpool_size: JobSystemInfo::default().pool_workers,
        input_script: None,
        pack: None,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--threadpool-size" => {
                let value = args.next().context("--threadpool-size needs a value")?;
                options.threadpool_size = value
                    .parse()
                    .with_context(|| format!("bad thread pool size: {value}"))?;
            }
            "--input-script" => {
                let value = args.next().context("--input-script needs a path")?;
                options.input_script = Some(PathBuf::from(value));
            }
            "--pack" => {
                let value = args.next().context("--pack needs a path")?;
                options.pack = Some(PathBuf::from(value));
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(options)
}

fn run(options: Options) -> Result<()> {
    tracing::info!("Keel Engine v{}", keel_core::VERSION);

    let jobs = JobSystem::new(JobSystemInfo {
        pool_workers: options.threadpool_size,
    });
    tracing::info!(
        pool_workers = jobs.pool_worker_count(),
        "job system online"
    );

    if let Some(path) = &options.input_script {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading input script {}", path.display()))?;
        let layers = keel_services::input::parse_layers(&text);
        if layers.is_empty() {
            bail!("no usable input layers in {}", path.display());
        }
        for layer in &layers {
            tracing::info!(
                layer = layer.name(),
                sources = layer.sources().len(),
                actions = layer.actions().len(),
                "input layer ready"
            );
        }
    }

    if let Some(path) = &options.pack {
        let port = AioPort::open(PortInfo { worker_limit: 2 })?;
        let file = Arc::new(
            std::fs::File::open(path)
                .with_context(|| format!("opening pack {}", path.display()))?,
        );
        let blob = keel_asset::load_cluster(&port, file, Duration::from_secs(30))
            .with_context(|| format!("loading pack {}", path.display()))?;
        let view = keel_asset::ClusterView::read_header(&blob)?;
        tracing::info!(
            pack = %path.display(),
            resources = view.resource_count(),
            chunks = view.chunk_count(),
            "resource cluster online"
        );
        port.close();
    }

    jobs.shutdown();
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let options = parse_args(std::env::args().skip(1))?;
    if let Err(error) = run(options) {
        tracing::error!(%error, "engine init failed");
        return Err(error);
    }
    Ok(())
}
