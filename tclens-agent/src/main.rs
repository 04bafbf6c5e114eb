//! tclens-agent - attaches TC classifiers to every interface of the watched
//! network namespaces and keeps the set of attachments current

use anyhow::Result;

#[cfg(not(target_os = "linux"))]
fn main() -> Result<()> {
    eprintln!("Error: tclens-agent requires Linux to attach TC classifiers");
    std::process::exit(1);
}

#[cfg(target_os = "linux")]
#[tokio::main]
async fn main() -> Result<()> {
    linux::run().await
}

#[cfg(target_os = "linux")]
mod linux {
    use std::os::fd::AsFd;
    use std::path::PathBuf;
    use std::sync::Arc;

    use anyhow::{Context, Result};
    use clap::Parser;
    use tclens::metrics::{encode_text, PrometheusStats};
    use tclens::{AgentConfig, ProbeRegistry, ProgramNames, TcCatalog};
    use tclens_agent::attach::{attach_devices, sweep};
    use tclens_agent::discovery::discover_devices;
    use tclens_agent::netns::NetnsHandle;
    use tclens_agent::tc_driver::TcDriver;
    use tokio::signal;
    use tokio::task::spawn_blocking;
    use tracing::{debug, info, trace, warn};
    use tracing_subscriber::EnvFilter;

    type Registry = ProbeRegistry<TcDriver>;

    #[derive(Parser, Debug)]
    #[command(name = "tclens-agent", version, about)]
    struct Args {
        /// Path to the YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Network namespace files to watch (repeatable)
        #[arg(long = "netns", default_value = "/proc/1/ns/net")]
        netns: Vec<PathBuf>,

        /// Enable debug logging
        #[arg(short, long)]
        verbose: bool,
    }

    pub async fn run() -> Result<()> {
        let args = Args::parse();

        let default_level = if args.verbose { "debug" } else { "info" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
        tracing_subscriber::fmt().with_env_filter(filter).init();

        let host = hostname::get()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        info!(version = tclens::VERSION, host = %host, "tclens-agent starting");

        let config = match &args.config {
            Some(path) => AgentConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => AgentConfig::default(),
        };
        let flags = config.feature_flags();

        let driver = TcDriver::new().context("initialising TC driver")?;
        let registry: Arc<Registry> = Arc::new(ProbeRegistry::new(
            config.registry_config(),
            Arc::new(TcCatalog::new(&config.owner)),
            driver,
            ProgramNames::new(),
        ));
        let stats = Arc::new(PrometheusStats::new());

        let namespaces = args
            .netns
            .iter()
            .map(|path| {
                NetnsHandle::open(path)
                    .with_context(|| format!("opening network namespace {}", path.display()))
            })
            .collect::<Result<Vec<_>>>()?;
        let namespaces = Arc::new(namespaces);

        attach_all(&registry, &namespaces, flags).await?;
        info!(programs = registry.len(), "tclens-agent running. Press Ctrl+C to exit.");

        let mut sweep_tick = tokio::time::interval(config.sweep_interval());
        let mut stats_tick = tokio::time::interval(config.stats_interval());
        // both fire immediately; the initial attach already covers that
        sweep_tick.tick().await;
        stats_tick.tick().await;

        let config = Arc::new(config);
        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = sweep_tick.tick() => {
                    let sweep_registry = Arc::clone(&registry);
                    let sweep_config = Arc::clone(&config);
                    spawn_blocking(move || sweep(&sweep_registry, &sweep_config))
                        .await
                        .context("sweep task panicked")?;
                    // pick up interfaces created since the last pass
                    attach_all(&registry, &namespaces, flags).await?;
                }
                _ = stats_tick.tick() => {
                    registry.report_count(stats.as_ref());
                    match encode_text(&stats) {
                        Ok(text) => trace!(metrics = %text, "stats"),
                        Err(e) => debug!(error = %e, "couldn't encode stats"),
                    }
                }
            }
        }

        let flush_registry = Arc::clone(&registry);
        spawn_blocking(move || flush_registry.flush_all())
            .await
            .context("flush task panicked")?;

        info!("tclens-agent stopped");
        Ok(())
    }

    async fn attach_all(
        registry: &Arc<Registry>,
        namespaces: &Arc<Vec<NetnsHandle>>,
        flags: tclens::FeatureFlags,
    ) -> Result<()> {
        let registry = Arc::clone(registry);
        let namespaces = Arc::clone(namespaces);

        spawn_blocking(move || {
            for netns in namespaces.iter() {
                let devices = match discover_devices(netns) {
                    Ok(devices) => devices,
                    Err(e) => {
                        warn!(netns = netns.id(), error = %e, "couldn't list interfaces");
                        continue;
                    }
                };
                let summary = attach_devices(&registry, &devices, netns.as_fd(), flags);
                debug!(
                    netns = netns.id(),
                    ready = summary.ready,
                    partial = summary.partial,
                    missing = summary.missing,
                    "attach pass complete"
                );
            }
        })
        .await
        .context("attach task panicked")
    }
}
