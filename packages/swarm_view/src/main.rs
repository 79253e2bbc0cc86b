use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use swarm_view::config::{FileConfig, SwarmViewConfig, ViewerConfig, load_config};
use swarm_view::viewer::start_viewer;

#[derive(Parser)]
#[command(name = "swarm")]
#[command(about = "Live viewer for a swarm simulation's event stream")]
struct Cli {
    /// Publisher endpoint (ws://host:port); overrides --host/--port
    #[arg(long)]
    url: Option<String>,

    /// Publisher host
    #[arg(long)]
    host: Option<String>,

    /// Publisher port
    #[arg(short, long)]
    port: Option<u16>,

    /// Custom data directory (defaults to ~/.swarmview)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "swarm=debug,swarm_view=debug,info"
    } else {
        "swarm=info,swarm_view=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let config = SwarmViewConfig::new(cli.data_dir.clone())?;
    let mut file_config: FileConfig = load_config(&config.data_dir).extract()?;

    // CLI flags sit above config.toml and env vars.
    if let Some(url) = cli.url {
        file_config.publisher.url = Some(url);
    }
    if let Some(host) = cli.host {
        file_config.publisher.host = Some(host);
    }
    if let Some(port) = cli.port {
        file_config.publisher.port = port;
    }
    let viewer_config = ViewerConfig::from_file(&file_config);

    info!(url = %viewer_config.url, "starting swarm viewer");
    let handle = start_viewer(&viewer_config);

    // Presentation glue: a status line per connection change, frame detail
    // at debug. Anything richer than text belongs in a real frontend.
    let mut snapshots = handle.watch();
    let mut last_status = None;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                if last_status != Some(snap.connection) {
                    info!(status = snap.connection.label(), "connection status");
                    last_status = Some(snap.connection);
                }
                debug!(
                    title = %snap.settings.title,
                    agents = snap.roster.len(),
                    frame = snap.frame,
                    sim_time = snap.sim_time,
                    "world updated"
                );
            }
        }
    }

    info!("shutting down");
    handle.shutdown();
    Ok(())
}
