use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use arbor::config;
use arbor::deploy::SharedScope;
use arbor::runtime_config::RuntimeConfig;
use arbor::server::{spawn_shutdown_monitor, EngineService, HttpServer};

#[derive(Parser)]
#[command(name = "arbor", about = "Hierarchical application server")]
struct Args {
    /// Server descriptor
    #[arg(long, default_value = "arbor.yaml")]
    config: PathBuf,
    /// Listen address for the HTTP connector
    #[arg(long, default_value = "0.0.0.0:8080", env = "ARBOR_LISTEN")]
    listen: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let runtime = RuntimeConfig::from_env();
    may::config().set_stack_size(runtime.stack_size);

    let server_config = config::load_config(&args.config)?;
    let shared = Arc::new(SharedScope::new());
    let root = config::build_tree(&server_config, &shared)?;
    root.start()?;

    let router = config::find_router(&root)
        .ok_or_else(|| anyhow::anyhow!("server descriptor defines no router"))?;
    let handle = HttpServer(EngineService::new(Arc::clone(&router))).start(&args.listen)?;
    info!(listen = %args.listen, router = %router.name(), "Accepting requests");

    {
        let root_state = root
            .root_state()
            .ok_or_else(|| anyhow::anyhow!("tree root is not a root container"))?;
        let root_for_shutdown = Arc::clone(&root);
        spawn_shutdown_monitor(
            root_state.shutdown_port,
            root_state.shutdown_command.clone(),
            move || {
                if let Err(e) = root_for_shutdown.stop() {
                    error!(error = %e, "Shutdown failed");
                }
                std::process::exit(0);
            },
        )?;
    }

    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let root_for_signal = Arc::clone(&root);
        let mut signals = Signals::new([SIGTERM, SIGINT])?;
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                info!("Termination signal received");
                if let Err(e) = root_for_signal.stop() {
                    error!(error = %e, "Shutdown failed");
                }
                std::process::exit(0);
            }
        });
    }

    handle
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))?;
    Ok(())
}
