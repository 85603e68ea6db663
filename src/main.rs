use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use homecare::config::{self, Config};
use homecare::core_state::CoreState;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("Homecare starting v{}", config::APP_VERSION);

    if let Err(e) = run() {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let bind_addr = config.bind_addr;

    // The generator's blocking HTTP client must be built and dropped outside
    // the async runtime.
    let core = Arc::new(CoreState::open(config)?);
    core.startup_maintenance()?;

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let served = runtime.block_on(serve(core.clone(), bind_addr));
    drop(runtime);

    core.shutdown();
    served
}

async fn serve(core: Arc<CoreState>, addr: std::net::SocketAddr) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = homecare::api::start(core, addr).await?;
    tracing::info!(addr = %server.addr, "Listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, shutting down");
    server.shutdown();
    server.stopped().await;
    Ok(())
}
