// Relay entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr)
// 2. Load config
// 3. Bind the relay
// 4. Run until Ctrl+C
// 5. Shut down: stop accepting, stop the heartbeat sweep, close clients

use pindrop::config;
use pindrop::relay::Relay;

use anyhow::Context;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("Relay starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: port={}, heartbeat={}s",
        config.port, config.heartbeat_secs
    );

    let relay = Relay::bind(config.relay_config())
        .await
        .context("failed to bind relay")?;
    let handle = relay.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Ctrl+C received, shutting down");

    handle.shutdown().await;

    info!("Relay shut down cleanly");
    Ok(())
}

/// Initialize tracing to stderr with an env-overridable filter.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pindrop=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
