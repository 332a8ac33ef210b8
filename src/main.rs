use chain_dashboard::dashboard::sink::RefreshState;
use chain_dashboard::{Config, Dashboard};
use eyre::{Result, WrapErr};
use futures::StreamExt;
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().wrap_err("failed to load configuration")?;
    info!(
        network = %config.endpoint.network_name,
        provider = %config.endpoint.provider_url,
        "loaded configuration"
    );

    let mut dashboard = Dashboard::connect(&config)
        .await
        .wrap_err("failed to set up dashboard")?;
    if let Some(metadata) = dashboard.sink().snapshot().contract_metadata {
        for (getter, value) in &metadata {
            info!(%getter, %value, "contract metadata");
        }
    }

    let mut stream = dashboard.sink().stream();
    dashboard.start()?;

    // consume stream
    loop {
        tokio::select! {
            Some(state) = stream.next() => render(&state),
            signal = tokio::signal::ctrl_c() => {
                signal.wrap_err("failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    dashboard.stop();
    info!(stats = ?dashboard.poller().stats(), "dashboard stopped");
    Ok(())
}

fn render(state: &RefreshState) {
    let Some(number) = state.latest_block_number else {
        return;
    };
    let block = state.latest_block.as_ref();
    info!(
        number,
        hash = ?block.map(|b| b.hash),
        timestamp = ?block.map(|b| b.timestamp),
        updated = ?state.last_update_time,
        "latest block"
    );
}

/// `RUST_LOG` overrides the default `info` filter.
fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
