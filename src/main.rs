use signalgrid::{Config, Engine};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    tracing::info!(mode = ?config.trading.mode, "starting signalgrid");

    let engine = Engine::build(config).await?;
    let shutdown = engine.shutdown_handle();

    let engine_task = tokio::spawn(engine.run());

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("ctrl-c received, shutting down");
        }
        result = &engine_task => {
            return match result {
                Ok(inner) => inner,
                Err(e) => Err(anyhow::anyhow!("engine task panicked: {e}")),
            };
        }
    }

    let _ = shutdown.send(true);
    engine_task.await??;
    Ok(())
}
