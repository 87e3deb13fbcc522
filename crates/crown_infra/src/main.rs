use anyhow::Context;
use crown_infra::cli::CliArgs;
use crown_infra::logging::setup_logging;
use crown_infra::signals::wait_for_shutdown;
use crown_infra::{AppConfig, InfraBootstrap};
use tracing::{error, info};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Configuration is loaded before logging so the configured level applies.
    let mut config = AppConfig::load_from_file(&args.config_path)
        .await
        .with_context(|| format!("loading {}", args.config_path.display()))?;
    config.apply_cli(&args)?;
    config
        .validate()
        .context("Configuration validation failed")?;

    setup_logging(&config.logging).context("installing the log subscriber")?;
    info!(
        "🌟 crown-infra v{} | config: {}",
        env!("CARGO_PKG_VERSION"),
        args.config_path.display()
    );

    let mut node = InfraBootstrap::new(config);
    if let Err(e) = node.start().await {
        error!("❌ Startup failed: {}", e);
        return Err(e.into());
    }

    info!("🛑 Press Ctrl+C to gracefully shutdown");
    let signal_result = wait_for_shutdown().await;
    info!("🛑 Shutdown signal received, stopping services...");
    node.stop().await;

    signal_result.context("waiting for shutdown signal")?;
    Ok(())
}
