use anyhow::Result;
use clap::Parser;

use airscan_daemon::cli::DaemonCli;
use airscan_daemon::logging;
use airscan_daemon::orchestrator::{Orchestrator, load_config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    // 기본 경로의 설정 파일은 없어도 됨 (기본값 + 환경변수)
    let mut config = load_config(&cli.config, cli.uses_default_config()).await?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "airscan-daemon starting");

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("airscan-daemon shut down");
    Ok(())
}
