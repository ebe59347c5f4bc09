use anyhow::Result;
use clap::Parser;
use scroll_mirror::cli::Cli;
use scroll_mirror::simulation;
use scroll_mirror::telemetry::logging;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init(&cli.logging.to_config())?;

    let Some(name) = cli.name.as_deref() else {
        warn!("no session name given (--name or SCROLL_MIRROR_SESSION); nothing to mirror");
        return Ok(());
    };

    let config = cli.simulation_config(name);
    info!(
        session = %config.session,
        replicas = config.replicas,
        gestures = config.gestures,
        min_delay = ?config.sync.min_delay,
        seed = config.seed,
        "starting scroll-mirror"
    );

    let report = simulation::run(config).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.converged {
        anyhow::bail!("replicas diverged: {}", report.diverged.join(", "));
    }
    Ok(())
}
