use anyhow::Result;
use clap::Parser;

use portkeeper_daemon::cli::DaemonCli;
use portkeeper_daemon::daemon::{self, Daemon};
use portkeeper_daemon::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();
    let (config, env_warnings) = daemon::load_config(&cli).await?;

    if cli.validate {
        for warning in &env_warnings {
            eprintln!("warning: {warning} (value: {:?})", warning.value);
        }
        println!("{}: OK ({})", cli.config.display(), daemon::config_summary(&config));
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    for warning in &env_warnings {
        tracing::warn!(
            env_key = warning.key,
            value = warning.value.as_str(),
            "{warning}"
        );
    }
    tracing::info!(
        config = %cli.config.display(),
        read_only = config.firewall.read_only,
        "portkeeper-daemon starting"
    );
    tracing::info!("{}", daemon::config_summary(&config));

    Daemon::build_from_config(config)?.run().await
}
