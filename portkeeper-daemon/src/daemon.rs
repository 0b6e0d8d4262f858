//! Daemon assembly and signal-driven run loop.
//!
//! [`Daemon`] builds the [`PortSync`] service from a validated
//! configuration, starts it, and then waits for signals:
//!
//! - `SIGHUP`: full resync of containers and managed chains
//! - `SIGINT` / `SIGTERM`: graceful shutdown

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use portkeeper_core::config::{EnvOverrideWarning, PortkeeperConfig};
use portkeeper_core::pipeline::Pipeline;
use portkeeper_sync::{
    BollardDockerClient, PortSync, PortSyncBuilder, ProcessRunner, SyncConfig,
};

use crate::cli::DaemonCli;
use crate::metrics_server;

/// Loads the configuration named on the command line and applies CLI
/// overrides on top of file and environment values.
///
/// Validation runs once, after every layer is applied. Environment values
/// that failed to parse are returned alongside the configuration so they
/// can be logged once tracing is initialized.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, or if the
/// final configuration fails validation.
pub async fn load_config(cli: &DaemonCli) -> Result<(PortkeeperConfig, Vec<EnvOverrideWarning>)> {
    let (mut config, warnings) = PortkeeperConfig::load_unvalidated(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
    Ok((config, warnings))
}

/// One-line summary of what a configuration manages.
pub fn config_summary(config: &PortkeeperConfig) -> String {
    format!(
        "loaded {} rules, {} chains",
        config.rule_count(),
        config.chains().len()
    )
}

/// The running daemon.
pub struct Daemon {
    config: PortkeeperConfig,
    sync: PortSync<BollardDockerClient, ProcessRunner>,
}

impl Daemon {
    /// Load configuration from `config_path` and build the daemon.
    ///
    /// Environment overrides are applied; CLI overrides are not.
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = PortkeeperConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config)
    }

    /// Build from an already-loaded configuration.
    pub fn build_from_config(config: PortkeeperConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        let docker = Arc::new(
            BollardDockerClient::connect(&config.docker.socket)
                .map_err(|e| anyhow::anyhow!("failed to create docker client: {}", e))?,
        );

        let sync = PortSyncBuilder::new()
            .config(SyncConfig::from_core(&config))
            .docker_client(docker)
            .command_runner(Arc::new(ProcessRunner::new()))
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build port sync: {}", e))?;

        Ok(Self { config, sync })
    }

    /// The effective configuration.
    pub fn config(&self) -> &PortkeeperConfig {
        &self.config
    }

    /// Start the listener and sync service, then block until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics listener cannot be installed or the
    /// initial resync fails. Errors after startup are logged, not returned.
    pub async fn run(mut self) -> Result<()> {
        metrics_server::install_metrics_recorder(&self.config.health)?;
        metrics_server::record_daemon_metrics(self.config.firewall.read_only);

        if self.config.firewall.read_only {
            tracing::warn!("read-only mode: firewall rules will be logged, not changed");
        }

        self.sync
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start port sync: {}", e))?;
        tracing::info!(
            socket = %self.config.docker.socket,
            "portkeeper-daemon running"
        );

        self.wait_for_shutdown().await?;

        tracing::info!("shutdown signal received");
        if let Err(e) = self.sync.stop().await {
            tracing::error!(error = %e, "failed to stop port sync");
        }
        tracing::info!("portkeeper-daemon shut down");
        Ok(())
    }

    #[cfg(unix)]
    async fn wait_for_shutdown(&self) -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut hangup = signal(SignalKind::hangup())?;
        let mut terminate = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = hangup.recv() => {
                    tracing::info!("SIGHUP received, resyncing");
                    if let Err(e) = self.sync.registry().resync().await {
                        tracing::error!(error = %e, "operator resync failed");
                    }
                    let health = self.sync.health_check().await;
                    tracing::info!(health = %health, "health after resync");
                }
                _ = terminate.recv() => return Ok(()),
                result = tokio::signal::ctrl_c() => return result.map_err(Into::into),
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_shutdown(&self) -> Result<()> {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
