//! CLI argument definitions for portkeeper-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use portkeeper_core::config::PortkeeperConfig;

/// Docker port forwarding daemon.
///
/// Watches container start/stop events and keeps iptables NAT DNAT rules
/// in step with the declared forwarding rules.
#[derive(Parser, Debug)]
#[command(name = "portkeeper-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Docker socket URL (unix:///var/run/docker.sock, tcp://host:port).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(short, long)]
    pub socket: Option<String>,

    /// Path to the configuration file (.toml, or legacy .json).
    #[arg(short, long, default_value = "/etc/portkeeper/portkeeper.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log firewall commands without executing any that modify rules.
    #[arg(long)]
    pub read_only: bool,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

impl DaemonCli {
    /// Applies command-line overrides on top of a loaded configuration.
    ///
    /// `--read-only` can only enable dry-run, never disable it.
    pub fn apply_overrides(&self, config: &mut PortkeeperConfig) {
        if let Some(socket) = &self.socket {
            config.docker.socket = socket.clone();
        }
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if self.read_only {
            config.firewall.read_only = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cli = DaemonCli::parse_from(["portkeeper-daemon"]);
        assert_eq!(cli.config, PathBuf::from("/etc/portkeeper/portkeeper.toml"));
        assert!(cli.socket.is_none());
        assert!(!cli.read_only);
        assert!(!cli.validate);
    }

    #[test]
    fn short_flags() {
        let cli = DaemonCli::parse_from([
            "portkeeper-daemon",
            "-s",
            "tcp://127.0.0.1:2375",
            "-c",
            "config/iptables.json",
        ]);
        assert_eq!(cli.socket.as_deref(), Some("tcp://127.0.0.1:2375"));
        assert_eq!(cli.config, PathBuf::from("config/iptables.json"));
    }

    #[test]
    fn overrides_take_precedence() {
        let cli = DaemonCli::parse_from([
            "portkeeper-daemon",
            "--socket",
            "unix:///run/docker.sock",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--read-only",
        ]);
        let mut config = PortkeeperConfig::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.docker.socket, "unix:///run/docker.sock");
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "pretty");
        assert!(config.firewall.read_only);
    }

    #[test]
    fn read_only_flag_absent_keeps_config_value() {
        let cli = DaemonCli::parse_from(["portkeeper-daemon"]);
        let mut config = PortkeeperConfig::default();
        config.firewall.read_only = true;
        cli.apply_overrides(&mut config);
        assert!(config.firewall.read_only);
    }
}
