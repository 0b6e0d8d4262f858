//! Keeps NAT port forwarding rules in step with running Docker containers.
//!
//! Declared forwarding rules are keyed by container name. When a container
//! with declared rules starts, DNAT rules are appended to the configured
//! chains; when it stops, every rule tagged with its short ID is deleted.
//! Any sign of drift between the registry and the runtime triggers a full
//! resync that rebuilds every managed chain.
//!
//! # Module Structure
//!
//! - [`error`]: Domain error types (`SyncError`)
//! - [`config`]: Engine configuration (`SyncConfig`, builder)
//! - [`event`]: Runtime lifecycle events (`RuntimeEvent`, `EventStatus`)
//! - [`docker`]: Docker API abstraction (`DockerClient` trait, `BollardDockerClient`)
//! - [`command`]: External command execution (`CommandRunner` trait, `ProcessRunner`)
//! - [`listing`]: Chain listing parser (`parse_rule_listing`)
//! - [`firewall`]: Rule maintenance (`FirewallSynchronizer`)
//! - [`registry`]: Tracked container state (`ContainerRegistry`)
//! - [`service`]: Event loop and lifecycle (`PortSync`, `PortSyncBuilder`)
//!
//! # Architecture
//!
//! ```text
//! Docker events --mpsc--> PortSync processor
//!                              |
//!                    ContainerRegistry.dispatch()
//!                              |
//!                    FirewallSynchronizer --> iptables -t nat
//! ```

pub mod command;
pub mod config;
pub mod docker;
pub mod error;
pub mod event;
pub mod firewall;
pub mod listing;
pub mod registry;
pub mod service;

// --- Public API Re-exports ---

// Service
pub use service::{PortSync, PortSyncBuilder};

// Configuration
pub use config::{SyncConfig, SyncConfigBuilder};

// Error
pub use error::SyncError;

// Events
pub use event::{EventStatus, RuntimeEvent};

// Runtime and command seams
pub use command::{CommandOutput, CommandRunner, ProcessRunner};
pub use docker::{BollardDockerClient, DockerClient};

// Engine
pub use firewall::{AddSummary, FirewallSynchronizer};
pub use listing::{ListedRule, parse_rule_listing};
pub use registry::ContainerRegistry;
