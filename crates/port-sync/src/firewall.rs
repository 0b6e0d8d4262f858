//! NAT forwarding rule synchronizer.
//!
//! [`FirewallSynchronizer`] translates declared [`ForwardingRule`]s and the
//! observed state of a container into iptables commands against the `nat`
//! table. It never tracks which rules it has installed: removal works by
//! listing each managed chain and deleting lines whose comment carries the
//! container's short ID.
//!
//! # Read-only mode
//!
//! Mutating commands (`-N`, `-F`, `-A`, `-D`) are logged and skipped,
//! reporting success. Chain listings still run, so removal in read-only
//! mode shows exactly which lines it would delete.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use portkeeper_core::metrics as m;
use portkeeper_core::types::{Container, ForwardingRule, parse_port_key, short_id};

use crate::command::{CommandRunner, command_line};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::listing::parse_rule_listing;

const NAT_TABLE: &str = "nat";

/// Outcome of adding rules for one or more containers.
///
/// Add failures are never fatal; they are counted here and logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddSummary {
    /// Rules inserted (or that would have been, in read-only mode).
    pub added: usize,
    /// Rules that could not be inserted.
    pub failed: usize,
}

impl AddSummary {
    fn merge(&mut self, other: AddSummary) {
        self.added += other.added;
        self.failed += other.failed;
    }
}

/// Maintains DNAT rules for running containers.
pub struct FirewallSynchronizer<R: CommandRunner> {
    runner: Arc<R>,
    rules: BTreeMap<String, Vec<ForwardingRule>>,
    chains: BTreeSet<String>,
    iptables_path: String,
    docker_interface: String,
    read_only: bool,
}

impl<R: CommandRunner> FirewallSynchronizer<R> {
    /// Creates a synchronizer for the rule table in `config`.
    ///
    /// The managed chain set is derived once here.
    pub fn new(runner: Arc<R>, config: &SyncConfig) -> Self {
        Self {
            runner,
            rules: config.rules.clone(),
            chains: config.chains(),
            iptables_path: config.iptables_path.clone(),
            docker_interface: config.docker_interface.clone(),
            read_only: config.read_only,
        }
    }

    /// Chains referenced by at least one rule.
    pub fn chains(&self) -> &BTreeSet<String> {
        &self.chains
    }

    /// Whether mutating commands are skipped.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Rules declared for a container name.
    pub fn rules_for(&self, container_name: &str) -> &[ForwardingRule] {
        self.rules
            .get(container_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Creates every managed chain, flushing chains that already exist.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ChainSetup` if a chain can be neither created
    /// nor flushed.
    pub async fn ensure_chains(&self) -> Result<(), SyncError> {
        for chain in &self.chains {
            let create = self.mutate(nat_args(["-N", chain.as_str()])).await;
            let Err(create_err) = create else {
                continue;
            };
            debug!(chain = %chain, error = %create_err, "chain creation failed, flushing instead");

            if let Err(flush_err) = self.mutate(nat_args(["-F", chain.as_str()])).await {
                error!(chain = %chain, error = %flush_err, "failed to set up chain");
                return Err(SyncError::ChainSetup {
                    chain: chain.clone(),
                    reason: flush_err.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Appends DNAT rules for every declared rule of `container` that
    /// matches one of its published host ports.
    ///
    /// Each command is independent: a failure is logged and counted, and
    /// the remaining rules are still attempted.
    pub async fn add_rules_for(&self, container: &Container) -> AddSummary {
        let mut summary = AddSummary::default();

        let rules = self.rules_for(&container.name);
        if rules.is_empty() {
            debug!(container_name = %container.name, "no forwarding rules declared");
            return summary;
        }

        let mut port_keys: Vec<&String> = container.ports.keys().collect();
        port_keys.sort();

        for rule in rules {
            let mut matched = false;

            for key in &port_keys {
                let Some((container_port, protocol)) = parse_port_key(key) else {
                    warn!(container_id = %container.short_id(), port = %key, "ignoring unparseable port key");
                    continue;
                };

                for binding in &container.ports[*key] {
                    if binding.host_port != rule.host_port {
                        continue;
                    }
                    matched = true;

                    if container.address.is_empty() {
                        warn!(
                            container_id = %container.short_id(),
                            container_name = %container.name,
                            "container has no address, skipping rule"
                        );
                        summary.failed += 1;
                        continue;
                    }

                    let proto = protocol.as_str();
                    let args = vec![
                        "-t".to_owned(),
                        NAT_TABLE.to_owned(),
                        "-A".to_owned(),
                        rule.chain.clone(),
                        "-d".to_owned(),
                        rule.destination().to_owned(),
                        "!".to_owned(),
                        "-i".to_owned(),
                        self.docker_interface.clone(),
                        "-p".to_owned(),
                        proto.to_owned(),
                        "-m".to_owned(),
                        proto.to_owned(),
                        "--dport".to_owned(),
                        rule.host_port.to_string(),
                        "-j".to_owned(),
                        "DNAT".to_owned(),
                        "--to-destination".to_owned(),
                        format!("{}:{}", container.address, container_port),
                        "-m".to_owned(),
                        "comment".to_owned(),
                        "--comment".to_owned(),
                        rule_comment(container),
                    ];

                    match self.mutate(args).await {
                        Ok(()) => {
                            summary.added += 1;
                            metrics::counter!(m::FIREWALL_RULES_ADDED_TOTAL, m::LABEL_CHAIN => rule.chain.clone())
                                .increment(1);
                        }
                        Err(e) => {
                            summary.failed += 1;
                            metrics::counter!(m::FIREWALL_RULE_ADD_FAILURES_TOTAL, m::LABEL_CHAIN => rule.chain.clone())
                                .increment(1);
                            error!(
                                container_id = %container.short_id(),
                                container_name = %container.name,
                                chain = %rule.chain,
                                error = %e,
                                "failed to add forwarding rule"
                            );
                        }
                    }
                }
            }

            if !matched {
                debug!(
                    container_name = %container.name,
                    rule = %rule,
                    "no published port matches rule"
                );
            }
        }

        summary
    }

    /// Deletes every rule tagged with the short ID of `container_id` from
    /// all managed chains.
    ///
    /// Lines are deleted highest first so earlier deletions do not shift
    /// the numbers of later ones. Returns the number of rules deleted.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::ListChain` or `SyncError::DeleteRule` on the
    /// first failure; remaining chains are not processed.
    pub async fn remove_rules_for(&self, container_id: &str) -> Result<usize, SyncError> {
        let tag = short_id(container_id);
        let mut removed = 0;

        for chain in &self.chains {
            let listing = self
                .query(nat_args(["-L", chain.as_str(), "-n", "--line-numbers"]))
                .await
                .map_err(|e| {
                    metrics::counter!(m::FIREWALL_REMOVAL_FAILURES_TOTAL, m::LABEL_CHAIN => chain.clone())
                        .increment(1);
                    SyncError::ListChain {
                        chain: chain.clone(),
                        reason: e.to_string(),
                    }
                })?;

            let mut lines: Vec<u32> = parse_rule_listing(&listing)
                .into_iter()
                .filter(|rule| rule.belongs_to(tag))
                .map(|rule| rule.line_number)
                .collect();
            lines.sort_unstable_by(|a, b| b.cmp(a));
            lines.dedup();

            for line in lines {
                let line_arg = line.to_string();
                self.mutate(nat_args(["-D", chain.as_str(), line_arg.as_str()]))
                    .await
                    .map_err(|e| {
                        metrics::counter!(m::FIREWALL_REMOVAL_FAILURES_TOTAL, m::LABEL_CHAIN => chain.clone())
                            .increment(1);
                        SyncError::DeleteRule {
                            chain: chain.clone(),
                            line,
                            reason: e.to_string(),
                        }
                    })?;

                removed += 1;
                metrics::counter!(m::FIREWALL_RULES_REMOVED_TOTAL, m::LABEL_CHAIN => chain.clone())
                    .increment(1);
                debug!(container_id = %tag, chain = %chain, line, "removed forwarding rule");
            }
        }

        Ok(removed)
    }

    /// Resets every managed chain and re-adds rules for `containers`.
    ///
    /// # Errors
    ///
    /// Returns the chain setup error if [`ensure_chains`](Self::ensure_chains)
    /// fails; individual add failures are only counted.
    pub async fn rebuild(
        &self,
        containers: &HashMap<String, Container>,
    ) -> Result<AddSummary, SyncError> {
        if let Err(e) = self.ensure_chains().await {
            metrics::counter!(m::FIREWALL_REBUILDS_TOTAL, m::LABEL_RESULT => "error").increment(1);
            return Err(e);
        }

        let mut ordered: Vec<&Container> = containers.values().collect();
        ordered.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        let mut summary = AddSummary::default();
        for container in ordered {
            summary.merge(self.add_rules_for(container).await);
        }

        if summary.failed > 0 {
            warn!(
                added = summary.added,
                failed = summary.failed,
                "rebuild finished with failed rules"
            );
        } else {
            info!(added = summary.added, chains = self.chains.len(), "rebuild finished");
        }
        metrics::counter!(m::FIREWALL_REBUILDS_TOTAL, m::LABEL_RESULT => "ok").increment(1);

        Ok(summary)
    }

    /// Runs a command that changes firewall state; skipped in read-only mode.
    async fn mutate(&self, args: Vec<String>) -> Result<(), SyncError> {
        let command = command_line(&self.iptables_path, &args);
        info!(command = %command, read_only = self.read_only, "iptables");
        if self.read_only {
            return Ok(());
        }
        self.execute(command, &args).await.map(|_| ())
    }

    /// Runs a command that only reads firewall state; always executed.
    async fn query(&self, args: Vec<String>) -> Result<String, SyncError> {
        let command = command_line(&self.iptables_path, &args);
        info!(command = %command, read_only = self.read_only, "iptables");
        self.execute(command, &args).await
    }

    async fn execute(&self, command: String, args: &[String]) -> Result<String, SyncError> {
        let started = Instant::now();
        let output = self.runner.run(&self.iptables_path, args).await;
        metrics::histogram!(m::FIREWALL_COMMAND_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let output = output?;
        if !output.success {
            return Err(SyncError::CommandFailed {
                command,
                code: output.code,
                output: output.combined(),
            });
        }
        Ok(output.stdout)
    }
}

/// Comment attached to every rule created for `container`.
///
/// The bracketed short ID is what removal matches on.
pub fn rule_comment(container: &Container) -> String {
    format!("Docker {}[{}]", container.name, container.short_id())
}

fn nat_args<const N: usize>(args: [&str; N]) -> Vec<String> {
    let mut out = Vec::with_capacity(N + 2);
    out.push("-t".to_owned());
    out.push(NAT_TABLE.to_owned());
    out.extend(args.iter().map(|a| (*a).to_owned()));
    out
}
