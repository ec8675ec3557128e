//! Rule Dispatcher
//!
//! Starts exactly one relay per configured rule and isolates each rule's
//! failures from the others and from the process as a whole. There is no
//! coordination between rules and no retry of a failed relay.

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Config, Protocol, Rule};
use crate::relay::{RelayError, TcpRelay, UdpRelay};
use crate::Result;

/// Starts and supervises one relay per forwarding rule
pub struct RuleDispatcher {
    config: Arc<Config>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RuleDispatcher {
    pub fn new(config: Arc<Config>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self::with_shutdown(config, shutdown_tx)
    }

    /// Create a dispatcher driven by an externally owned shutdown channel,
    /// typically the [`ShutdownCoordinator`](crate::ShutdownCoordinator)'s.
    pub fn with_shutdown(config: Arc<Config>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Clone of the shutdown trigger, for wiring into signal handling.
    pub fn shutdown_sender(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Signal every relay to stop.
    pub fn initiate_shutdown(&self) {
        info!("Initiating shutdown of all relays");
        if self.shutdown_tx.send(()).is_err() {
            warn!("No relays listening for shutdown signal");
        }
    }

    /// Start one relay per rule and wait for all of them to stop.
    ///
    /// An empty rule list is startup-fatal: there is nothing to forward,
    /// so the process should exit nonzero rather than idle. Individual
    /// relay failures are logged and isolated.
    pub async fn run(&self) -> Result<()> {
        if self.config.rules.is_empty() {
            anyhow::bail!("no forwarding rules configured");
        }

        info!("Starting {} forwarding rules", self.config.rules.len());

        let handles: Vec<JoinHandle<()>> = self
            .config
            .rules
            .iter()
            .cloned()
            .map(|rule| self.spawn_relay(rule))
            .collect();

        for handle in handles {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Relay task failed: {}", e);
                }
            }
        }

        info!("All relays stopped");
        Ok(())
    }

    fn spawn_relay(&self, rule: Rule) -> JoinHandle<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let result = match rule.protocol {
                Protocol::Tcp => TcpRelay::new(rule.clone()).run(shutdown_rx).await,
                Protocol::Udp => UdpRelay::new(rule.clone()).run(shutdown_rx).await,
            };

            if let Err(e) = result {
                report_relay_failure(&rule, &e);
            }
        })
    }
}

/// Log a rule-fatal relay error, with the privileged-port diagnostic when
/// the bind was refused for lack of permission.
fn report_relay_failure(rule: &Rule, error: &RelayError) {
    error!("Relay for rule [{}] stopped: {}", rule, error);
    if let Some(hint) = error.privileged_port_hint() {
        error!("{}", hint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_rule_list_is_fatal() {
        let dispatcher = RuleDispatcher::new(Arc::new(Config::default()));
        let err = dispatcher.run().await.unwrap_err();
        assert!(err.to_string().contains("no forwarding rules"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_all_relays() {
        let config = Config {
            debug: false,
            rules: vec![Rule {
                local_port: 48231,
                remote_port: 48232,
                remote_host: "127.0.0.1".to_string(),
                protocol: Protocol::Tcp,
            }],
        };
        let dispatcher = Arc::new(RuleDispatcher::new(Arc::new(config)));

        let runner = Arc::clone(&dispatcher);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        dispatcher.initiate_shutdown();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("dispatcher did not stop after shutdown")
            .expect("dispatcher task panicked");
        assert!(result.is_ok());
    }
}
