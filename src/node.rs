use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::DispatchClient;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::heartbeat::HeartbeatMonitor;
use crate::registry::ServiceRegistry;

/// A running registry node: the local host registration plus the periodic
/// dispatcher and heartbeat tasks.
pub struct RegistryNode {
    pub registry: Arc<ServiceRegistry>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RegistryNode {
    /// Start the node.
    ///
    /// 1. Cancels jobs orphaned on this host by the previous shutdown
    /// 2. Registers the local host
    /// 3. Spawns the dispatcher and heartbeat tasks (unless disabled)
    /// 4. Optionally spawns the status dashboard
    pub async fn start(
        registry: Arc<ServiceRegistry>,
        client: DispatchClient,
        dashboard_addr: Option<SocketAddr>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        tracing::info!(host = registry.local_host(), "Activating service registry");

        registry.clean_undispatchable_jobs().await;

        let config = registry.config().clone();
        let address = host_address(&config.host_url);
        registry
            .register_host(
                &config.host_url,
                &address,
                config.memory,
                config.cores,
                config.max_load,
            )
            .await?;
        tracing::info!(max_load = %config.max_load, "Node maximum load set");

        let mut tasks = Vec::new();

        if config.heartbeat_interval > Duration::ZERO {
            tracing::debug!(
                seconds = config.heartbeat_interval.as_secs(),
                "Starting service heartbeat"
            );
            let heartbeat = HeartbeatMonitor::new(registry.clone(), client.clone());
            tasks.push(tokio::spawn(
                heartbeat.run(config.heartbeat_interval, shutdown.clone()),
            ));
        }

        if config.dispatch_interval > Duration::ZERO {
            tracing::debug!(
                millis = config.dispatch_interval.as_millis() as u64,
                "Starting job dispatching"
            );
            let dispatcher = Dispatcher::new(registry.clone(), client);
            tasks.push(tokio::spawn(
                dispatcher.run(config.dispatch_interval, shutdown.clone()),
            ));
        }

        if let Some(addr) = dashboard_addr {
            let state = DashboardState {
                registry: registry.clone(),
            };
            tasks.push(tokio::spawn(run_dashboard(addr, state)));
        }

        Ok(Self {
            registry,
            shutdown,
            tasks,
        })
    }

    /// Stop the periodic tasks and unregister the local host.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!(host = self.registry.local_host(), "Deactivating service registry");
        self.shutdown.cancel();
        for task in self.tasks {
            task.abort();
        }
        self.registry
            .unregister_host(&self.registry.local_host().to_string())
            .await
    }
}

/// Arm SIGTERM/SIGINT handling for a registry node.
///
/// Returns the token [`RegistryNode::start`] should be given. On the first
/// signal the token is cancelled: the dispatcher and heartbeat observe it,
/// finish the tick they are in and stop, after which the caller invokes
/// [`RegistryNode::shutdown`] to unregister the local host. Jobs this node
/// was executing stay in the store and are cancelled by the recovery sweep
/// of the next startup.
pub fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let armed = token.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let received = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = received, "Stopping dispatch after the current tick");
        armed.cancel();
    });

    token
}

/// Best-effort host part of a base URL, for the registration's address
/// column.
fn host_address(base_url: &str) -> String {
    let stripped = base_url
        .strip_prefix("https://")
        .or_else(|| base_url.strip_prefix("http://"))
        .unwrap_or(base_url);
    stripped
        .split(['/', ':'])
        .next()
        .unwrap_or(stripped)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_address_strips_scheme_and_port() {
        assert_eq!(host_address("http://node1:8080"), "node1");
        assert_eq!(host_address("https://node1.example.org/path"), "node1.example.org");
        assert_eq!(host_address("node1"), "node1");
    }
}
