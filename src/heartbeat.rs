//! Periodic liveness probing of job-producer services.
//!
//! Every online job producer gets a HEAD request against its dispatch
//! endpoint. One failed probe puts the service on a watch list; a second
//! consecutive failure unregisters it, which also sweeps the jobs it was
//! running. A service that answers again after going offline is restored.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::DispatchClient;
use crate::registry::ServiceRegistry;

pub struct HeartbeatMonitor {
    registry: Arc<ServiceRegistry>,
    client: DispatchClient,
    /// Services that failed their last probe, keyed by (type, host).
    unresponsive: HashSet<(String, String)>,
}

impl HeartbeatMonitor {
    pub fn new(registry: Arc<ServiceRegistry>, client: DispatchClient) -> Self {
        Self {
            registry,
            client,
            unresponsive: HashSet::new(),
        }
    }

    /// Probe on a fixed delay until shutdown.
    pub async fn run(mut self, interval: Duration, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Heartbeat stopped");
                    return;
                }
                _ = timer.tick() => self.check_services().await,
            }
        }
    }

    /// One probe pass over all online job producers.
    pub async fn check_services(&mut self) {
        tracing::debug!("Checking for unresponsive services");

        let services = match self.registry.store().online_services().await {
            Ok(services) => services,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to load online services");
                return;
            }
        };
        let hosts = match self.registry.store().hosts().await {
            Ok(hosts) => hosts,
            Err(e) => {
                tracing::warn!(error = %e, "Unable to load host registrations");
                return;
            }
        };

        for service in services {
            if !service.job_producer {
                continue;
            }
            let in_maintenance = hosts
                .iter()
                .any(|host| host.base_url == service.host && host.maintenance_mode);
            if in_maintenance {
                continue;
            }

            let key = (service.service_type.clone(), service.host.clone());
            match self.client.ping(&service).await {
                Ok(200) => {
                    tracing::trace!(service = %service.service_type, host = %service.host,
                        "Service is responsive");
                    if self.unresponsive.remove(&key) {
                        tracing::info!(service = %service.service_type, host = %service.host,
                            "Service is still online");
                    } else if !service.online {
                        match self
                            .registry
                            .set_online_status(
                                &service.service_type,
                                &service.host,
                                Some(&service.path),
                                true,
                                Some(true),
                            )
                            .await
                        {
                            Ok(_) => {
                                tracing::info!(service = %service.service_type,
                                    host = %service.host, "Service is back online")
                            }
                            Err(e) => {
                                tracing::warn!(service = %service.service_type,
                                    host = %service.host, error = %e,
                                    "Error setting online status")
                            }
                        }
                    }
                    continue;
                }
                Ok(status) => {
                    if !service.online {
                        continue;
                    }
                    tracing::warn!(service = %service.service_type, host = %service.host,
                        status, "Service is not working as expected");
                }
                Err(e) => {
                    if !service.online {
                        continue;
                    }
                    tracing::warn!(service = %service.service_type, host = %service.host,
                        error = %e, "Unable to reach service");
                }
            }

            // The service did not respond as expected.
            if self.unresponsive.remove(&key) {
                tracing::warn!(service = %service.service_type, host = %service.host,
                    "Marking service as offline");
                if let Err(e) = self
                    .registry
                    .unregister_service(&service.service_type, &service.host)
                    .await
                {
                    tracing::warn!(service = %service.service_type, host = %service.host,
                        error = %e, "Unable to unregister unreachable service");
                }
            } else {
                self.unresponsive.insert(key);
                tracing::warn!(service = %service.service_type, host = %service.host,
                    "Added service to the watch list");
            }
        }

        tracing::debug!("Finished checking for unresponsive services");
    }
}
