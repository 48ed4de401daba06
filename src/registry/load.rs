use std::collections::BTreeMap;

use serde::Serialize;

use crate::registry::host::{HostRegistration, ServiceRegistration, ServiceState};

#[derive(Debug, Clone, Serialize)]
pub struct NodeLoad {
    pub host: String,
    pub load_factor: f32,
}

/// Current load per host: the sum of the load factors of all jobs in a
/// load-influencing status whose processor lives on that host.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemLoad {
    nodes: BTreeMap<String, f32>,
}

impl SystemLoad {
    pub fn get(&self, host: &str) -> f32 {
        self.nodes.get(host).copied().unwrap_or(0.0)
    }

    pub fn contains_host(&self, host: &str) -> bool {
        self.nodes.contains_key(host)
    }

    /// Add to a host's load factor, creating the entry if needed.
    pub fn add(&mut self, host: &str, load: f32) {
        *self.nodes.entry(host.to_string()).or_insert(0.0) += load;
    }

    /// Make sure a host is present, with zero load if not seen before.
    pub fn ensure_host(&mut self, host: &str) {
        self.nodes.entry(host.to_string()).or_insert(0.0);
    }

    pub fn node_loads(&self) -> Vec<NodeLoad> {
        self.nodes
            .iter()
            .map(|(host, load)| NodeLoad {
                host: host.clone(),
                load_factor: *load,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Candidate services for a job type, ordered by ascending host load.
/// Filters out wrong types, ERROR state, maintenance hosts and offline
/// services. Does not enforce any capacity limit.
pub fn service_registrations_by_load(
    job_type: &str,
    services: &[ServiceRegistration],
    hosts: &[HostRegistration],
    load: &SystemLoad,
) -> Vec<ServiceRegistration> {
    let mut candidates: Vec<ServiceRegistration> = services
        .iter()
        .filter(|service| accepts_jobs(job_type, service, hosts))
        .cloned()
        .collect();
    candidates.sort_by(|a, b| load.get(&a.host).total_cmp(&load.get(&b.host)));
    candidates
}

/// Same as [`service_registrations_by_load`], additionally requiring the
/// host's current load to be strictly below its maximum load.
pub fn service_registrations_with_capacity(
    job_type: &str,
    services: &[ServiceRegistration],
    hosts: &[HostRegistration],
    load: &SystemLoad,
) -> Vec<ServiceRegistration> {
    let mut candidates: Vec<ServiceRegistration> = services
        .iter()
        .filter(|service| accepts_jobs(job_type, service, hosts))
        .filter(|service| {
            let max = hosts
                .iter()
                .find(|host| host.base_url == service.host)
                .map(|host| host.max_load);
            match max {
                Some(max) => load.get(&service.host) < max,
                None => {
                    tracing::warn!(host = %service.host, "Unable to determine max load");
                    true
                }
            }
        })
        .cloned()
        .collect();
    candidates.sort_by(|a, b| load.get(&a.host).total_cmp(&load.get(&b.host)));
    candidates
}

fn accepts_jobs(job_type: &str, service: &ServiceRegistration, hosts: &[HostRegistration]) -> bool {
    if service.service_type != job_type {
        return false;
    }
    if service.service_state == ServiceState::Error {
        tracing::trace!(service = %service.service_type, host = %service.host,
            "Not considering service in error state");
        return false;
    }
    let in_maintenance = hosts
        .iter()
        .any(|host| host.base_url == service.host && host.maintenance_mode);
    if in_maintenance {
        tracing::trace!(service = %service.service_type, host = %service.host,
            "Not considering service in maintenance mode");
        return false;
    }
    if !service.online {
        tracing::trace!(service = %service.service_type, host = %service.host,
            "Not considering offline service");
        return false;
    }
    true
}
