use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A worker node known to the registry. Hosts are created on their first
/// registration and are never deleted, only taken offline or disabled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostRegistration {
    /// Unique identity of the host.
    pub base_url: String,
    pub ip_address: String,
    pub memory: i64,
    pub cores: i32,
    /// Load budget of this host, typically the number of cores.
    pub max_load: f32,
    pub online: bool,
    /// Administrative enable flag.
    pub active: bool,
    pub maintenance_mode: bool,
}

impl HostRegistration {
    pub fn new(
        base_url: impl Into<String>,
        ip_address: impl Into<String>,
        memory: i64,
        cores: i32,
        max_load: f32,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            ip_address: ip_address.into(),
            memory,
            cores,
            max_load,
            online: true,
            active: true,
            maintenance_mode: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Normal,
    Warning,
    Error,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Normal => write!(f, "normal"),
            ServiceState::Warning => write!(f, "warning"),
            ServiceState::Error => write!(f, "error"),
        }
    }
}

/// A service implementation published by a host. Identified by the
/// (service type, host) pair; a registration cannot outlive its host row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub service_type: String,
    /// Base URL of the owning host.
    pub host: String,
    /// Relative URL under which the service accepts dispatch requests.
    pub path: String,
    pub online: bool,
    pub active: bool,
    /// Whether this service owns the execution of jobs of its type.
    pub job_producer: bool,
    pub service_state: ServiceState,
    pub state_changed: DateTime<Utc>,
    /// Signature of the job that put this service into WARNING, 0 if none.
    pub warning_state_trigger: i64,
    /// Signature of the job that put this service into ERROR, 0 if none.
    pub error_state_trigger: i64,
}

impl ServiceRegistration {
    pub fn new(
        service_type: impl Into<String>,
        host: impl Into<String>,
        path: impl Into<String>,
        job_producer: bool,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            host: host.into(),
            path: path.into(),
            online: true,
            active: true,
            job_producer,
            service_state: ServiceState::Normal,
            state_changed: Utc::now(),
            warning_state_trigger: 0,
            error_state_trigger: 0,
        }
    }

    /// Transition the health state, recording the triggering job signature
    /// for WARNING and ERROR.
    pub fn set_state(&mut self, state: ServiceState, trigger: i64) {
        match state {
            ServiceState::Warning => self.warning_state_trigger = trigger,
            ServiceState::Error => self.error_state_trigger = trigger,
            ServiceState::Normal => {}
        }
        self.service_state = state;
        self.state_changed = Utc::now();
    }

    /// True when both registrations name the same (type, host) pair.
    pub fn same_registration(&self, other: &ServiceRegistration) -> bool {
        self.service_type == other.service_type && self.host == other.host
    }

    pub fn dispatch_url(&self) -> String {
        format!("{}{}/dispatch", self.host, self.path)
    }
}
