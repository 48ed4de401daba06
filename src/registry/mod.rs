//! The service registry: hosts, services and the job lifecycle.
//!
//! This module owns the shared state of the cluster:
//! - **Registration manager**: hosts announce themselves and the services
//!   they publish; unregistration and maintenance mode take them out of
//!   dispatching without deleting history.
//! - **Job lifecycle**: creation, updates with timestamp bookkeeping,
//!   cascading removal and the query surface (see `lifecycle`).
//! - **Load accounting**: the per-host sum of load factors of all jobs in
//!   a load-influencing status.
//! - **Service health**: NORMAL/WARNING/ERROR per registration, driven by
//!   job outcomes correlated by job signature (see `health`).
//! - **Recovery**: cancelling jobs orphaned by an unclean shutdown.
//!
//! The periodic dispatcher and heartbeat tasks live in their own modules
//! and drive this registry through its public API.

pub mod health;
pub mod host;
pub mod job;
pub mod lifecycle;
pub mod load;

pub use host::{HostRegistration, ServiceRegistration, ServiceState};
pub use job::{FailureReason, Job, JobStatus};
pub use load::{NodeLoad, SystemLoad};

use std::sync::Arc;

use crate::config::RegistryConfig;
use crate::directory::Directory;
use crate::error::{RegistryError, Result};
use crate::registry::job::{
    JOB_STATUSES_INFLUENCING_LOAD_BALANCING, START_OPERATION, TYPE_WORKFLOW,
};
use crate::store::JobStore;

pub struct ServiceRegistry {
    store: Arc<dyn JobStore>,
    directory: Arc<dyn Directory>,
    config: RegistryConfig,
}

impl ServiceRegistry {
    pub fn new(
        store: Arc<dyn JobStore>,
        directory: Arc<dyn Directory>,
        config: RegistryConfig,
    ) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn directory(&self) -> &Arc<dyn Directory> {
        &self.directory
    }

    /// Base URL of the registry node itself.
    pub fn local_host(&self) -> &str {
        &self.config.host_url
    }

    // --- Registration manager -------------------------------------------

    /// Register a host or update an existing registration. The host comes
    /// back online.
    pub async fn register_host(
        &self,
        host: &str,
        address: &str,
        memory: i64,
        cores: i32,
        max_load: f32,
    ) -> Result<()> {
        if host.trim().is_empty() {
            return Err(RegistryError::InvalidArgument("host must not be blank".into()));
        }
        let registration = match self.store.host(host).await? {
            Some(mut existing) => {
                existing.ip_address = address.to_string();
                existing.memory = memory;
                existing.cores = cores;
                existing.max_load = max_load;
                existing.online = true;
                existing
            }
            None => HostRegistration::new(host, address, memory, cores, max_load),
        };
        tracing::info!(host, %max_load, "Registering host");
        self.store.save_host(registration).await
    }

    /// Take a host offline and unregister every service it publishes.
    pub async fn unregister_host(&self, host: &str) -> Result<()> {
        let mut registration = self
            .store
            .host(host)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("host {host} is not registered")))?;
        registration.online = false;
        for service in self.store.services_by_host(host).await? {
            self.unregister_service(&service.service_type, host).await?;
        }
        tracing::info!(host, "Unregistering host");
        self.store.save_host(registration).await
    }

    /// Re-enable a disabled host and all of its services.
    pub async fn enable_host(&self, host: &str) -> Result<()> {
        let mut registration = self
            .store
            .host(host)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("host {host} is not registered")))?;
        registration.active = true;
        self.store.save_host(registration).await?;
        for mut service in self.store.services_by_host(host).await? {
            service.active = true;
            self.store.save_service(service).await?;
        }
        tracing::info!(host, "Enabling host");
        Ok(())
    }

    /// Administratively disable a host and all of its services.
    pub async fn disable_host(&self, host: &str) -> Result<()> {
        let mut registration = self
            .store
            .host(host)
            .await?
            .ok_or_else(|| RegistryError::NotFound(format!("host {host} is not registered")))?;
        registration.active = false;
        for mut service in self.store.services_by_host(host).await? {
            service.active = false;
            self.store.save_service(service).await?;
        }
        tracing::info!(host, "Disabling host");
        self.store.save_host(registration).await
    }

    pub async fn set_maintenance_status(&self, host: &str, maintenance: bool) -> Result<()> {
        let mut registration = self.store.host(host).await?.ok_or_else(|| {
            RegistryError::NotFound(format!(
                "can not set maintenance mode on unregistered host {host}"
            ))
        })?;
        registration.maintenance_mode = maintenance;
        tracing::info!(host, maintenance, "Setting maintenance mode");
        self.store.save_host(registration).await
    }

    /// Register a service or bring an existing registration back online.
    /// Jobs left running on the registration from a previous incarnation
    /// are swept first.
    pub async fn register_service(
        &self,
        service_type: &str,
        host: &str,
        path: &str,
        job_producer: bool,
    ) -> Result<ServiceRegistration> {
        self.clean_running_jobs(service_type, host).await?;
        self.set_online_status(service_type, host, Some(path), true, Some(job_producer))
            .await
    }

    /// Take a service offline and sweep the jobs it was executing.
    pub async fn unregister_service(&self, service_type: &str, host: &str) -> Result<()> {
        tracing::info!(service = service_type, host, "Unregistering service");
        self.set_online_status(service_type, host, None, false, None)
            .await?;
        self.clean_running_jobs(service_type, host).await
    }

    /// Shared upsert behind service registration changes. `path` and
    /// `job_producer` are only written when given, so an online/offline
    /// flip does not lose registration details.
    pub async fn set_online_status(
        &self,
        service_type: &str,
        host: &str,
        path: Option<&str>,
        online: bool,
        job_producer: Option<bool>,
    ) -> Result<ServiceRegistration> {
        if service_type.trim().is_empty() || host.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "service type and host must not be blank".into(),
            ));
        }
        if self.store.host(host).await?.is_none() {
            return Err(RegistryError::Store(format!(
                "a service registration can not be updated without a host registration for {host}"
            )));
        }
        let registration = match self.store.service(service_type, host).await? {
            Some(mut existing) => {
                if let Some(path) = path {
                    if !path.trim().is_empty() {
                        existing.path = path.to_string();
                    }
                }
                existing.online = online;
                if let Some(job_producer) = job_producer {
                    existing.job_producer = job_producer;
                }
                existing
            }
            None => {
                let path = path.map(str::trim).filter(|p| !p.is_empty()).ok_or_else(|| {
                    RegistryError::InvalidArgument(
                        "path must not be blank when registering new services".into(),
                    )
                })?;
                let mut created =
                    ServiceRegistration::new(service_type, host, path, job_producer.unwrap_or(false));
                created.online = online;
                created
            }
        };
        self.store.save_service(registration.clone()).await?;
        Ok(registration)
    }

    pub async fn service_registration(
        &self,
        service_type: &str,
        host: &str,
    ) -> Result<Option<ServiceRegistration>> {
        self.store.service(service_type, host).await
    }

    pub async fn service_registrations(&self) -> Result<Vec<ServiceRegistration>> {
        self.store.services().await
    }

    pub async fn host_registrations(&self) -> Result<Vec<HostRegistration>> {
        self.store.hosts().await
    }

    /// Sweep every job the given registration was executing. Dispatchable
    /// jobs are rescheduled through RESTART with their children cancelled;
    /// jobs pinned to the vanished service can only fail.
    async fn clean_running_jobs(&self, service_type: &str, host: &str) -> Result<()> {
        let stuck = self
            .store
            .jobs_on_processor(
                service_type,
                host,
                &[JobStatus::Running, JobStatus::Dispatching, JobStatus::Waiting],
            )
            .await?;
        for job in stuck {
            // Re-read: a previous iteration may have swept this job along
            // with its siblings.
            let mut job = match self.store.job(job.id).await {
                Ok(job) => job,
                Err(RegistryError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            if !job.dispatchable {
                tracing::info!(job_id = job.id, "Marking lost job as failed");
                job.status = JobStatus::Failed;
                self.store.update_job(&job).await?;
                continue;
            }
            if matches!(job.status, JobStatus::Canceled | JobStatus::Restart) {
                continue;
            }
            if let Some(root_id) = job.root {
                let root = self.store.job(root_id).await?;
                if root.status == JobStatus::Paused {
                    self.cancel_all_children(root_id).await?;
                    let mut root = self.store.job(root_id).await?;
                    root.status = JobStatus::Restart;
                    root.operation = START_OPERATION.to_string();
                    self.store.update_job(&root).await?;
                    continue;
                }
            }
            tracing::info!(job_id = job.id, "Marking child jobs as canceled");
            self.cancel_all_children(job.id).await?;
            tracing::info!(job_id = job.id, "Rescheduling lost job");
            let mut job = self.store.job(job.id).await?;
            job.status = JobStatus::Restart;
            job.processor_host = None;
            self.store.update_job(&job).await?;
        }
        Ok(())
    }

    /// Recursively cancel every descendant of a job.
    async fn cancel_all_children(&self, id: i64) -> Result<()> {
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for child in self.store.child_jobs(parent).await? {
                frontier.push(child.id);
                if child.status == JobStatus::Canceled {
                    continue;
                }
                let mut child = self.store.job(child.id).await?;
                child.status = JobStatus::Canceled;
                self.store.update_job(&child).await?;
            }
        }
        Ok(())
    }

    // --- Load accounting ------------------------------------------------

    /// Current load per host. With `active_only`, services that are
    /// offline or whose host is in maintenance contribute nothing. Every
    /// registered host appears in the result, at zero if idle. Workflow
    /// services are excluded: workflows are balanced by the workflow
    /// service itself.
    pub async fn host_loads(&self, active_only: bool) -> Result<SystemLoad> {
        let rows = self
            .store
            .host_load_rows(&JOB_STATUSES_INFLUENCING_LOAD_BALANCING)
            .await?;
        let hosts = self.store.hosts().await?;
        let mut load = SystemLoad::default();
        for row in rows {
            if row.service.service_type == TYPE_WORKFLOW {
                continue;
            }
            if active_only {
                let in_maintenance = hosts
                    .iter()
                    .any(|host| host.base_url == row.service.host && host.maintenance_mode);
                if in_maintenance || !row.service.online {
                    continue;
                }
            }
            if !row.status.influences_load() {
                continue;
            }
            load.add(&row.service.host, row.load);
        }
        for host in &hosts {
            load.ensure_host(&host.base_url);
        }
        Ok(load)
    }

    /// Maximum load per registered host.
    pub async fn max_loads(&self) -> Result<SystemLoad> {
        let mut load = SystemLoad::default();
        for host in self.store.hosts().await? {
            load.add(&host.base_url, host.max_load);
        }
        Ok(load)
    }

    /// Maximum load of one host. `NotFound` if the host is not registered.
    pub async fn max_load_on_host(&self, host: &str) -> Result<NodeLoad> {
        let max_load = self.store.max_load_of(host).await?;
        Ok(NodeLoad {
            host: host.to_string(),
            load_factor: max_load,
        })
    }

    /// Candidate services of a type ordered by ascending host load, with
    /// hosts at their load limit filtered out.
    pub async fn service_registrations_with_capacity(
        &self,
        job_type: &str,
    ) -> Result<Vec<ServiceRegistration>> {
        let load = self.host_loads(true).await?;
        let services = self.store.services().await?;
        let hosts = self.store.hosts().await?;
        Ok(load::service_registrations_with_capacity(
            job_type, &services, &hosts, &load,
        ))
    }

    /// Candidate services of a type ordered by ascending host load.
    pub async fn service_registrations_by_load(
        &self,
        job_type: &str,
    ) -> Result<Vec<ServiceRegistration>> {
        let load = self.host_loads(true).await?;
        let services = self.store.services().await?;
        let hosts = self.store.hosts().await?;
        Ok(load::service_registrations_by_load(
            job_type, &services, &hosts, &load,
        ))
    }

    // --- Recovery -------------------------------------------------------

    /// Cancel all jobs orphaned on the local host by a previous shutdown.
    /// Called once on startup, before the periodic tasks are scheduled.
    /// Failures are logged, never fatal.
    pub async fn clean_undispatchable_jobs(&self) {
        let local = self.local_host().to_string();
        let orphans = match self
            .store
            .undispatchable_jobs(&[JobStatus::Instantiated, JobStatus::Running])
            .await
        {
            Ok(orphans) => orphans,
            Err(e) => {
                tracing::error!(error = %e, "Unable to clean undispatchable jobs");
                return;
            }
        };
        for mut job in orphans {
            if job.processor_host.as_deref() != Some(local.as_str()) {
                tracing::debug!(job_id = job.id, "Undispatchable job runs on a different host");
                continue;
            }
            tracing::info!(job_id = job.id, "Cancelling orphaned undispatchable job");
            job.status = JobStatus::Canceled;
            if let Err(e) = self.store.update_job(&job).await {
                tracing::error!(job_id = job.id, error = %e, "Unable to cancel orphaned job");
            }
        }
    }
}
