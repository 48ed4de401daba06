//! Persistence contract consumed by the registry.
//!
//! The registry talks to a transactional store through the [`JobStore`]
//! trait. Every method mirrors one of the named query intents of the
//! system; a relational backend maps them onto SQL, while the bundled
//! [`MemoryStore`] keeps everything in process for single-node setups and
//! tests. Job updates are guarded by an optimistic-lock version column:
//! a write against a stale version fails with `RegistryError::Conflict`.

pub mod memory;

pub use self::memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::registry::host::{HostRegistration, ServiceRegistration};
use crate::registry::job::{Job, JobStatus};

/// One accumulation row of the host-load query: the load of all jobs in
/// `status` executing on `service`, summed.
#[derive(Debug, Clone)]
pub struct HostLoadRow {
    pub service: ServiceRegistration,
    pub status: JobStatus,
    pub load: f32,
}

/// One row of the per-service job statistics feed.
#[derive(Debug, Clone)]
pub struct JobStatisticsRow {
    pub service_type: String,
    pub host: String,
    pub status: JobStatus,
    pub count: i64,
    /// Mean queue time in milliseconds over the jobs in this row.
    pub mean_queue_time: i64,
    /// Mean run time in milliseconds over the jobs in this row.
    pub mean_run_time: i64,
}

/// Filters of the job count queries. `None` means "any".
#[derive(Debug, Clone, Default)]
pub struct JobCountFilter<'a> {
    pub job_type: Option<&'a str>,
    pub host: Option<&'a str>,
    pub operation: Option<&'a str>,
    pub status: Option<JobStatus>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job, assigning its id. Returns the stored job.
    async fn create_job(&self, job: Job) -> Result<Job>;

    /// Load a job by id. `NotFound` if absent.
    async fn job(&self, id: i64) -> Result<Job>;

    /// Write a job back. The stored version must match `job.version`,
    /// otherwise the update fails with `Conflict`. On success the version
    /// is bumped and the stored row returned.
    async fn update_job(&self, job: &Job) -> Result<Job>;

    /// Delete a job and all of its descendants in one atomic operation.
    async fn delete_job_tree(&self, id: i64) -> Result<()>;

    /// Jobs filtered by optional type and status, ordered by creation date.
    async fn jobs(&self, job_type: Option<&str>, status: Option<JobStatus>) -> Result<Vec<Job>>;

    /// Dispatchable jobs in one of the given statuses, ordered by creation
    /// date.
    async fn dispatchable_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    /// Jobs in one of the given statuses currently held by the given
    /// processor (service type and host).
    async fn jobs_on_processor(
        &self,
        service_type: &str,
        host: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>>;

    /// Jobs in one of the given statuses, dispatchable or not. The startup
    /// sweep narrows the result to the local processor host.
    async fn undispatchable_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>>;

    /// Direct children of a job, ordered by creation date.
    async fn child_jobs(&self, id: i64) -> Result<Vec<Job>>;

    /// All jobs whose root is the given job, ordered by creation date.
    async fn root_child_jobs(&self, root_id: i64) -> Result<Vec<Job>>;

    /// Top-level jobs only.
    async fn jobs_without_parent(&self) -> Result<Vec<Job>>;

    /// Number of jobs matching the filter.
    async fn count_jobs(&self, filter: JobCountFilter<'_>) -> Result<i64>;

    /// Number of FAILED jobs ever processed by the given (type, host) pair.
    async fn failed_job_count(&self, service_type: &str, host: &str) -> Result<i64>;

    /// Per-service, per-status counts and mean times for jobs created at or
    /// after `since`.
    async fn job_statistics(&self, since: DateTime<Utc>) -> Result<Vec<JobStatisticsRow>>;

    /// Load of jobs in the given statuses, grouped by processor service and
    /// status.
    async fn host_load_rows(&self, statuses: &[JobStatus]) -> Result<Vec<HostLoadRow>>;

    /// Insert or update a host registration, keyed by base URL.
    async fn save_host(&self, host: HostRegistration) -> Result<()>;

    /// Host registration by base URL.
    async fn host(&self, base_url: &str) -> Result<Option<HostRegistration>>;

    /// All host registrations.
    async fn hosts(&self) -> Result<Vec<HostRegistration>>;

    /// Maximum load of a host. `NotFound` if the host is not registered.
    async fn max_load_of(&self, base_url: &str) -> Result<f32>;

    /// Insert or update a service registration, keyed by (type, host).
    async fn save_service(&self, service: ServiceRegistration) -> Result<()>;

    /// Service registration by (type, host).
    async fn service(&self, service_type: &str, host: &str)
        -> Result<Option<ServiceRegistration>>;

    /// All service registrations.
    async fn services(&self) -> Result<Vec<ServiceRegistration>>;

    /// Service registrations whose host is online.
    async fn online_services(&self) -> Result<Vec<ServiceRegistration>>;

    async fn services_by_type(&self, service_type: &str) -> Result<Vec<ServiceRegistration>>;

    async fn services_by_host(&self, host: &str) -> Result<Vec<ServiceRegistration>>;

    /// Number of registrations not in NORMAL state.
    async fn abnormal_service_count(&self) -> Result<i64>;
}
