//! Job lifecycle: creation, updates, removal and the query surface.

use chrono::{Duration, Utc};

use crate::current_job;
use crate::error::{RegistryError, Result};
use crate::registry::job::{Job, JobStatus, RESUME, START_OPERATION, START_WORKFLOW, TYPE_WORKFLOW};
use crate::registry::ServiceRegistry;
use crate::store::JobCountFilter;

/// Everything needed to create a job. `host` defaults to the local host,
/// `parent` to the task-local current job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_type: String,
    pub operation: String,
    pub arguments: Vec<String>,
    pub payload: Option<String>,
    pub dispatchable: bool,
    pub job_load: f32,
    pub host: Option<String>,
    pub parent: Option<i64>,
    pub creator: String,
    pub organization: String,
}

impl JobSpec {
    pub fn new(job_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            operation: operation.into(),
            arguments: Vec::new(),
            payload: None,
            dispatchable: true,
            job_load: 1.0,
            host: None,
            parent: None,
            creator: crate::directory::SYSTEM_USER.to_string(),
            organization: crate::directory::DEFAULT_ORGANIZATION.to_string(),
        }
    }

    pub fn arguments(mut self, arguments: Vec<String>) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    pub fn dispatchable(mut self, dispatchable: bool) -> Self {
        self.dispatchable = dispatchable;
        self
    }

    pub fn job_load(mut self, job_load: f32) -> Self {
        self.job_load = job_load;
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn parent(mut self, parent: i64) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = organization.into();
        self
    }
}

impl ServiceRegistry {
    /// Create a job on the given host. Dispatchable jobs start QUEUED with
    /// no processor; non-dispatchable jobs start INSTANTIATED, pinned to
    /// the service that created them.
    pub async fn create_job(&self, spec: JobSpec) -> Result<Job> {
        if spec.job_type.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "job type must not be blank".into(),
            ));
        }
        if spec.operation.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "operation must not be blank".into(),
            ));
        }
        let host = match &spec.host {
            Some(host) if !host.trim().is_empty() => host.clone(),
            Some(_) => {
                return Err(RegistryError::InvalidArgument("host must not be blank".into()))
            }
            None => self.local_host().to_string(),
        };

        let creating_service = self
            .store()
            .service(&spec.job_type, &host)
            .await?
            .ok_or_else(|| {
                RegistryError::Store(format!(
                    "no service registration exists for type '{}' on host '{}'",
                    spec.job_type, host
                ))
            })?;
        if let Some(host_registration) = self.store().host(&host).await? {
            if host_registration.maintenance_mode {
                tracing::warn!(%host, "Creating a job on a host in maintenance mode");
            } else if !host_registration.active {
                tracing::warn!(%host, "Creating a job on an inactive host");
            }
        }

        let mut job = Job::new(
            &spec.job_type,
            &spec.operation,
            &spec.creator,
            &spec.organization,
            &host,
        );
        job.arguments = spec.arguments;
        job.payload = spec.payload;
        job.dispatchable = spec.dispatchable;
        job.job_load = spec.job_load;

        // Child jobs inherit the job currently being dispatched unless a
        // parent is named explicitly.
        let parent_id = spec.parent.or_else(|| current_job::current_job().map(|j| j.id));
        if let Some(parent_id) = parent_id {
            let parent = self.store().job(parent_id).await.map_err(|e| match e {
                RegistryError::NotFound(_) => {
                    RegistryError::Store(format!("parent job {parent_id} not found"))
                }
                other => other,
            })?;
            let root_id = parent.root.unwrap_or(parent.id);
            if root_id != parent.id {
                // The root must still exist for the family to be tracked.
                self.store().job(root_id).await.map_err(|e| match e {
                    RegistryError::NotFound(_) => {
                        RegistryError::Store(format!("root job {root_id} not found"))
                    }
                    other => other,
                })?;
            }
            job.parent = Some(parent_id);
            job.root = Some(root_id);
        }

        if spec.dispatchable {
            job.status = JobStatus::Queued;
        } else {
            job.status = JobStatus::Instantiated;
            job.processor_host = Some(creating_service.host.clone());
        }

        let mut job = self.store().create_job(job).await?;
        job.uri = Some(self.job_uri(job.id));
        tracing::debug!(job_id = job.id, job_type = %job.job_type, "Created job");
        Ok(job)
    }

    /// Merge an updated job into the store under the optimistic lock,
    /// applying the queue/run timestamp rules. Any status change of a
    /// non-workflow job feeds the service-health state machine.
    pub async fn update_job(&self, job: Job) -> Result<Job> {
        let stored = self.store().job(job.id).await?;
        let mut merged = stored.clone();
        merged.payload = job.payload;
        merged.status = job.status;
        merged.failure_reason = job.failure_reason;
        merged.dispatchable = job.dispatchable;
        merged.version = job.version;
        merged.operation = job.operation;
        merged.arguments = job.arguments;
        merged.blocking_job = job.blocking_job;
        merged.blocked_jobs = job.blocked_jobs;
        merged.processor_host = job.processor_host;

        let now = Utc::now();
        match merged.status {
            JobStatus::Running
                if stored.status != JobStatus::Running && stored.status != JobStatus::Waiting =>
            {
                merged.date_started = Some(now);
                merged.queue_time = Some((now - merged.date_created).num_milliseconds());
            }
            JobStatus::Failed => {
                // Failed jobs may not have started at all.
                merged.date_completed = Some(now);
                if let Some(started) = merged.date_started {
                    merged.run_time = Some((now - started).num_milliseconds());
                }
            }
            JobStatus::Finished => {
                // Services that bypass dispatching and handle their own
                // lifecycle never entered RUNNING.
                let started = merged.date_started.unwrap_or(merged.date_created);
                merged.date_started = Some(started);
                merged.date_completed = Some(now);
                merged.run_time = Some((now - started).num_milliseconds());
            }
            _ => {}
        }

        let mut updated = self.store().update_job(&merged).await?;
        updated.uri = Some(self.job_uri(updated.id));

        if stored.status != updated.status && updated.job_type != TYPE_WORKFLOW {
            self.update_service_for_failover(&updated).await?;
        }
        Ok(updated)
    }

    /// Load a job by id.
    pub async fn job(&self, id: i64) -> Result<Job> {
        let mut job = self.store().job(id).await?;
        job.uri = Some(self.job_uri(id));
        Ok(job)
    }

    /// Delete a job and all of its descendants.
    pub async fn remove_job(&self, id: i64) -> Result<()> {
        if id < 1 {
            return Err(RegistryError::NotFound(
                "job id must be greater than zero".into(),
            ));
        }
        tracing::debug!(job_id = id, "Deleting job");
        self.store().delete_job_tree(id).await
    }

    /// Delete finished top-level jobs older than `lifetime_days`. Workflow
    /// entry points are never deleted.
    pub async fn remove_parentless_jobs(&self, lifetime_days: i64) -> Result<()> {
        let cutoff = Utc::now() - Duration::days(lifetime_days);
        let mut removed = 0;
        for job in self.store().jobs_without_parent().await? {
            if job.date_created > cutoff {
                continue;
            }
            if matches!(
                job.operation.as_str(),
                START_OPERATION | START_WORKFLOW | RESUME
            ) {
                continue;
            }
            if !job.status.is_terminal() {
                continue;
            }
            match self.remove_job(job.id).await {
                Ok(()) => {
                    tracing::debug!(job_id = job.id, "Parentless job removed");
                    removed += 1;
                }
                Err(RegistryError::NotFound(_)) => {
                    tracing::debug!(job_id = job.id, "Parentless job already gone");
                }
                Err(e) => return Err(e),
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Removed parentless jobs");
        } else {
            tracing::info!("No parentless jobs found to remove");
        }
        Ok(())
    }

    /// Jobs filtered by optional type and status.
    pub async fn jobs(&self, job_type: Option<&str>, status: Option<JobStatus>) -> Result<Vec<Job>> {
        self.store().jobs(job_type, status).await
    }

    /// All transitive descendants of a job, ordered by creation date.
    pub async fn child_jobs(&self, id: i64) -> Result<Vec<Job>> {
        let by_root = self.store().root_child_jobs(id).await?;
        if !by_root.is_empty() {
            return Ok(by_root);
        }
        // Mid-tree jobs share their root with their descendants, so the
        // root query comes back empty and we walk the tree instead.
        let mut jobs = Vec::new();
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for child in self.store().child_jobs(parent).await? {
                frontier.push(child.id);
                jobs.push(child);
            }
        }
        jobs.sort_by(|a, b| a.date_created.cmp(&b.date_created).then(a.id.cmp(&b.id)));
        Ok(jobs)
    }

    /// Number of jobs of a type and status.
    pub async fn count(&self, job_type: Option<&str>, status: Option<JobStatus>) -> Result<i64> {
        self.store()
            .count_jobs(JobCountFilter {
                job_type,
                status,
                ..Default::default()
            })
            .await
    }

    /// Number of jobs of a type and status on a processing host.
    pub async fn count_by_host(
        &self,
        job_type: &str,
        host: &str,
        status: JobStatus,
    ) -> Result<i64> {
        self.store()
            .count_jobs(JobCountFilter {
                job_type: Some(job_type),
                host: Some(host),
                status: Some(status),
                ..Default::default()
            })
            .await
    }

    /// Number of jobs of a type, operation and status.
    pub async fn count_by_operation(
        &self,
        job_type: &str,
        operation: &str,
        status: JobStatus,
    ) -> Result<i64> {
        self.store()
            .count_jobs(JobCountFilter {
                job_type: Some(job_type),
                operation: Some(operation),
                status: Some(status),
                ..Default::default()
            })
            .await
    }

    fn job_uri(&self, id: i64) -> String {
        format!("{}/job/{id}.xml", self.config().jobs_url)
    }
}
