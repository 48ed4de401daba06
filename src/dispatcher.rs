//! The periodic job dispatcher.
//!
//! Each round drains all QUEUED and RESTART jobs from the store, ranks the
//! candidate services for every job by host load and hands the job to the
//! first worker that accepts it. Multiple registry nodes may dispatch
//! against the same store; the optimistic-lock version column decides who
//! wins a contended job.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::DispatchClient;
use crate::current_job::with_current_job;
use crate::directory::{Organization, User};
use crate::error::{RegistryError, Result};
use crate::registry::job::{Job, JobStatus, START_WORKFLOW, TYPE_WORKFLOW};
use crate::registry::load::{service_registrations_by_load, service_registrations_with_capacity};
use crate::registry::{ServiceRegistration, ServiceRegistry};
use crate::wire;

pub struct Dispatcher {
    registry: Arc<ServiceRegistry>,
    client: DispatchClient,
}

impl Dispatcher {
    pub fn new(registry: Arc<ServiceRegistry>, client: DispatchClient) -> Self {
        Self { registry, client }
    }

    /// Dispatch on a fixed delay until shutdown: the next round starts
    /// `interval` after the previous one finished, so slow rounds never
    /// stack up.
    pub async fn run(self, interval: Duration, shutdown: CancellationToken) {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        timer.tick().await;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Dispatcher stopped");
                    return;
                }
                _ = timer.tick() => {
                    if let Err(e) = self.dispatch_round().await {
                        tracing::warn!(error = %e, "Error dispatching jobs");
                    }
                }
            }
        }
    }

    /// One pass over all dispatchable jobs.
    pub async fn dispatch_round(&self) -> Result<()> {
        let mut jobs = self
            .registry
            .store()
            .dispatchable_jobs(&[JobStatus::Queued, JobStatus::Restart])
            .await?;
        jobs.sort_by(dispatch_order);

        if self.registry.config().collect_job_stats {
            match self.registry.service_statistics().await {
                Ok(statistics) => {
                    tracing::debug!(services = statistics.len(), "Refreshed job statistics")
                }
                Err(e) => tracing::warn!(error = %e, "Unable to refresh job statistics"),
            }
        }

        // Signatures that proved undispatchable in this round; later jobs
        // with the same signature are skipped until the next round.
        let mut undispatchable_signatures: HashSet<String> = HashSet::new();

        for job in jobs {
            let signature = format!("{}@{}", job.job_type, job.operation);
            if undispatchable_signatures.contains(&signature) {
                tracing::trace!(job_id = job.id, %signature, "Skipping for this round");
                continue;
            }

            let Some(organization) = self.registry.directory().organization(&job.organization).await
            else {
                tracing::debug!(job_id = job.id, organization = %job.organization,
                    "Skipping job of non-existing organization");
                continue;
            };
            let Some(user) = self.registry.directory().user(&job.creator).await else {
                tracing::warn!(job_id = job.id, creator = %job.creator,
                    "Unable to dispatch job, creator is not available");
                continue;
            };

            if let Err(e) = self
                .dispatch_one(&job, &signature, &organization, &user, &mut undispatchable_signatures)
                .await
            {
                tracing::error!(job_id = job.id, error = %e, "Error dispatching job");
            }
        }
        Ok(())
    }

    async fn dispatch_one(
        &self,
        job: &Job,
        signature: &str,
        organization: &Organization,
        user: &User,
        undispatchable_signatures: &mut HashSet<String>,
    ) -> Result<()> {
        let system_load = self.registry.host_loads(true).await?;
        let services = self.registry.store().services().await?;
        let hosts = self.registry.store().hosts().await?;

        let parent = match job.parent {
            Some(parent_id) => self.registry.store().job(parent_id).await.ok(),
            None => None,
        };
        let mut parent_has_running_children = false;
        if let Some(parent) = &parent {
            parent_has_running_children = self
                .registry
                .child_jobs(parent.id)
                .await?
                .iter()
                .any(|child| child.status == JobStatus::Running);
        }

        // A root dispatch (a new workflow, a workflow job, or the next
        // sibling in an already-running family) must find spare capacity.
        // A child starting under an idle parent may use any host.
        let candidates = if parent.is_none()
            || job.job_type == TYPE_WORKFLOW
            || parent_has_running_children
        {
            tracing::trace!(job_id = job.id, "Using available capacity only");
            service_registrations_with_capacity(&job.job_type, &services, &hosts, &system_load)
        } else {
            tracing::trace!(job_id = job.id, "Using full list of services");
            service_registrations_by_load(&job.job_type, &services, &hosts, &system_load)
        };

        match self.dispatch_job(job, &candidates, organization, user).await {
            Ok(host) => {
                tracing::debug!(job_id = job.id, host = %host, "Job dispatched");
                // Later jobs in this round recompute the load from the
                // store, which already accounts for this dispatch.
            }
            Err(RegistryError::ServiceUnavailable(_)) => {
                tracing::debug!(job_id = job.id, job_type = %job.job_type,
                    "Jobs of this type currently cannot be dispatched");
                // Workflow jobs are retried every round so that workflow
                // operations are never held back.
                if job.job_type != TYPE_WORKFLOW {
                    undispatchable_signatures.insert(signature.to_string());
                }
            }
            Err(RegistryError::Undispatchable(id, reason)) => {
                tracing::debug!(job_id = id, %reason, "Job currently cannot be dispatched");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Offer the job to each candidate in turn. Returns the host that
    /// accepted it.
    pub async fn dispatch_job(
        &self,
        job: &Job,
        candidates: &[ServiceRegistration],
        organization: &Organization,
        user: &User,
    ) -> Result<String> {
        if candidates.is_empty() {
            tracing::debug!(job_type = %job.job_type, "No service available to handle jobs");
            return Err(RegistryError::ServiceUnavailable(job.job_type.clone()));
        }

        let mut job = job.clone();
        job.status = JobStatus::Dispatching;
        let mut tried_dispatching = false;

        for service in candidates {
            job.processor_host = Some(service.host.clone());
            job = match self.registry.update_job(job.clone()).await {
                Ok(updated) => updated,
                Err(e) => {
                    // Most likely another registry node grabbed the job
                    // first and our version is stale.
                    tracing::debug!(job_id = job.id, error = %e,
                        "Unable to dispatch, likely taken by another dispatcher");
                    return Err(RegistryError::Undispatchable(
                        job.id,
                        "already being dispatched".into(),
                    ));
                }
            };
            tried_dispatching = true;

            let job_xml = match wire::to_xml(&job) {
                Ok(xml) => xml,
                Err(e) => {
                    tracing::warn!(job_id = job.id, error = %e, "Job serialization error");
                    job.status = JobStatus::Failed;
                    job.processor_host = None;
                    self.registry.update_job(job.clone()).await?;
                    return Err(e);
                }
            };

            tracing::debug!(job_id = job.id, job_type = %job.job_type, host = %service.host,
                "Trying to dispatch job");
            let request = self
                .client
                .dispatch(service, &job_xml, &organization.id, &user.username);
            let response = if job.operation == START_WORKFLOW {
                request.await
            } else {
                with_current_job(Some(job.clone()), request).await
            };

            match response {
                Ok(response) => match response.status {
                    204 => return Ok(service.host.clone()),
                    503 => {
                        tracing::debug!(host = %service.host,
                            "Service is currently refusing to accept jobs");
                        continue;
                    }
                    412 => {
                        job.status = JobStatus::Failed;
                        self.registry.update_job(job.clone()).await?;
                        tracing::debug!(job_id = job.id, host = %service.host,
                            "Service refused to accept job");
                        return Err(RegistryError::Undispatchable(job.id, response.body));
                    }
                    405 => {
                        tracing::debug!(host = %service.host, "Service is not yet reachable");
                        continue;
                    }
                    status => {
                        tracing::warn!(job_id = job.id, host = %service.host, status,
                            "Service failed accepting job");
                        continue;
                    }
                },
                Err(e) => {
                    tracing::warn!(job_id = job.id, host = %service.host, error = %e,
                        "Unable to dispatch job");
                    continue;
                }
            }
        }

        // Every candidate was offered the job and none took it.
        if tried_dispatching {
            job.status = JobStatus::Queued;
            job.processor_host = None;
            if let Err(e) = self.registry.update_job(job.clone()).await {
                tracing::error!(job_id = job.id, error = %e, "Unable to put job back into queue");
            }
        }
        tracing::debug!(job_id = job.id, "No service is currently ready to accept the job");
        Err(RegistryError::Undispatchable(
            job.id,
            "currently undispatchable".into(),
        ))
    }
}

/// Dispatch ordering: RESTART jobs first, workflow jobs last, creation
/// date breaks ties.
pub fn dispatch_order(a: &Job, b: &Job) -> Ordering {
    match (a.status == JobStatus::Restart, b.status == JobStatus::Restart) {
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        _ => {}
    }
    match (a.job_type == TYPE_WORKFLOW, b.job_type == TYPE_WORKFLOW) {
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        _ => {}
    }
    a.date_created.cmp(&b.date_created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn job(job_type: &str, status: JobStatus, age_secs: i64) -> Job {
        let mut job = Job::new(job_type, "run", "system", "default_org", "http://h1");
        job.status = status;
        job.date_created = Utc::now() - Duration::seconds(age_secs);
        job
    }

    #[test]
    fn restart_outranks_queued() {
        let restarted = job("svc", JobStatus::Restart, 0);
        let queued = job("svc", JobStatus::Queued, 60);
        assert_eq!(dispatch_order(&restarted, &queued), Ordering::Less);
        assert_eq!(dispatch_order(&queued, &restarted), Ordering::Greater);
    }

    #[test]
    fn workflow_jobs_rank_last() {
        let workflow = job(TYPE_WORKFLOW, JobStatus::Queued, 60);
        let regular = job("svc", JobStatus::Queued, 0);
        assert_eq!(dispatch_order(&regular, &workflow), Ordering::Less);
        assert_eq!(dispatch_order(&workflow, &regular), Ordering::Greater);
    }

    #[test]
    fn creation_date_breaks_ties() {
        let older = job("svc", JobStatus::Queued, 60);
        let newer = job("svc", JobStatus::Queued, 0);
        assert_eq!(dispatch_order(&older, &newer), Ordering::Less);
    }
}
