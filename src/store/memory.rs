use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{RegistryError, Result};
use crate::registry::host::{HostRegistration, ServiceRegistration, ServiceState};
use crate::registry::job::{Job, JobStatus};
use crate::store::{HostLoadRow, JobCountFilter, JobStatisticsRow, JobStore};

#[derive(Default)]
struct State {
    jobs: BTreeMap<i64, Job>,
    hosts: BTreeMap<String, HostRegistration>,
    services: BTreeMap<(String, String), ServiceRegistration>,
    next_job_id: i64,
}

/// In-memory [`JobStore`] backend. Single writer lock, monotonic id
/// sequence, version-checked job updates. Used by single-node deployments
/// and as the reference store in the test suite.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_creation(mut jobs: Vec<Job>) -> Vec<Job> {
    jobs.sort_by(|a, b| a.date_created.cmp(&b.date_created).then(a.id.cmp(&b.id)));
    jobs
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, mut job: Job) -> Result<Job> {
        let mut state = self.state.write().await;
        state.next_job_id += 1;
        job.id = state.next_job_id;
        job.version = 1;
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn job(&self, id: i64) -> Result<Job> {
        let state = self.state.read().await;
        state
            .jobs
            .get(&id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("job {id}")))
    }

    async fn update_job(&self, job: &Job) -> Result<Job> {
        let mut state = self.state.write().await;
        let stored = state
            .jobs
            .get(&job.id)
            .ok_or_else(|| RegistryError::NotFound(format!("job {}", job.id)))?;
        if stored.version != job.version {
            return Err(RegistryError::Conflict(job.id));
        }
        let mut updated = job.clone();
        updated.version += 1;
        state.jobs.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn delete_job_tree(&self, id: i64) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.jobs.contains_key(&id) {
            return Err(RegistryError::NotFound(format!("job {id}")));
        }
        let mut doomed = vec![id];
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for job in state.jobs.values() {
                if job.parent == Some(parent) {
                    doomed.push(job.id);
                    frontier.push(job.id);
                }
            }
        }
        for id in doomed {
            state.jobs.remove(&id);
        }
        Ok(())
    }

    async fn jobs(&self, job_type: Option<&str>, status: Option<JobStatus>) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(sorted_by_creation(
            state
                .jobs
                .values()
                .filter(|job| job_type.map_or(true, |t| job.job_type == t))
                .filter(|job| status.map_or(true, |s| job.status == s))
                .cloned()
                .collect(),
        ))
    }

    async fn dispatchable_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(sorted_by_creation(
            state
                .jobs
                .values()
                .filter(|job| job.dispatchable && statuses.contains(&job.status))
                .cloned()
                .collect(),
        ))
    }

    async fn jobs_on_processor(
        &self,
        service_type: &str,
        host: &str,
        statuses: &[JobStatus],
    ) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(sorted_by_creation(
            state
                .jobs
                .values()
                .filter(|job| {
                    job.job_type == service_type
                        && job.processor_host.as_deref() == Some(host)
                        && statuses.contains(&job.status)
                })
                .cloned()
                .collect(),
        ))
    }

    async fn undispatchable_jobs(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(sorted_by_creation(
            state
                .jobs
                .values()
                .filter(|job| statuses.contains(&job.status))
                .cloned()
                .collect(),
        ))
    }

    async fn child_jobs(&self, id: i64) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(sorted_by_creation(
            state
                .jobs
                .values()
                .filter(|job| job.parent == Some(id))
                .cloned()
                .collect(),
        ))
    }

    async fn root_child_jobs(&self, root_id: i64) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(sorted_by_creation(
            state
                .jobs
                .values()
                .filter(|job| job.root == Some(root_id))
                .cloned()
                .collect(),
        ))
    }

    async fn jobs_without_parent(&self) -> Result<Vec<Job>> {
        let state = self.state.read().await;
        Ok(sorted_by_creation(
            state
                .jobs
                .values()
                .filter(|job| job.parent.is_none())
                .cloned()
                .collect(),
        ))
    }

    async fn count_jobs(&self, filter: JobCountFilter<'_>) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| filter.job_type.map_or(true, |t| job.job_type == t))
            .filter(|job| {
                filter
                    .host
                    .map_or(true, |h| job.processor_host.as_deref() == Some(h))
            })
            .filter(|job| filter.operation.map_or(true, |o| job.operation == o))
            .filter(|job| filter.status.map_or(true, |s| job.status == s))
            .count() as i64)
    }

    async fn failed_job_count(&self, service_type: &str, host: &str) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .jobs
            .values()
            .filter(|job| {
                job.job_type == service_type
                    && job.processor_host.as_deref() == Some(host)
                    && job.status == JobStatus::Failed
            })
            .count() as i64)
    }

    async fn job_statistics(&self, since: DateTime<Utc>) -> Result<Vec<JobStatisticsRow>> {
        let state = self.state.read().await;
        let mut rows: BTreeMap<(String, String, JobStatus), (i64, i64, i64, i64, i64)> =
            BTreeMap::new();
        for job in state.jobs.values() {
            if job.date_created < since {
                continue;
            }
            let Some(host) = job.processor_host.clone() else {
                continue;
            };
            let key = (job.job_type.clone(), host, job.status);
            let entry = rows.entry(key).or_insert((0, 0, 0, 0, 0));
            entry.0 += 1;
            if let Some(queue_time) = job.queue_time {
                entry.1 += queue_time;
                entry.2 += 1;
            }
            if let Some(run_time) = job.run_time {
                entry.3 += run_time;
                entry.4 += 1;
            }
        }
        Ok(rows
            .into_iter()
            .map(|((service_type, host, status), (count, queue_sum, queued, run_sum, ran))| {
                JobStatisticsRow {
                    service_type,
                    host,
                    status,
                    count,
                    mean_queue_time: if queued > 0 { queue_sum / queued } else { 0 },
                    mean_run_time: if ran > 0 { run_sum / ran } else { 0 },
                }
            })
            .collect())
    }

    async fn host_load_rows(&self, statuses: &[JobStatus]) -> Result<Vec<HostLoadRow>> {
        let state = self.state.read().await;
        let mut rows: BTreeMap<(String, String, JobStatus), f32> = BTreeMap::new();
        for job in state.jobs.values() {
            if !statuses.contains(&job.status) {
                continue;
            }
            let Some(host) = job.processor_host.clone() else {
                continue;
            };
            *rows
                .entry((job.job_type.clone(), host, job.status))
                .or_insert(0.0) += job.job_load;
        }
        let mut result = Vec::with_capacity(rows.len());
        for ((service_type, host, status), load) in rows {
            // Jobs whose processor registration is gone do not count.
            let Some(service) = state.services.get(&(service_type, host)) else {
                continue;
            };
            result.push(HostLoadRow {
                service: service.clone(),
                status,
                load,
            });
        }
        Ok(result)
    }

    async fn save_host(&self, host: HostRegistration) -> Result<()> {
        let mut state = self.state.write().await;
        state.hosts.insert(host.base_url.clone(), host);
        Ok(())
    }

    async fn host(&self, base_url: &str) -> Result<Option<HostRegistration>> {
        let state = self.state.read().await;
        Ok(state.hosts.get(base_url).cloned())
    }

    async fn hosts(&self) -> Result<Vec<HostRegistration>> {
        let state = self.state.read().await;
        Ok(state.hosts.values().cloned().collect())
    }

    async fn max_load_of(&self, base_url: &str) -> Result<f32> {
        let state = self.state.read().await;
        state
            .hosts
            .get(base_url)
            .map(|host| host.max_load)
            .ok_or_else(|| RegistryError::NotFound(format!("host {base_url}")))
    }

    async fn save_service(&self, service: ServiceRegistration) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .services
            .insert((service.service_type.clone(), service.host.clone()), service);
        Ok(())
    }

    async fn service(
        &self,
        service_type: &str,
        host: &str,
    ) -> Result<Option<ServiceRegistration>> {
        let state = self.state.read().await;
        Ok(state
            .services
            .get(&(service_type.to_string(), host.to_string()))
            .cloned())
    }

    async fn services(&self) -> Result<Vec<ServiceRegistration>> {
        let state = self.state.read().await;
        Ok(state.services.values().cloned().collect())
    }

    async fn online_services(&self) -> Result<Vec<ServiceRegistration>> {
        let state = self.state.read().await;
        Ok(state
            .services
            .values()
            .filter(|service| {
                state
                    .hosts
                    .get(&service.host)
                    .map(|host| host.online)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn services_by_type(&self, service_type: &str) -> Result<Vec<ServiceRegistration>> {
        let state = self.state.read().await;
        Ok(state
            .services
            .values()
            .filter(|service| service.service_type == service_type)
            .cloned()
            .collect())
    }

    async fn services_by_host(&self, host: &str) -> Result<Vec<ServiceRegistration>> {
        let state = self.state.read().await;
        Ok(state
            .services
            .values()
            .filter(|service| service.host == host)
            .cloned()
            .collect())
    }

    async fn abnormal_service_count(&self) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state
            .services
            .values()
            .filter(|service| service.service_state != ServiceState::Normal)
            .count() as i64)
    }
}
