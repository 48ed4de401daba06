//! Service statistics derived from the store's counter feeds.
//!
//! Statistics are computed on demand from job counts and mean times, off
//! the critical path of dispatching. The dispatcher refreshes them once
//! per round when collection is enabled.

use chrono::{Duration, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::registry::host::ServiceRegistration;
use crate::registry::job::JobStatus;
use crate::registry::ServiceRegistry;

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatistics {
    pub registration: ServiceRegistration,
    pub running_jobs: i64,
    pub queued_jobs: i64,
    pub finished_jobs: i64,
    pub failed_jobs: i64,
    /// Mean queue time in milliseconds of recently finished jobs.
    pub mean_queue_time: i64,
    /// Mean run time in milliseconds of recently finished jobs.
    pub mean_run_time: i64,
}

impl ServiceRegistry {
    /// Per-registration job statistics over the configured job-age window.
    /// Every registration appears in the result, with zeroes when it has
    /// no recent jobs.
    pub async fn service_statistics(&self) -> Result<Vec<ServiceStatistics>> {
        let since = Utc::now() - Duration::days(self.config().max_job_age_days);
        let rows = self.store().job_statistics(since).await?;
        let mut statistics: Vec<ServiceStatistics> = self
            .store()
            .services()
            .await?
            .into_iter()
            .map(|registration| ServiceStatistics {
                registration,
                running_jobs: 0,
                queued_jobs: 0,
                finished_jobs: 0,
                failed_jobs: 0,
                mean_queue_time: 0,
                mean_run_time: 0,
            })
            .collect();
        for row in rows {
            let Some(entry) = statistics.iter_mut().find(|s| {
                s.registration.service_type == row.service_type && s.registration.host == row.host
            }) else {
                continue;
            };
            match row.status {
                JobStatus::Running => entry.running_jobs += row.count,
                JobStatus::Queued => entry.queued_jobs += row.count,
                JobStatus::Finished => {
                    entry.finished_jobs += row.count;
                    entry.mean_queue_time = row.mean_queue_time;
                    entry.mean_run_time = row.mean_run_time;
                }
                JobStatus::Failed => entry.failed_jobs += row.count,
                _ => {}
            }
        }
        Ok(statistics)
    }
}
