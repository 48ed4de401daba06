//! Per-service health driven by job outcomes.
//!
//! Every terminal status of a non-workflow job updates the health of the
//! services able to run jobs of that type. Failures and successes are
//! correlated across hosts through the job signature: a signature that
//! fails everywhere points at the job, a signature that fails on one host
//! but succeeds elsewhere points at the service.

use crate::error::{RegistryError, Result};
use crate::registry::host::{ServiceRegistration, ServiceState};
use crate::registry::job::{FailureReason, Job, JobStatus};
use crate::registry::ServiceRegistry;

impl ServiceRegistry {
    /// Apply a terminal job outcome to the health of its processor and the
    /// related services of the same type. No-op for non-terminal statuses
    /// and for jobs without a processor.
    pub(crate) async fn update_service_for_failover(&self, job: &Job) -> Result<()> {
        if job.status != JobStatus::Failed && job.status != JobStatus::Finished {
            return Ok(());
        }
        let Some(processor_host) = job.processor_host.as_deref() else {
            return Ok(());
        };
        // Services in ERROR state are never handed jobs, so the processor
        // can only be NORMAL or WARNING here.
        let Some(current) = self.store().service(&job.job_type, processor_host).await? else {
            return Ok(());
        };

        match job.status {
            JobStatus::Failed if job.failure_reason != FailureReason::Data => {
                self.record_failure(job, current).await
            }
            JobStatus::Finished => self.record_success(job, current).await,
            _ => Ok(()),
        }
    }

    async fn record_failure(&self, job: &Job, current: ServiceRegistration) -> Result<()> {
        let signature = job.signature();
        let related = self
            .related_warning_error_services(&job.job_type, signature, &current)
            .await?;

        if !related.is_empty() {
            // The same signature already put other services into WARNING
            // or ERROR, so the job itself is the likely culprit. Forgive
            // those services one step.
            for mut service in related {
                match service.service_state {
                    ServiceState::Warning => {
                        tracing::info!(service = %service.service_type, host = %service.host,
                            "State reset to NORMAL for related service");
                        service.set_state(ServiceState::Normal, signature);
                    }
                    ServiceState::Error => {
                        tracing::info!(service = %service.service_type, host = %service.host,
                            "State reset to WARNING for related service");
                        let previous_trigger = service.warning_state_trigger;
                        service.set_state(ServiceState::Warning, previous_trigger);
                    }
                    ServiceState::Normal => {}
                }
                self.store().save_service(service).await?;
            }
            return Ok(());
        }

        // First failure of this signature anywhere.
        match current.service_state {
            ServiceState::Normal => {
                tracing::info!(service = %current.service_type, host = %current.host,
                    "State set to WARNING for current service");
                let mut current = current;
                current.set_state(ServiceState::Warning, signature);
                self.store().save_service(current).await
            }
            ServiceState::Warning => {
                let failures = self
                    .store()
                    .failed_job_count(&current.service_type, &current.host)
                    .await?;
                if failures >= self.config().max_attempts as i64 {
                    tracing::info!(service = %current.service_type, host = %current.host,
                        failures, "State set to ERROR for current service");
                    let mut current = current;
                    current.set_state(ServiceState::Error, signature);
                    self.store().save_service(current).await
                } else {
                    Ok(())
                }
            }
            ServiceState::Error => Ok(()),
        }
    }

    async fn record_success(&self, job: &Job, current: ServiceRegistration) -> Result<()> {
        let signature = job.signature();

        if current.service_state == ServiceState::Warning {
            tracing::info!(service = %current.service_type, host = %current.host,
                "State reset to NORMAL for current service");
            let mut current = current.clone();
            current.set_state(ServiceState::Normal, signature);
            self.store().save_service(current).await?;
        }

        // The signature works here, so any service still warning about it
        // is definitively bad.
        for mut service in self
            .related_warning_services(&job.job_type, signature, &current)
            .await?
        {
            tracing::info!(service = %service.service_type, host = %service.host,
                "State set to ERROR for related service");
            service.set_state(ServiceState::Error, signature);
            self.store().save_service(service).await?;
        }
        Ok(())
    }

    /// Force a service back to NORMAL, clearing the effect of past
    /// failures. Administrative override.
    pub async fn sanitize(&self, service_type: &str, host: &str) -> Result<()> {
        let mut service = self
            .store()
            .service(service_type, host)
            .await?
            .ok_or_else(|| {
                RegistryError::NotFound(format!("service {service_type} on {host}"))
            })?;
        tracing::info!(service = service_type, host, "State reset to NORMAL through sanitize");
        service.set_state(ServiceState::Normal, 0);
        self.store().save_service(service).await
    }

    /// Number of registrations not in NORMAL state.
    pub async fn count_of_abnormal_services(&self) -> Result<i64> {
        self.store().abnormal_service_count().await
    }

    /// Services of the given type, other than `current`, in WARNING state
    /// with the given signature as their warning trigger.
    async fn related_warning_services(
        &self,
        service_type: &str,
        signature: i64,
        current: &ServiceRegistration,
    ) -> Result<Vec<ServiceRegistration>> {
        Ok(self
            .store()
            .services_by_type(service_type)
            .await?
            .into_iter()
            .filter(|service| !service.same_registration(current))
            .filter(|service| {
                service.service_state == ServiceState::Warning
                    && service.warning_state_trigger == signature
            })
            .collect())
    }

    /// Services of the given type, other than `current`, whose WARNING or
    /// ERROR state was triggered by the given signature.
    async fn related_warning_error_services(
        &self,
        service_type: &str,
        signature: i64,
        current: &ServiceRegistration,
    ) -> Result<Vec<ServiceRegistration>> {
        Ok(self
            .store()
            .services_by_type(service_type)
            .await?
            .into_iter()
            .filter(|service| !service.same_registration(current))
            .filter(|service| match service.service_state {
                ServiceState::Warning => service.warning_state_trigger == signature,
                ServiceState::Error => service.error_state_trigger == signature,
                ServiceState::Normal => false,
            })
            .collect())
    }
}
