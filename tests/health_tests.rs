mod common;

use common::{register_worker_service, test_registry, test_registry_with_config, test_config};
use gridcast::registry::host::ServiceState;
use gridcast::registry::job::{FailureReason, JobStatus};
use gridcast::registry::lifecycle::JobSpec;
use gridcast::registry::ServiceRegistry;

const HOST_A: &str = "http://worker-a.test";
const HOST_B: &str = "http://worker-b.test";
const HOST_C: &str = "http://worker-c.test";

/// Create a job of `svcA` with the given arguments and drive it to the
/// terminal status on the given host.
async fn finish_job(
    registry: &ServiceRegistry,
    host: &str,
    arguments: &[&str],
    status: JobStatus,
    reason: FailureReason,
) {
    let mut job = registry
        .create_job(
            JobSpec::new("svcA", "encode")
                .host(host)
                .arguments(arguments.iter().map(|s| s.to_string()).collect()),
        )
        .await
        .unwrap();
    job.status = status;
    job.failure_reason = reason;
    job.processor_host = Some(host.to_string());
    registry.update_job(job).await.unwrap();
}

async fn service_state(registry: &ServiceRegistry, host: &str) -> ServiceState {
    registry
        .service_registration("svcA", host)
        .await
        .unwrap()
        .unwrap()
        .service_state
}

#[tokio::test]
async fn first_failure_puts_the_service_into_warning() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;

    let service = registry
        .service_registration("svcA", HOST_A)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(service.service_state, ServiceState::Warning);
    assert_ne!(service.warning_state_trigger, 0);
}

#[tokio::test]
async fn data_failures_do_not_touch_service_health() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Data).await;

    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Normal);
}

#[tokio::test]
async fn repeated_failures_escalate_to_error() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Warning);

    // Second failure of the same signature on the same service, and the
    // failure history has reached max.attempts (default 1).
    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Error);
}

#[tokio::test]
async fn warning_survives_until_max_attempts_is_reached() {
    let mut config = test_config();
    config.max_attempts = 3;
    let (registry, _store) = test_registry_with_config(config);
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Warning);

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Error);
}

#[tokio::test]
async fn success_resets_a_warning_service() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Warning);

    finish_job(&registry, HOST_A, &["y"], JobStatus::Finished, FailureReason::None).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Normal);
}

#[tokio::test]
async fn success_elsewhere_convicts_the_warning_service() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;
    register_worker_service(&registry, "svcA", HOST_B, 4.0).await;

    // The signature fails on A.
    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Warning);

    // The same signature succeeds on B, so A is definitively bad.
    finish_job(&registry, HOST_B, &["x"], JobStatus::Finished, FailureReason::None).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Error);
    assert_eq!(service_state(&registry, HOST_B).await, ServiceState::Normal);
}

#[tokio::test]
async fn failure_elsewhere_forgives_related_services() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;
    register_worker_service(&registry, "svcA", HOST_B, 4.0).await;
    register_worker_service(&registry, "svcA", HOST_C, 4.0).await;

    // A ends up in ERROR state for the signature.
    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    finish_job(&registry, HOST_B, &["x"], JobStatus::Finished, FailureReason::None).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Error);

    // The signature now also fails on C: it was the job all along, so A
    // is demoted back to WARNING.
    finish_job(&registry, HOST_C, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Warning);
}

#[tokio::test]
async fn failure_elsewhere_resets_warning_services_to_normal() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;
    register_worker_service(&registry, "svcA", HOST_B, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Warning);

    finish_job(&registry, HOST_B, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Normal);
}

#[tokio::test]
async fn unrelated_signatures_do_not_interact() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;
    register_worker_service(&registry, "svcA", HOST_B, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    // A different signature failing on B starts its own warning, leaving
    // A untouched.
    finish_job(&registry, HOST_B, &["y"], JobStatus::Failed, FailureReason::Processing).await;

    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Warning);
    assert_eq!(service_state(&registry, HOST_B).await, ServiceState::Warning);
}

#[tokio::test]
async fn sanitize_forces_normal() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Error);

    registry.sanitize("svcA", HOST_A).await.unwrap();
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Normal);
}

#[tokio::test]
async fn abnormal_service_count_tracks_unhealthy_registrations() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;
    register_worker_service(&registry, "svcA", HOST_B, 4.0).await;

    assert_eq!(registry.count_of_abnormal_services().await.unwrap(), 0);
    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(registry.count_of_abnormal_services().await.unwrap(), 1);
}

#[tokio::test]
async fn error_services_are_not_dispatch_candidates() {
    let (registry, _store) = test_registry();
    register_worker_service(&registry, "svcA", HOST_A, 4.0).await;

    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    finish_job(&registry, HOST_A, &["x"], JobStatus::Failed, FailureReason::Processing).await;
    assert_eq!(service_state(&registry, HOST_A).await, ServiceState::Error);

    assert!(registry
        .service_registrations_by_load("svcA")
        .await
        .unwrap()
        .is_empty());
    assert!(registry
        .service_registrations_with_capacity("svcA")
        .await
        .unwrap()
        .is_empty());
}
