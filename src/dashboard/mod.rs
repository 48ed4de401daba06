//! Read-only status endpoint.
//!
//! Serves JSON listings of hosts, services, jobs and statistics for
//! operators. All mutation goes through the registry API; this surface
//! never writes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::registry::{Job, ServiceRegistry};

#[derive(Clone)]
pub struct DashboardState {
    pub registry: Arc<ServiceRegistry>,
}

#[derive(Serialize)]
struct JobResponse {
    id: i64,
    job_type: String,
    operation: String,
    status: String,
    processor_host: Option<String>,
    creator: String,
    job_load: f32,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            operation: job.operation.clone(),
            status: job.status.to_string(),
            processor_host: job.processor_host.clone(),
            creator: job.creator.clone(),
            job_load: job.job_load,
        }
    }
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/api/hosts", get(list_hosts_handler))
        .route("/api/services", get(list_services_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/statistics", get(statistics_handler))
        .layer(cors)
        .with_state(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn index_handler() -> Html<&'static str> {
    Html(
        "<!doctype html><title>gridcast</title>\
         <h1>gridcast registry</h1>\
         <ul>\
         <li><a href=\"/api/hosts\">hosts</a></li>\
         <li><a href=\"/api/services\">services</a></li>\
         <li><a href=\"/api/jobs\">jobs</a></li>\
         <li><a href=\"/api/statistics\">statistics</a></li>\
         </ul>",
    )
}

async fn list_hosts_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.registry.host_registrations().await {
        Ok(hosts) => Json(hosts).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_services_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.registry.service_registrations().await {
        Ok(services) => Json(services).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.registry.jobs(None, None).await {
        Ok(jobs) => {
            let jobs: Vec<JobResponse> = jobs.iter().map(JobResponse::from).collect();
            Json(jobs).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn statistics_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    match state.registry.service_statistics().await {
        Ok(statistics) => Json(statistics).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
