//! Shared helpers for the integration tests: a registry over a fresh
//! in-memory store and a configurable mock worker speaking the dispatch
//! wire protocol.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Form, Router};
use serde::Deserialize;
use tokio::sync::Mutex;

use gridcast::client::{ORGANIZATION_HEADER, USER_HEADER};
use gridcast::config::RegistryConfig;
use gridcast::directory::StaticDirectory;
use gridcast::registry::ServiceRegistry;
use gridcast::store::MemoryStore;

/// Base URL the test registry registers itself under.
pub const LOCAL_HOST: &str = "http://registry.test";

pub fn test_config() -> RegistryConfig {
    RegistryConfig {
        host_url: LOCAL_HOST.to_string(),
        jobs_url: LOCAL_HOST.to_string(),
        ..RegistryConfig::default()
    }
}

/// A registry over a fresh in-memory store.
pub fn test_registry() -> (Arc<ServiceRegistry>, Arc<MemoryStore>) {
    test_registry_with_config(test_config())
}

pub fn test_registry_with_config(
    config: RegistryConfig,
) -> (Arc<ServiceRegistry>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(ServiceRegistry::new(
        store.clone(),
        Arc::new(StaticDirectory::new()),
        config,
    ));
    (registry, store)
}

/// A second registry node sharing the given store, as in a multi-node
/// deployment.
pub fn peer_registry(store: Arc<MemoryStore>, host_url: &str) -> Arc<ServiceRegistry> {
    let config = RegistryConfig {
        host_url: host_url.to_string(),
        jobs_url: host_url.to_string(),
        ..RegistryConfig::default()
    };
    Arc::new(ServiceRegistry::new(
        store,
        Arc::new(StaticDirectory::new()),
        config,
    ))
}

#[derive(Debug, Clone)]
pub struct CapturedDispatch {
    pub job_xml: String,
    pub organization: String,
    pub user: String,
}

#[derive(Deserialize)]
struct DispatchForm {
    job: String,
}

#[derive(Clone)]
struct WorkerState {
    dispatch_status: Arc<AtomicU16>,
    ping_status: Arc<AtomicU16>,
    dispatch_hits: Arc<AtomicUsize>,
    ping_hits: Arc<AtomicUsize>,
    last_dispatch: Arc<Mutex<Option<CapturedDispatch>>>,
}

/// A worker node the dispatcher and heartbeat can talk to. Serves
/// `POST /work/dispatch` and `HEAD /work/dispatch` with configurable
/// status codes and records what it received.
pub struct MockWorker {
    pub base_url: String,
    state: WorkerState,
}

impl MockWorker {
    pub fn dispatch_hits(&self) -> usize {
        self.state.dispatch_hits.load(Ordering::SeqCst)
    }

    pub fn ping_hits(&self) -> usize {
        self.state.ping_hits.load(Ordering::SeqCst)
    }

    pub fn set_dispatch_status(&self, status: u16) {
        self.state.dispatch_status.store(status, Ordering::SeqCst);
    }

    pub fn set_ping_status(&self, status: u16) {
        self.state.ping_status.store(status, Ordering::SeqCst);
    }

    pub async fn last_dispatch(&self) -> Option<CapturedDispatch> {
        self.state.last_dispatch.lock().await.clone()
    }
}

async fn dispatch_handler(
    State(state): State<WorkerState>,
    headers: HeaderMap,
    Form(form): Form<DispatchForm>,
) -> StatusCode {
    state.dispatch_hits.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    *state.last_dispatch.lock().await = Some(CapturedDispatch {
        job_xml: form.job,
        organization: header(ORGANIZATION_HEADER),
        user: header(USER_HEADER),
    });
    StatusCode::from_u16(state.dispatch_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn ping_handler(State(state): State<WorkerState>) -> StatusCode {
    state.ping_hits.fetch_add(1, Ordering::SeqCst);
    StatusCode::from_u16(state.ping_status.load(Ordering::SeqCst))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Spawn a mock worker on an ephemeral port.
pub async fn spawn_worker(dispatch_status: u16, ping_status: u16) -> MockWorker {
    let state = WorkerState {
        dispatch_status: Arc::new(AtomicU16::new(dispatch_status)),
        ping_status: Arc::new(AtomicU16::new(ping_status)),
        dispatch_hits: Arc::new(AtomicUsize::new(0)),
        ping_hits: Arc::new(AtomicUsize::new(0)),
        last_dispatch: Arc::new(Mutex::new(None)),
    };

    // HEAD requests are routed to the GET handler.
    let app = Router::new()
        .route("/work/dispatch", post(dispatch_handler).get(ping_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock worker");
    let addr = listener.local_addr().expect("mock worker address");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockWorker {
        base_url: format!("http://{addr}"),
        state,
    }
}

/// Register a host and one service on it, returning the service path used
/// by [`spawn_worker`].
pub async fn register_worker_service(
    registry: &ServiceRegistry,
    service_type: &str,
    base_url: &str,
    max_load: f32,
) {
    registry
        .register_host(base_url, "127.0.0.1", 0, 4, max_load)
        .await
        .expect("register host");
    registry
        .register_service(service_type, base_url, "/work", true)
        .await
        .expect("register service");
}
