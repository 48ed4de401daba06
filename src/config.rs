use std::collections::HashMap;
use std::time::Duration;

/// Dispatch interval property, in milliseconds. 0 disables dispatching.
pub const OPT_DISPATCH_INTERVAL: &str = "dispatch.interval";

/// Heartbeat interval property, in seconds. 0 disables the heartbeat.
pub const OPT_HEARTBEAT_INTERVAL: &str = "heartbeat.interval";

/// Failed attempts before a WARNING service transitions to ERROR.
pub const OPT_MAX_ATTEMPTS: &str = "max.attempts";

/// Whether the dispatcher refreshes job statistics each round.
pub const OPT_JOB_STATISTICS: &str = "jobstats.collect";

/// Maximum age in days of jobs feeding the service statistics.
pub const OPT_MAX_JOB_AGE: &str = "jobstats.max.age";

/// Load budget of the local host, defaults to the number of cores.
pub const OPT_MAX_LOAD: &str = "host.max.load";

/// Base URL under which this registry node is reachable.
pub const OPT_HOST_URL: &str = "host.url";

/// Base URL under which job XML documents are served, defaults to the
/// host URL.
pub const OPT_JOBS_URL: &str = "jobs.url";

pub const MIN_DISPATCH_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_ATTEMPTS: i32 = 1;
pub const DEFAULT_MAX_JOB_AGE_DAYS: i64 = 14;
pub const DEFAULT_HOST_URL: &str = "http://localhost:8080";

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub host_url: String,
    pub jobs_url: String,
    /// Zero disables the dispatcher.
    pub dispatch_interval: Duration,
    /// Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    pub max_attempts: i32,
    pub collect_job_stats: bool,
    pub max_job_age_days: i64,
    pub max_load: f32,
    pub cores: i32,
    pub memory: i64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get() as i32)
            .unwrap_or(1);
        Self {
            host_url: DEFAULT_HOST_URL.to_string(),
            jobs_url: DEFAULT_HOST_URL.to_string(),
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            collect_job_stats: true,
            max_job_age_days: DEFAULT_MAX_JOB_AGE_DAYS,
            max_load: cores as f32,
            cores,
            memory: 0,
        }
    }
}

impl RegistryConfig {
    /// Build a configuration from untyped string properties. Malformed
    /// values fall back to their defaults with a warning, out-of-range
    /// intervals are clamped.
    pub fn from_properties(properties: &HashMap<String, String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = non_blank(properties, OPT_HOST_URL) {
            config.host_url = url.trim_end_matches('/').to_string();
            config.jobs_url = config.host_url.clone();
        }
        if let Some(url) = non_blank(properties, OPT_JOBS_URL) {
            config.jobs_url = url.trim_end_matches('/').to_string();
        }

        if let Some(value) = non_blank(properties, OPT_DISPATCH_INTERVAL) {
            let millis = match value.parse::<i64>() {
                Ok(millis) => millis,
                Err(_) => {
                    tracing::warn!(value, "Dispatch interval is malformed, setting to minimum");
                    MIN_DISPATCH_INTERVAL.as_millis() as i64
                }
            };
            config.dispatch_interval = if millis == 0 {
                tracing::info!("Dispatching disabled");
                Duration::ZERO
            } else if millis < MIN_DISPATCH_INTERVAL.as_millis() as i64 {
                tracing::warn!(
                    millis,
                    "Dispatch interval too low, adjusting to {} ms",
                    MIN_DISPATCH_INTERVAL.as_millis()
                );
                MIN_DISPATCH_INTERVAL
            } else {
                tracing::info!(millis, "Dispatch interval set");
                Duration::from_millis(millis as u64)
            };
        }

        if let Some(value) = non_blank(properties, OPT_HEARTBEAT_INTERVAL) {
            let seconds = match value.parse::<i64>() {
                Ok(seconds) => seconds,
                Err(_) => {
                    tracing::warn!(value, "Heartbeat interval is malformed, setting to default");
                    DEFAULT_HEARTBEAT_INTERVAL.as_secs() as i64
                }
            };
            config.heartbeat_interval = if seconds == 0 {
                tracing::info!("Heartbeat disabled");
                Duration::ZERO
            } else if seconds < 0 {
                tracing::warn!(
                    seconds,
                    "Heartbeat interval too low, adjusting to {} s",
                    DEFAULT_HEARTBEAT_INTERVAL.as_secs()
                );
                DEFAULT_HEARTBEAT_INTERVAL
            } else {
                tracing::info!(seconds, "Heartbeat interval set");
                Duration::from_secs(seconds as u64)
            };
        }

        if let Some(value) = non_blank(properties, OPT_MAX_ATTEMPTS) {
            match value.parse::<i32>() {
                Ok(attempts) => {
                    config.max_attempts = attempts;
                    tracing::info!(attempts, "Max attempts before error state set");
                }
                Err(_) => {
                    tracing::warn!(value, "Max attempts must be an integer, keeping default");
                }
            }
        }

        if let Some(value) = non_blank(properties, OPT_JOB_STATISTICS) {
            match value.parse::<bool>() {
                Ok(collect) => config.collect_job_stats = collect,
                Err(_) => {
                    tracing::warn!(value, "Job statistics flag is malformed, keeping default");
                }
            }
        }

        if let Some(value) = non_blank(properties, OPT_MAX_JOB_AGE) {
            match value.parse::<i64>() {
                Ok(days) => {
                    config.max_job_age_days = days;
                    tracing::info!(days, "Statistics max job age set");
                }
                Err(_) => {
                    tracing::warn!(value, "Max job age must be an integer, keeping default");
                }
            }
        }

        if let Some(value) = non_blank(properties, OPT_MAX_LOAD) {
            match value.parse::<f32>() {
                Ok(max_load) => {
                    config.max_load = max_load;
                    tracing::info!(%max_load, "Max load set");
                }
                Err(_) => {
                    tracing::warn!(
                        value,
                        cores = config.cores,
                        "Max load is not a number, falling back to the number of cores"
                    );
                }
            }
        }

        config
    }
}

fn non_blank<'a>(properties: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    properties
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}
