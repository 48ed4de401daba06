use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No service of type '{0}' available")]
    ServiceUnavailable(String),

    #[error("Job {0} cannot be dispatched: {1}")]
    Undispatchable(i64, String),

    #[error("Job {0} was modified concurrently")]
    Conflict(i64),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Wire format error: {0}")]
    Wire(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;
