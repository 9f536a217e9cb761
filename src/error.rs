use std::path::PathBuf;

use crate::streamer::{Status, StreamerId};

/// Failures reported by a site adapter. All of them are contained by the
/// streamer that hit them.
#[derive(thiserror::Error, Debug)]
pub enum AdapterError {
    #[error("site did not answer in time")]
    Timeout,
    #[error("stream is no longer available")]
    Unavailable,
    #[error("rate limited by site")]
    RateLimited,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest_middleware::Error),
}

impl From<reqwest::Error> for AdapterError {
    fn from(e: reqwest::Error) -> Self {
        AdapterError::Http(e.into())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    #[error("could not write recording: {0}")]
    WriteFailure(#[from] std::io::Error),
    #[error("media source dropped: {0}")]
    SourceDropped(String),
}

/// Errors returned synchronously to the caller of a control command. A failed
/// command never changes any state.
#[derive(thiserror::Error, Debug)]
pub enum CommandError {
    #[error("streamer {0} not found")]
    NotFound(StreamerId),
    #[error("streamer {0} already exists")]
    AlreadyExists(StreamerId),
    #[error("unknown site {0:?}")]
    UnknownSite(String),
    #[error("cannot {command} {id} while {status}")]
    InvalidTransition {
        id: StreamerId,
        status: Status,
        command: &'static str,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
}
