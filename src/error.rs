//! Failure classes of the agent.
//!
//! Configuration errors stop the process before the first cycle. Every other
//! class is scoped to one report cycle and is surfaced to the driver, which
//! decides whether to exit or keep ticking.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mtr binary not found in PATH")]
    MtrNotFound,

    #[error("error reading CA certificate {path}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("no certificate found in CA file {0}")]
    EmptyCaFile(PathBuf),

    #[error("invalid broker url {url}: {reason}")]
    BrokerUrl { url: String, reason: String },

    #[error("no broker url configured")]
    NoBrokers,

    #[error("can't get the hostname to use it as the client id, use --clientid")]
    ClientId,

    #[error("invalid setting {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("error running the mtr command: {0}")]
    Spawn(#[source] io::Error),

    #[error("mtr exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },

    #[error("line {line}: missing {field} column")]
    MissingColumn { line: usize, field: &'static str },

    #[error("line {line}: error parsing {field} field {value:?}")]
    Field {
        line: usize,
        field: &'static str,
        value: String,
    },
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("geocoding of location {0:?} failed")]
    Geocode(String),

    #[error("location lookup task failed: {0}")]
    Task(String),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no usable broker candidate")]
    NoCandidates,

    #[error("connection to the broker(s) failed: {0}")]
    Connect(String),

    #[error("publish to {broker} failed: {reason}")]
    Publish { broker: String, reason: String },

    #[error("publish timed out after {0:?}")]
    Timeout(Duration),

    #[error("error serializing report: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of one report cycle.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Measure(#[from] MeasureError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

impl CycleError {
    /// Process exit status used when a single-shot cycle fails.
    pub fn exit_code(&self) -> exitcode::ExitCode {
        match self {
            CycleError::Measure(_) => exitcode::SOFTWARE,
            CycleError::Resolve(_) => exitcode::TEMPFAIL,
            CycleError::Delivery(_) => exitcode::UNAVAILABLE,
        }
    }
}
