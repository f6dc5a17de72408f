//! Error types for the monitoring daemon
//!
//! # Error Recovery Strategies
//!
//! ## Transient Errors (Retry Next Cycle)
//!
//! - **`Serial`** / **`Io`**: port or socket hiccup. Pollers absorb these into
//!   their channel liveness state and reconnect on the next cycle; they never
//!   unwind across a thread boundary.
//!
//! ## Protocol Errors (Log and Continue)
//!
//! - **`Protocol`**: a frame failed validation (bad length byte, short reply,
//!   malformed catalogue line). The offending sample is discarded and the
//!   producing channel keeps running.
//! - **`Json`**: a diagnostic file could not be serialized. The write is
//!   skipped; the binary telemetry path is unaffected.
//!
//! ## Configuration Errors (Fix and Restart)
//!
//! - **`Config`**: configuration file missing or invalid.
//! - **`UnknownDevice`**: camera driver name not recognized.
//!
//! ## Fatal Errors
//!
//! - **`Camera`**: the camera driver reported a failure the pipeline cannot
//!   retry in place; the camera supervisor disconnects and reconnects.
//! - **`ThreadPanic`**: a worker thread panicked; the owning component must be
//!   restarted.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Unknown camera driver: {0}")]
    UnknownDevice(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Thread panic")]
    ThreadPanic,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
