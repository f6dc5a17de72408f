//! VayuMon - unattended weather-monitoring daemon for an optical
//! observatory site.
//!
//! The daemon couples the site's environmental sensors (weather station,
//! rain detector, sky-quality meter, all-sky cloud camera) to one sampling
//! clock, derives summary products (cloud cover, sky background, image
//! FWHM), publishes a fused binary telemetry frame over UDP and keeps daily
//! per-sensor records on disk.

pub mod app;
pub mod config;
pub mod devices;
pub mod error;
pub mod monitor;
pub mod records;
pub mod streaming;
pub mod transport;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
