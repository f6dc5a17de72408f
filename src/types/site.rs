//! Observation site identity.

use serde::{Deserialize, Serialize};

/// Immutable site identity, read once at startup and shared by reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    /// Human-readable site name, written into FITS headers
    pub name: String,
    /// Device identifier, written into FITS headers and diagnostic files
    pub device_id: String,
    /// Geographic longitude in degrees, east positive
    pub longitude: f64,
    /// Geographic latitude in degrees, north positive
    pub latitude: f64,
    /// Altitude above sea level in meters
    pub altitude: f64,
    /// Timezone offset from UTC in hours, east positive
    pub timezone: i32,
}
