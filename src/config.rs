//! Configuration loading from TOML
//!
//! # Configuration File Format
//!
//! ```toml
//! [site]
//! name = "Ali Observatory"
//! device_id = "WMC-01"
//! longitude = 80.03
//! latitude = 32.32
//! altitude = 5100.0
//! timezone = 8
//!
//! [sampling]
//! cycle_secs = 20
//! sample_dir = "/data/env"
//!
//! [weather]
//! port = "/dev/ttyUSB0"
//! rain_enable = true
//! rain_port = "/dev/ttyUSB1"
//!
//! [sqm]
//! enable = true
//! address = "192.168.1.30"
//!
//! [camera]
//! driver = "sim"
//! raw_image_dir = "/data/cloud"
//! prefix = "WMC"
//! cloudage_file = "cloudage.txt"
//! sun_alt_max = -10.0
//! expdur_min = 1
//! expdur_max = 30
//! cooler_set = -20
//! saturation = 50000
//! fwhm_target = 3.0
//! focus_sigma = 0.1
//! cloud_stale_secs = 300
//! min_disk_free_gb = 100
//!
//! [network]
//! command_port = 4021
//!
//! [pdxp]
//! enable = true
//! host = "192.168.1.200"
//! port = 4020
//! source_id = 0x50001001
//! wea_json = false
//! ```

use crate::error::{Error, Result};
use crate::types::Site;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Sampling cadence and measurement storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Sensor sampling period, seconds
    #[serde(default = "default_cycle")]
    pub cycle_secs: u64,
    /// Root directory for per-sensor daily records and exchange files
    pub sample_dir: String,
}

fn default_cycle() -> u64 {
    20
}

/// Weather-station serial lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Combined T/H/P + wind station port (9600 baud)
    pub port: String,
    /// Independent rain detector enabled
    #[serde(default = "default_true")]
    pub rain_enable: bool,
    /// Rain detector port (4800 baud)
    #[serde(default)]
    pub rain_port: String,
}

/// Sky-quality meter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqmConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    /// Device IP address; TCP polling happens on port 10001
    #[serde(default)]
    pub address: String,
}

fn default_true() -> bool {
    true
}

/// All-sky cloud camera and its derived products.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Camera driver name. "sim" is the built-in deterministic sensor used
    /// for driverless deployments and tests.
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Root directory for raw FITS frames
    pub raw_image_dir: String,
    /// Nightly directory/file prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,
    /// Cloud-cover exchange file name, relative to `sample_dir`
    #[serde(default = "default_cloudage_file")]
    pub cloudage_file: String,
    /// Solar elevation threshold delimiting the observation night, degrees
    #[serde(default = "default_sun_alt")]
    pub sun_alt_max: f64,
    /// Exposure bounds, seconds
    #[serde(default = "default_expdur_min")]
    pub expdur_min: u32,
    #[serde(default = "default_expdur_max")]
    pub expdur_max: u32,
    /// Sensor saturation level, ADU
    #[serde(default = "default_saturation")]
    pub saturation: u32,
    /// Cooler set point, degrees Celsius
    #[serde(default = "default_cooler")]
    pub cooler_set: i32,
    /// Expected in-focus FWHM, pixels
    #[serde(default = "default_fwhm")]
    pub fwhm_target: f64,
    /// Auto-focus convergence sigma, pixels
    #[serde(default = "default_focus_sigma")]
    pub focus_sigma: f64,
    /// Cloud map considered stale after this many seconds without a reducer
    /// file update
    #[serde(default = "default_cloud_stale")]
    pub cloud_stale_secs: u64,
    /// Erase oldest raw-image directories when free space drops below this
    /// many GB; 0 disables the housekeeper
    #[serde(default)]
    pub min_disk_free_gb: u64,
}

fn default_driver() -> String {
    "sim".to_string()
}
fn default_prefix() -> String {
    "WMC".to_string()
}
fn default_cloudage_file() -> String {
    "cloudage.txt".to_string()
}
fn default_sun_alt() -> f64 {
    -10.0
}
fn default_expdur_min() -> u32 {
    1
}
fn default_expdur_max() -> u32 {
    30
}
fn default_saturation() -> u32 {
    50_000
}
fn default_cooler() -> i32 {
    -20
}
fn default_fwhm() -> f64 {
    3.0
}
fn default_focus_sigma() -> f64 {
    0.1
}
fn default_cloud_stale() -> u64 {
    300
}

/// Command ingress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// UDP port accepting the focus-control protocol
    #[serde(default = "default_command_port")]
    pub command_port: u16,
}

fn default_command_port() -> u16 {
    4021
}

/// Fused-telemetry uplink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdxpConfig {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    /// Frame source identifier
    #[serde(default = "default_source_id")]
    pub source_id: u32,
    /// Also mirror each frame as a WEA JSON diagnostic file
    #[serde(default)]
    pub wea_json: bool,
}

fn default_source_id() -> u32 {
    0x5000_1001
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub site: Site,
    pub sampling: SamplingConfig,
    pub weather: WeatherConfig,
    #[serde(default = "SqmConfig::disabled")]
    pub sqm: SqmConfig,
    pub camera: CameraConfig,
    #[serde(default = "NetworkConfig::default_section")]
    pub network: NetworkConfig,
    #[serde(default = "PdxpConfig::disabled")]
    pub pdxp: PdxpConfig,
}

impl SqmConfig {
    fn disabled() -> Self {
        Self {
            enable: false,
            address: String::new(),
        }
    }
}

impl NetworkConfig {
    fn default_section() -> Self {
        Self {
            command_port: default_command_port(),
        }
    }
}

impl PdxpConfig {
    fn disabled() -> Self {
        Self {
            enable: false,
            host: String::new(),
            port: 0,
            source_id: default_source_id(),
            wea_json: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Validation
    ///
    /// - exposure bounds must satisfy `1 <= expdur_min <= expdur_max`
    /// - `sun_alt_max` must lie in [-18, 0] degrees
    /// - an enabled SQM needs an address, an enabled PDXP uplink a peer
    /// - the camera driver name must be recognized
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.sampling.cycle_secs == 0 {
            return Err(Error::Config("cycle_secs must be positive".to_string()));
        }
        let cam = &self.camera;
        if cam.expdur_min == 0 || cam.expdur_min > cam.expdur_max {
            return Err(Error::Config(format!(
                "exposure bounds must satisfy 1 <= expdur_min <= expdur_max (got {}..{})",
                cam.expdur_min, cam.expdur_max
            )));
        }
        if !(-18.0..=0.0).contains(&cam.sun_alt_max) {
            return Err(Error::Config(format!(
                "sun_alt_max must be within [-18, 0] degrees (got {})",
                cam.sun_alt_max
            )));
        }
        if cam.driver != "sim" {
            return Err(Error::UnknownDevice(cam.driver.clone()));
        }
        if self.weather.rain_enable && self.weather.rain_port.is_empty() {
            return Err(Error::Config(
                "rain_enable requires rain_port".to_string(),
            ));
        }
        if self.sqm.enable && self.sqm.address.is_empty() {
            return Err(Error::Config("sqm.enable requires sqm.address".to_string()));
        }
        if self.pdxp.enable && (self.pdxp.host.is_empty() || self.pdxp.port == 0) {
            return Err(Error::Config(
                "pdxp.enable requires pdxp.host and pdxp.port".to_string(),
            ));
        }
        Ok(())
    }

    /// A complete configuration with placeholder hardware paths, used by
    /// `--default` to seed a new deployment.
    pub fn template() -> Self {
        Self {
            site: Site {
                name: "Observatory".to_string(),
                device_id: "WMC-01".to_string(),
                longitude: 80.0,
                latitude: 32.0,
                altitude: 5000.0,
                timezone: 8,
            },
            sampling: SamplingConfig {
                cycle_secs: default_cycle(),
                sample_dir: "/data/env".to_string(),
            },
            weather: WeatherConfig {
                port: "/dev/ttyUSB0".to_string(),
                rain_enable: true,
                rain_port: "/dev/ttyUSB1".to_string(),
            },
            sqm: SqmConfig {
                enable: true,
                address: "192.168.1.30".to_string(),
            },
            camera: CameraConfig {
                driver: default_driver(),
                raw_image_dir: "/data/cloud".to_string(),
                prefix: default_prefix(),
                cloudage_file: default_cloudage_file(),
                sun_alt_max: default_sun_alt(),
                expdur_min: default_expdur_min(),
                expdur_max: default_expdur_max(),
                saturation: default_saturation(),
                cooler_set: default_cooler(),
                fwhm_target: default_fwhm(),
                focus_sigma: default_focus_sigma(),
                cloud_stale_secs: default_cloud_stale(),
                min_disk_free_gb: 100,
            },
            network: NetworkConfig::default_section(),
            pdxp: PdxpConfig::disabled(),
        }
    }

    /// Write the template configuration, the `--default` CLI action.
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let text = basic_toml::to_string(&Self::template())
            .map_err(|e| Error::Config(format!("Failed to serialize defaults: {}", e)))?;
        fs::write(&path, text)
            .map_err(|e| Error::Config(format!("Failed to write {:?}: {}", path.as_ref(), e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_roundtrips_through_toml() {
        let text = basic_toml::to_string(&Config::template()).unwrap();
        let parsed: Config = basic_toml::from_str(&text).unwrap();
        parsed.validate().unwrap();
        assert_eq!(parsed.camera.cloud_stale_secs, 300);
        assert_eq!(parsed.pdxp.source_id, 0x5000_1001);
    }

    #[test]
    fn rejects_inverted_exposure_bounds() {
        let mut cfg = Config::template();
        cfg.camera.expdur_min = 40;
        cfg.camera.expdur_max = 30;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unknown_camera_driver() {
        let mut cfg = Config::template();
        cfg.camera.driver = "qhy".to_string();
        assert!(matches!(
            cfg.validate(),
            Err(Error::UnknownDevice(name)) if name == "qhy"
        ));
    }

    #[test]
    fn rejects_enabled_sqm_without_address() {
        let mut cfg = Config::template();
        cfg.sqm.address.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn minimal_file_fills_defaults() {
        let text = r#"
            [site]
            name = "x"
            device_id = "d"
            longitude = 1.0
            latitude = 2.0
            altitude = 3.0
            timezone = 0

            [sampling]
            sample_dir = "/tmp/env"

            [weather]
            port = "/dev/ttyS0"
            rain_enable = false

            [camera]
            raw_image_dir = "/tmp/raw"
        "#;
        let cfg: Config = basic_toml::from_str(text).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.sampling.cycle_secs, 20);
        assert_eq!(cfg.camera.sun_alt_max, -10.0);
        assert!(!cfg.sqm.enable);
        assert!(!cfg.pdxp.enable);
        assert_eq!(cfg.network.command_port, 4021);
    }
}
