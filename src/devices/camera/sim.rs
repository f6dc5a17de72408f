//! Deterministic simulated camera.
//!
//! Backs driverless deployments and the pipeline tests. The synthetic sky
//! has a flat background whose level scales linearly with exposure time, so
//! the adaptive-exposure controller behaves exactly as it would against a
//! real sensor approaching its target counts.

use super::driver::{CameraDriver, Roi, SensorGeometry, ShutterMode};
use crate::error::{Error, Result};
use std::time::Instant;

const SIM_WIDTH: u32 = 1024;
const SIM_HEIGHT: u32 = 1024;
/// Background accumulation rate, ADU per second of exposure.
const SKY_RATE: f64 = 8000.0;

pub struct SimCamera {
    connected: bool,
    cooler_on: bool,
    setpoint: i32,
    temperature: f64,
    exposure_s: f64,
    exposing_since: Option<Instant>,
    shutter: ShutterMode,
    preamp_index: i32,
}

impl SimCamera {
    pub fn new() -> Self {
        Self {
            connected: false,
            cooler_on: false,
            setpoint: 0,
            temperature: 20.0,
            exposure_s: 1.0,
            exposing_since: None,
            shutter: ShutterMode::Auto,
            preamp_index: 0,
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::Camera("not connected".to_string()))
        }
    }
}

impl Default for SimCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDriver for SimCamera {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.exposing_since = None;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn geometry(&self) -> SensorGeometry {
        SensorGeometry {
            width: SIM_WIDTH,
            height: SIM_HEIGHT,
        }
    }

    fn set_cooler(&mut self, on: bool, setpoint_c: i32) -> Result<()> {
        self.ensure_connected()?;
        self.cooler_on = on;
        self.setpoint = setpoint_c;
        Ok(())
    }

    fn sensor_temperature(&mut self) -> Result<f64> {
        self.ensure_connected()?;
        if self.cooler_on {
            // approach the set point by half the remaining gap per read
            self.temperature += (self.setpoint as f64 - self.temperature) * 0.5;
        }
        Ok(self.temperature)
    }

    fn cooler_setpoint(&self) -> i32 {
        self.setpoint
    }

    fn set_shutter(&mut self, mode: ShutterMode) -> Result<()> {
        self.ensure_connected()?;
        self.shutter = mode;
        Ok(())
    }

    fn set_exposure(&mut self, seconds: f64) -> Result<()> {
        self.ensure_connected()?;
        if seconds <= 0.0 {
            return Err(Error::Camera(format!("exposure {}", seconds)));
        }
        self.exposure_s = seconds;
        Ok(())
    }

    fn start_exposure(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.exposing_since = Some(Instant::now());
        Ok(())
    }

    fn abort_exposure(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.exposing_since = None;
        Ok(())
    }

    fn set_roi(&mut self, _roi: Roi) -> Result<()> {
        self.ensure_connected()
    }

    fn set_adc_channel(&mut self, _channel: i32) -> Result<()> {
        self.ensure_connected()
    }

    fn set_read_port(&mut self, _port: i32) -> Result<()> {
        self.ensure_connected()
    }

    fn set_read_rate(&mut self, _index: i32) -> Result<()> {
        self.ensure_connected()
    }

    fn set_preamp_gain(&mut self, index: i32) -> Result<()> {
        self.ensure_connected()?;
        self.preamp_index = index;
        Ok(())
    }

    fn set_vshift_rate(&mut self, _index: i32) -> Result<()> {
        self.ensure_connected()
    }

    fn set_em_gain(&mut self, _gain: i32) -> Result<()> {
        self.ensure_connected()
    }

    fn preamp_gain(&self) -> f32 {
        self.preamp_index as f32
    }

    fn image_ready(&mut self) -> Result<bool> {
        self.ensure_connected()?;
        // exposures complete after at most 50 ms of wall time so the
        // supervisor and the tests never wait for a real sky
        Ok(self
            .exposing_since
            .map(|t| t.elapsed().as_secs_f64() >= self.exposure_s.min(0.05))
            .unwrap_or(false))
    }

    fn read_image(&mut self) -> Result<Vec<u16>> {
        self.ensure_connected()?;
        if self.exposing_since.take().is_none() {
            return Err(Error::Camera("no exposure in progress".to_string()));
        }
        let level = if self.shutter == ShutterMode::AlwaysShut {
            0 // dark frame
        } else {
            (SKY_RATE * self.exposure_s).min(65_535.0) as u16
        };
        Ok(vec![level; (SIM_WIDTH * SIM_HEIGHT) as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operations_require_connection() {
        let mut cam = SimCamera::new();
        assert!(cam.set_exposure(2.0).is_err());
        cam.connect().unwrap();
        assert!(cam.set_exposure(2.0).is_ok());
    }

    #[test]
    fn background_scales_with_exposure() {
        let mut cam = SimCamera::new();
        cam.connect().unwrap();
        cam.set_exposure(2.0).unwrap();
        cam.start_exposure().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(cam.image_ready().unwrap());
        let img = cam.read_image().unwrap();
        assert_eq!(img.len(), (SIM_WIDTH * SIM_HEIGHT) as usize);
        assert_eq!(img[0], 16_000);
    }

    #[test]
    fn cooler_converges_toward_setpoint() {
        let mut cam = SimCamera::new();
        cam.connect().unwrap();
        cam.set_cooler(true, -20).unwrap();
        let mut t = 100.0;
        for _ in 0..20 {
            t = cam.sensor_temperature().unwrap();
        }
        assert!((t - -20.0).abs() < 1.0);
    }
}
