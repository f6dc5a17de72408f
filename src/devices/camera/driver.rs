//! Camera driver abstraction.
//!
//! The vendor SDK is an external collaborator; the pipeline only consumes
//! the operations below. Implementations must be safe to drive from the
//! single supervisor thread that owns them.

use crate::error::Result;

/// Mechanical shutter behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterMode {
    Auto = 0,
    AlwaysOpen = 1,
    AlwaysShut = 2,
}

/// Sensor dimensions in unbinned pixels.
#[derive(Debug, Clone, Copy)]
pub struct SensorGeometry {
    pub width: u32,
    pub height: u32,
}

/// Region of interest and binning.
#[derive(Debug, Clone, Copy)]
pub struct Roi {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    pub xbin: u32,
    pub ybin: u32,
}

pub trait CameraDriver: Send {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;

    fn geometry(&self) -> SensorGeometry;

    fn set_cooler(&mut self, on: bool, setpoint_c: i32) -> Result<()>;
    /// Current sensor temperature, degrees Celsius.
    fn sensor_temperature(&mut self) -> Result<f64>;
    fn cooler_setpoint(&self) -> i32;

    fn set_shutter(&mut self, mode: ShutterMode) -> Result<()>;
    /// Program the exposure duration for subsequent frames.
    fn set_exposure(&mut self, seconds: f64) -> Result<()>;
    fn start_exposure(&mut self) -> Result<()>;
    fn abort_exposure(&mut self) -> Result<()>;

    fn set_roi(&mut self, roi: Roi) -> Result<()>;
    fn set_adc_channel(&mut self, channel: i32) -> Result<()>;
    fn set_read_port(&mut self, port: i32) -> Result<()>;
    fn set_read_rate(&mut self, index: i32) -> Result<()>;
    fn set_preamp_gain(&mut self, index: i32) -> Result<()>;
    fn set_vshift_rate(&mut self, index: i32) -> Result<()>;
    fn set_em_gain(&mut self, gain: i32) -> Result<()>;
    fn preamp_gain(&self) -> f32;

    /// The programmed exposure has completed and data can be read out.
    fn image_ready(&mut self) -> Result<bool>;
    /// Fetch the frame, row-major u16.
    fn read_image(&mut self) -> Result<Vec<u16>>;
}

/// Instantiate a driver by config name.
pub fn create_driver(name: &str) -> Result<Box<dyn CameraDriver>> {
    match name {
        "sim" => Ok(Box::new(super::sim::SimCamera::new())),
        other => Err(crate::error::Error::UnknownDevice(other.to_string())),
    }
}
