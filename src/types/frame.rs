//! Camera frame and per-star measurements.

use chrono::NaiveDateTime;
use std::path::PathBuf;

/// One detection from the star-extractor catalogue.
#[derive(Debug, Clone, Default)]
pub struct StarMeasure {
    pub x: f64,
    pub y: f64,
    pub elongation: f64,
    pub area: i32,
    pub fwhm: f64,
    pub theta: f64,
    pub flux: f64,
    pub flux_err: f64,
    pub flux_max: f64,
    pub mag: f64,
    pub mag_err: f64,
    /// Signal-to-noise ratio, flux / flux_err
    pub snr: f64,
    /// Participates in the FWHM statistics
    pub in_stat: bool,
}

/// One exposed frame flowing from the camera supervisor to the reducer.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Full path of the written FITS file
    pub path: PathBuf,
    /// Bare file name, for logs and the observed list
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    /// UTC start of exposure
    pub date_obs: NaiveDateTime,
    /// Exposure duration, seconds
    pub expdur: f64,
    /// Mean count of the fixed central patch
    pub mean_center: f64,
    pub stars: Vec<StarMeasure>,
    /// Clipped mean FWHM of the central stars; 0 when the frame failed the
    /// statistics gate
    pub fwhm: f64,
    pub fwhm_err: f64,
}

impl Frame {
    pub fn new(
        path: PathBuf,
        width: u32,
        height: u32,
        date_obs: NaiveDateTime,
        expdur: f64,
        mean_center: f64,
    ) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            file_name,
            width,
            height,
            date_obs,
            expdur,
            mean_center,
            stars: Vec::new(),
            fwhm: 0.0,
            fwhm_err: 0.0,
        }
    }

    /// Admission filter for catalogue detections: flux ≥ 1, area ≥ 3,
    /// snr ≥ 3, fwhm > 1.
    pub fn admit_star(star: &StarMeasure) -> bool {
        star.flux >= 1.0 && star.area >= 3 && star.snr >= 3.0 && star.fwhm > 1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn star(flux: f64, area: i32, snr: f64, fwhm: f64) -> StarMeasure {
        StarMeasure {
            flux,
            area,
            snr,
            fwhm,
            ..Default::default()
        }
    }

    #[test]
    fn admission_filter_bounds() {
        assert!(Frame::admit_star(&star(1.0, 3, 3.0, 1.1)));
        assert!(!Frame::admit_star(&star(0.5, 3, 3.0, 1.1)));
        assert!(!Frame::admit_star(&star(1.0, 2, 3.0, 1.1)));
        assert!(!Frame::admit_star(&star(1.0, 3, 2.9, 1.1)));
        assert!(!Frame::admit_star(&star(1.0, 3, 3.0, 1.0)));
    }
}
