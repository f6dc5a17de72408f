//! External star-extractor invocation and FWHM statistics.
//!
//! Each frame is handed to the SExtractor binary as a child process; the
//! ASCII catalogue it writes back is filtered and distilled into a single
//! clipped-mean FWHM. The reduce thread is the only caller, so at most one
//! child runs at a time.

use crate::error::{Error, Result};
use crate::types::{Frame, StarMeasure};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Frames with fewer admitted stars than this are useless for focusing.
const STAR_COUNT_MIN: usize = 50;
/// SNR gate for stars entering the statistics.
const STAT_SNR_MIN: f64 = 5.0;
/// Half-width of the central statistics region, fraction of the frame.
const CENTER_FRACTION: f64 = 0.3;

/// Candidate install locations, probed in order.
const EXE_CANDIDATES: [&str; 6] = [
    "/usr/bin/sex",
    "/usr/local/bin/sex",
    "/opt/homebrew/bin/sex",
    "/usr/bin/source-extractor",
    "/usr/local/bin/source-extractor",
    "/opt/homebrew/bin/source-extractor",
];

pub struct StarExtractor {
    exe: PathBuf,
    work_dir: PathBuf,
}

impl StarExtractor {
    /// Locate the extractor binary and materialise its configuration files.
    pub fn prepare() -> Result<Self> {
        let exe = EXE_CANDIDATES
            .iter()
            .map(PathBuf::from)
            .find(|p| p.exists())
            .ok_or_else(|| Error::Other("star extractor binary not found".to_string()))?;

        let work_dir = std::env::temp_dir().join("vayu-sex");
        fs::create_dir_all(&work_dir)?;
        write_if_absent(&work_dir.join("default.sex"), &default_sex())?;
        write_if_absent(&work_dir.join("default.param"), DEFAULT_PARAM)?;
        write_if_absent(&work_dir.join("default.conv"), &default_conv())?;
        write_if_absent(&work_dir.join("default.nnw"), DEFAULT_NNW)?;

        log::info!("star extractor: {}", exe.display());
        Ok(Self { exe, work_dir })
    }

    /// Run the extractor on a written frame and fill in its star list and
    /// FWHM product. A frame failing the star-count or statistics gates
    /// keeps `fwhm == 0`.
    pub fn measure(&self, frame: &mut Frame) -> Result<()> {
        let catalog = frame.path.with_extension("cat");

        let output = Command::new(&self.exe)
            .arg(&frame.path)
            .arg("-CATALOG_NAME")
            .arg(&catalog)
            .current_dir(&self.work_dir)
            .output()?;
        if !output.status.success() {
            return Err(Error::Other(format!(
                "star extractor exited with {} on {}: {}",
                output.status,
                frame.file_name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = fs::read_to_string(&catalog)?;
        let _ = fs::remove_file(&catalog);

        frame.stars = parse_catalog(&text);
        if frame.stars.len() < STAR_COUNT_MIN {
            log::warn!("{}: no enough stars found", frame.file_name);
            return Ok(());
        }

        if let Some((mean, sigma)) = fwhm_statistics(&mut frame.stars, frame.width, frame.height) {
            frame.fwhm = mean;
            frame.fwhm_err = sigma;
            log::info!(
                "{}, star count = {:6}, fwhm = {:4.1}, sigma = {:5.2}",
                frame.file_name,
                frame.stars.len(),
                frame.fwhm,
                frame.fwhm_err
            );
        } else {
            log::info!("{}, star count = {:6}", frame.file_name, frame.stars.len());
        }
        Ok(())
    }
}

fn write_if_absent(path: &Path, content: &str) -> Result<()> {
    if !path.exists() {
        fs::write(path, content)?;
    }
    Ok(())
}

/// Parse the whitespace-separated catalogue:
/// `x y elong area fwhm theta flux fluxErr fluxMax mag magErr`.
/// Only detections passing the admission filter survive.
pub fn parse_catalog(text: &str) -> Vec<StarMeasure> {
    let mut stars = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let f: Vec<f64> = line
            .split_whitespace()
            .filter_map(|t| t.parse().ok())
            .collect();
        if f.len() < 11 {
            continue;
        }
        let mut star = StarMeasure {
            x: f[0],
            y: f[1],
            elongation: f[2],
            area: f[3] as i32,
            fwhm: f[4],
            theta: f[5],
            flux: f[6],
            flux_err: f[7],
            flux_max: f[8],
            mag: f[9],
            mag_err: f[10],
            snr: 0.0,
            in_stat: false,
        };
        star.snr = if star.flux_err > 0.0 {
            star.flux / star.flux_err
        } else {
            0.0
        };
        if Frame::admit_star(&star) {
            stars.push(star);
        }
    }
    stars
}

/// Iteratively 2σ-clipped mean FWHM of the bright central stars.
///
/// Stars are gated to snr > 5 within ±30 % of the frame centre; the clip
/// repeats while at least 100 stars remain and the spread keeps shrinking by
/// more than 10 %. The result stands only when `mean > 1` and `mean/σ >= 3`.
pub fn fwhm_statistics(stars: &mut [StarMeasure], width: u32, height: u32) -> Option<(f64, f64)> {
    let x0 = width as f64 * 0.5 + 0.5;
    let y0 = height as f64 * 0.5 + 0.5;
    let w_half = CENTER_FRACTION * width as f64;
    let h_half = CENTER_FRACTION * height as f64;

    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sq = 0.0;
    let mut vmin = f64::MAX;
    let mut vmax = f64::MIN;
    for star in stars.iter_mut() {
        star.in_stat = star.snr > STAT_SNR_MIN
            && (star.x - x0).abs() <= w_half
            && (star.y - y0).abs() <= h_half;
        if star.in_stat {
            vmin = vmin.min(star.fwhm);
            vmax = vmax.max(star.fwhm);
            sum += star.fwhm;
            sq += star.fwhm * star.fwhm;
            n += 1;
        }
    }
    if n < 2 {
        return None;
    }

    let (mut mean, mut sigma) = moments(sum, sq, n);
    let mut low = mean - 2.0 * sigma;
    let mut high = mean + 2.0 * sigma;

    // spread covers every sample: no statistical peak to converge on
    if low < vmin && high > vmax {
        return None;
    }

    loop {
        let prev_sigma = sigma;
        n = 0;
        sum = 0.0;
        sq = 0.0;
        for star in stars.iter().filter(|s| s.in_stat) {
            if star.fwhm >= low && star.fwhm <= high {
                sum += star.fwhm;
                sq += star.fwhm * star.fwhm;
                n += 1;
            }
        }
        if n < 2 {
            return None;
        }
        let m = moments(sum, sq, n);
        mean = m.0;
        sigma = m.1;
        low = mean - 2.0 * sigma;
        high = mean + 2.0 * sigma;
        if !(n >= 100 && prev_sigma / sigma > 1.1) {
            break;
        }
    }

    if mean > 1.0 && mean / sigma >= 3.0 {
        Some((mean, sigma))
    } else {
        None
    }
}

fn moments(sum: f64, sq: f64, n: usize) -> (f64, f64) {
    let mean = sum / n as f64;
    let var = (sq - mean * sum) / (n as f64 - 1.0);
    (mean, if var > 0.0 { var.sqrt() } else { 0.0 })
}

fn default_sex() -> String {
    format!(
        "# Default configuration file for SExtractor 2.25.0\n\
         CATALOG_NAME     test.cat\n\
         CATALOG_TYPE     ASCII_HEAD\n\
         PARAMETERS_NAME  default.param\n\
         DETECT_TYPE      CCD\n\
         DETECT_MINAREA   {minarea}\n\
         DETECT_THRESH    1.5\n\
         ANALYSIS_THRESH  {thresh:.1}\n\
         FILTER           Y\n\
         FILTER_NAME      default.conv\n\
         DEBLEND_NTHRESH  4\n\
         DEBLEND_MINCONT  1\n\
         CLEAN            Y\n\
         CLEAN_PARAM      2\n\
         WEIGHT_TYPE      NONE\n\
         PHOT_APERTURES   5\n\
         PHOT_AUTOPARAMS  2.5, 3.5\n\
         PHOT_PETROPARAMS 2.0, 3.5\n\
         PHOT_AUTOAPERS   5.0,10.0\n\
         SATUR_LEVEL      50000.0\n\
         SATUR_KEY        SATURATE\n\
         MAG_ZEROPOINT    22.0\n\
         MAG_GAMMA        4.0\n\
         GAIN             1.0\n\
         GAIN_KEY         GAIN\n\
         PIXEL_SCALE      1.0\n\
         SEEING_FWHM      3\n\
         STARNNW_NAME     default.nnw\n\
         BACK_TYPE        AUTO\n\
         BACK_VALUE       0.0\n\
         BACK_SIZE        64\n\
         BACK_FILTERSIZE  3\n\
         BACKPHOTO_TYPE   LOCAL\n\
         BACKPHOTO_THICK  24\n\
         CHECKIMAGE_TYPE  NONE\n\
         CHECKIMAGE_NAME  check.fits\n\
         MEMORY_OBJSTACK  3000\n\
         MEMORY_PIXSTACK  300000\n\
         MEMORY_BUFSIZE   1024\n\
         VERBOSE_TYPE     QUIET\n\
         HEADER_SUFFIX    .head\n\
         WRITE_XML        N\n\
         XML_NAME         sex.xml\n",
        minarea = 3,
        thresh = 5.0
    )
}

const DEFAULT_PARAM: &str = "X_IMAGE\n\
Y_IMAGE\n\
ELONGATION\n\
ISOAREA_IMAGE\n\
FWHM_IMAGE\n\
THETA_IMAGE\n\
FLUX_BEST\n\
FLUXERR_BEST\n\
FLUX_MAX\n\
MAG_BEST\n\
MAGERR_BEST\n";

/// 5x5 Gaussian convolution mask for a 3-pixel FWHM point-spread function.
fn default_conv() -> String {
    let size = 5usize;
    let fwhm = 3.0f64;
    let sigma = fwhm / 2.0 / (2.0 * 2f64.ln()).sqrt();
    let ratio = -0.5 / (sigma * sigma);
    let center = (size / 2) as f64;

    let mut kernel = vec![0.0f64; size * size];
    let mut sum = 0.0;
    for j in 0..size {
        let dy2 = (j as f64 - center) * (j as f64 - center);
        for i in 0..size {
            let dx2 = (i as f64 - center) * (i as f64 - center);
            let v = ((dx2 + dy2) * ratio).exp();
            kernel[j * size + i] = v;
            sum += v;
        }
    }

    let mut text = String::from("CONV NORM\n");
    for j in 0..size {
        for i in 0..size {
            text.push_str(&format!("{:8.6}  ", kernel[j * size + i] / sum));
        }
        text.push('\n');
    }
    text
}

const DEFAULT_NNW: &str = "NNW\n\
# Neural Network Weights for the SExtractor star/galaxy classifier (V1.3)\n\
# inputs:\t9 for profile parameters + 1 for seeing.\n\
# outputs:\t``Stellarity index'' (0.0 to 1.0)\n\
# Seeing FWHM range: from 0.025 to 5.5'' (images must have 1.5 < FWHM < 5 pixels)\n\
# Optimized for Moffat profiles with 2<= beta <= 4.\n\
\n\
 3 10 10  1\n\
\n\
-1.56604e+00 -2.48265e+00 -1.44564e+00 -1.24675e+00 -9.44913e-01 -5.22453e-01  4.61342e-02  8.31957e-01  2.15505e+00  2.64769e-01\n\
 3.03477e+00  2.69561e+00  3.16188e+00  3.34497e+00  3.51885e+00  3.65570e+00  3.74856e+00  3.84541e+00  4.22811e+00  3.27734e+00\n\
\n\
-3.22480e-01 -2.12804e+00  6.50750e-01 -1.11242e+00 -1.40683e+00 -1.55944e+00 -1.84558e+00 -1.18946e-01  5.52395e-01 -4.36564e-01 -5.30052e+00\n\
 4.62594e-01 -3.29127e+00  1.10950e+00 -6.01857e-01  1.29492e-01  1.42290e+00  2.90741e+00  2.44058e+00 -9.19118e-01  8.42851e-01 -4.69824e+00\n\
-2.57424e+00  8.96469e-01  8.34775e-01  2.18845e+00  2.46526e+00  8.60878e-02 -6.88080e-01 -1.33623e-02  9.30403e-02  1.64942e+00 -1.01231e+00\n\
 4.81041e+00  1.53747e+00 -1.12216e+00 -3.16008e+00 -1.67404e+00 -1.75767e+00 -1.29310e+00  5.59549e-01  8.08468e-01 -1.01592e-02 -7.54052e+00\n\
 1.01933e+01 -2.09484e+01 -1.07426e+00  9.87912e-01  6.05210e-01 -6.04535e-02 -5.87826e-01 -7.94117e-01 -4.89190e-01 -8.12710e-02 -2.07067e+01\n\
-5.31793e+00  7.94240e+00 -4.64165e+00 -4.37436e+00 -1.55417e+00  7.54368e-01  1.09608e+00  1.45967e+00  1.62946e+00 -1.01301e+00  1.13514e-01\n\
 2.20336e-01  1.70056e+00 -5.20105e-01 -4.28330e-01  1.57258e-03 -3.36502e-01 -8.18568e-02 -7.16163e+00  8.23195e+00 -1.71561e-02 -1.13749e+01\n\
 3.75075e+00  7.25399e+00 -1.75325e+00 -2.68814e+00 -3.71128e+00 -4.62933e+00 -2.13747e+00 -1.89186e-01  1.29122e+00 -7.49380e-01  6.71712e-01\n\
-8.41923e-01  4.64997e+00  5.65808e-01 -3.08277e-01 -1.01687e+00  1.73127e-01 -8.92130e-01  1.89044e+00 -2.75543e-01 -7.72828e-01  5.36745e-01\n\
-3.65598e+00  7.56997e+00 -3.76373e+00 -1.74542e+00 -1.37540e-01 -5.55400e-01 -1.59195e-01  1.27910e-01  1.91906e+00  1.42119e+00 -4.35502e+00\n\
\n\
-1.70059e+00 -3.65695e+00  1.22367e+00 -5.74367e-01 -3.29571e+00  2.46316e+00  5.22353e+00  2.42038e+00  1.22919e+00 -9.22250e-01 -2.32028e+00\n\
\n\
 0.00000e+00\n\
 1.00000e+00\n";

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_line(x: f64, y: f64, fwhm: f64, flux: f64, flux_err: f64, area: i32) -> String {
        format!(
            "{:.3} {:.3} 1.10 {} {:.2} 15.0 {:.1} {:.1} 2000.0 12.50 0.02\n",
            x, y, area, fwhm, flux, flux_err
        )
    }

    #[test]
    fn catalog_parse_applies_admission_filter() {
        let mut text = String::from("# X_IMAGE Y_IMAGE ...\n");
        text.push_str(&catalog_line(100.0, 100.0, 3.2, 5000.0, 50.0, 12)); // good
        text.push_str(&catalog_line(101.0, 100.0, 0.8, 5000.0, 50.0, 12)); // fwhm too small
        text.push_str(&catalog_line(102.0, 100.0, 3.2, 5000.0, 2500.0, 12)); // snr 2
        text.push_str(&catalog_line(103.0, 100.0, 3.2, 5000.0, 50.0, 2)); // hot pixel
        text.push_str(&catalog_line(104.0, 100.0, 3.2, 0.5, 0.1, 12)); // flux < 1

        let stars = parse_catalog(&text);
        assert_eq!(stars.len(), 1);
        assert!((stars[0].snr - 100.0).abs() < 1e-9);
    }

    #[test]
    fn statistics_clip_the_bloated_tail() {
        // 140 central stars near fwhm 3.0, a 10-star bloated tail at 6.0
        // inside the centre, 30 corner stars that must be gated out
        let mut stars = Vec::new();
        for i in 0..140 {
            stars.push(StarMeasure {
                x: 400.0 + (i % 20) as f64,
                y: 500.0 + (i / 20) as f64,
                fwhm: 3.0 + 0.05 * ((i % 5) as f64 - 2.0),
                snr: 50.0,
                ..Default::default()
            });
        }
        for i in 0..10 {
            stars.push(StarMeasure {
                x: 450.0 + i as f64,
                y: 450.0,
                fwhm: 6.0,
                snr: 50.0,
                ..Default::default()
            });
        }
        for i in 0..30 {
            stars.push(StarMeasure {
                x: 10.0 + i as f64,
                y: 10.0,
                fwhm: 9.0,
                snr: 50.0,
                ..Default::default()
            });
        }
        let (mean, sigma) = fwhm_statistics(&mut stars, 1024, 1024).unwrap();
        assert!((mean - 3.0).abs() < 0.1, "mean = {}", mean);
        assert!(sigma < 0.2);
        // corner stars never entered the statistics
        assert_eq!(stars.iter().filter(|s| s.in_stat).count(), 150);
    }

    #[test]
    fn low_snr_stars_are_gated_out() {
        let mut stars: Vec<StarMeasure> = (0..120)
            .map(|i| StarMeasure {
                x: 500.0,
                y: 500.0 + i as f64,
                fwhm: 3.0,
                snr: 4.0,
                ..Default::default()
            })
            .collect();
        assert!(fwhm_statistics(&mut stars, 1024, 1024).is_none());
    }

    #[test]
    fn conv_kernel_is_normalized() {
        let text = default_conv();
        assert!(text.starts_with("CONV NORM"));
        let sum: f64 = text
            .lines()
            .skip(1)
            .flat_map(|l| l.split_whitespace())
            .filter_map(|t| t.parse::<f64>().ok())
            .sum();
        assert!((sum - 1.0).abs() < 1e-3, "kernel sum = {}", sum);
    }

    #[test]
    fn param_file_lists_the_catalog_columns() {
        assert!(DEFAULT_PARAM.contains("FWHM_IMAGE"));
        assert_eq!(DEFAULT_PARAM.lines().count(), 11);
    }
}
