//! All-sky cloud-camera pipeline.
//!
//! A supervisor thread drives the camera driver through the per-frame cycle
//! (expose, read out, write FITS, adapt exposure, dispatch); a cooling
//! thread samples the sensor temperature while the pipeline idles; during a
//! focus session a reduce thread feeds written frames through the star
//! extractor and the auto-focus controller.
//!
//! Frame dispatch depends on the focus mode: ordinary frames are announced
//! to the external reducer through `observed.list`, focus frames are pushed
//! into the reduce queue and the cadence tightens to the exposure time
//! itself.

pub mod driver;
pub mod extractor;
pub mod fits;
pub mod focus;
pub mod sim;

use crate::config::CameraConfig;
use crate::error::{Error, Result};
use crate::records::DailyRecord;
use crate::streaming::FocusMessage;
use crate::transport::UdpLink;
use crate::types::{Frame, Site};
use chrono::{Datelike, Utc};
use crossbeam_channel::{Receiver, Sender};
use driver::{CameraDriver, ShutterMode};
use extractor::StarExtractor;
use focus::{FocusAlgo, FocusStep};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// ADU target for the central patch; exposure is servoed to hold it.
const CENTER_TARGET: f64 = 40_000.0;
/// Half-size of the central statistics patch, pixels.
const CENTER_HALF: u32 = 256;
/// Accepted FWHMs fed to the focus decision.
const FOCUS_WINDOW: usize = 3;
/// FWHM margin over the expectation before refocusing is worth a step.
const FWHM_EXPECT_ERROR: f64 = 0.2;
/// Consecutive temperature-read failures tolerated while idle.
const TEMP_FAIL_MAX: u32 = 3;
/// Focus frames older than this are dropped; the extractor is backlogged.
const FRAME_MAX_AGE_SECS: i64 = 60;

/// Per-frame pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PipelineState {
    Idle = 0,
    Exposing = 1,
    Reading = 2,
    Written = 3,
    Error = 4,
}

impl PipelineState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => PipelineState::Idle,
            1 => PipelineState::Exposing,
            2 => PipelineState::Reading,
            3 => PipelineState::Written,
            _ => PipelineState::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FocusMode {
    Off,
    Manual,
    Auto,
}

struct FocusSession {
    mode: FocusMode,
    /// Endpoint the MOVE/END messages go back through
    reply: Option<Arc<UdpLink>>,
    /// Feed of written frames into the reduce thread
    feed: Option<Sender<Frame>>,
    worker: Option<JoinHandle<()>>,
}

struct CamShared {
    state: AtomicU8,
    /// Channel health as the telemetry composer sees it
    healthy: AtomicBool,
    shutdown: AtomicBool,
    focus: Mutex<FocusSession>,
    /// UTC of the last written frame, extended ISO
    last_obs: Mutex<String>,
}

impl CamShared {
    fn state(&self) -> PipelineState {
        PipelineState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, s: PipelineState) {
        self.state.store(s as u8, Ordering::Relaxed);
    }

    fn focus_mode(&self) -> FocusMode {
        self.focus.lock().mode
    }
}

/// The driver is shared between the supervisor (frames) and the cooling
/// watch (temperature); the supervisor holds the lock for the whole of a
/// frame, so temperature sampling naturally only happens while idle.
type SharedDriver = Arc<Mutex<Option<Box<dyn CameraDriver>>>>;

pub struct CloudCamera {
    shared: Arc<CamShared>,
    supervisor: Option<JoinHandle<()>>,
    cooler: Option<JoinHandle<()>>,
    config: CameraConfig,
}

impl CloudCamera {
    /// Create the nightly directory structure and start the supervisor and
    /// cooling threads.
    pub fn start(
        config: CameraConfig,
        site: Arc<Site>,
        sample_dir: PathBuf,
        sample_cycle: u64,
    ) -> Result<Self> {
        let today = Utc::now().date_naive();

        // raw frames: <dirRawImage>/<prefix><YYMMDD>/
        let raw_dir = PathBuf::from(&config.raw_image_dir).join(format!(
            "{}{:02}{:02}{:02}",
            config.prefix,
            today.year() % 100,
            today.month(),
            today.day()
        ));
        fs::create_dir_all(&raw_dir)?;

        // reducer hand-off list, truncated at each nightly start
        let observed_list = sample_dir.join("observed.list");
        fs::write(&observed_list, b"")?;

        let day_log = DailyRecord::with_stem(&sample_dir, &config.prefix, "WMC");

        let shared = Arc::new(CamShared {
            state: AtomicU8::new(PipelineState::Idle as u8),
            healthy: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            focus: Mutex::new(FocusSession {
                mode: FocusMode::Off,
                reply: None,
                feed: None,
                worker: None,
            }),
            last_obs: Mutex::new(String::new()),
        });

        let camera: SharedDriver = Arc::new(Mutex::new(None));

        let supervisor = {
            let shared = Arc::clone(&shared);
            let camera = Arc::clone(&camera);
            let config = config.clone();
            let site = Arc::clone(&site);
            std::thread::Builder::new()
                .name("cloudcam".to_string())
                .spawn(move || {
                    let mut sup = Supervisor {
                        config,
                        site,
                        raw_dir,
                        observed_list,
                        day_log,
                        shared,
                        camera,
                        expdur: 0,
                        programmed_expdur: f64::NAN,
                        frame_no: 1,
                        sample_cycle: Duration::from_secs(sample_cycle.max(1)),
                    };
                    sup.run();
                })
                .map_err(|e| Error::Other(format!("spawn cloudcam: {}", e)))?
        };

        let cooler = {
            let shared = Arc::clone(&shared);
            let camera = Arc::clone(&camera);
            std::thread::Builder::new()
                .name("cloudcam-temp".to_string())
                .spawn(move || cooling_watch(shared, camera))
                .map_err(|e| Error::Other(format!("spawn cloudcam-temp: {}", e)))?
        };

        Ok(Self {
            shared,
            supervisor: Some(supervisor),
            cooler: Some(cooler),
            config,
        })
    }

    /// The camera and its pipeline are in a working state.
    pub fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Relaxed)
    }

    /// UTC of the last written frame.
    pub fn last_observation(&self) -> String {
        self.shared.last_obs.lock().clone()
    }

    /// Begin a focus session. Auto mode runs the step controller; manual
    /// mode only tightens the frame cadence while an operator drives the
    /// focuser directly.
    pub fn begin_focus(&self, manual: bool, reply: Arc<UdpLink>) {
        let mut session = self.shared.focus.lock();
        if session.mode != FocusMode::Off {
            return;
        }
        session.mode = if manual {
            FocusMode::Manual
        } else {
            FocusMode::Auto
        };
        session.reply = Some(Arc::clone(&reply));

        let (tx, rx) = crossbeam_channel::bounded::<Frame>(8);
        session.feed = Some(tx);

        let shared = Arc::clone(&self.shared);
        let expected = self.config.fwhm_target;
        let sigma_max = self.config.focus_sigma;
        session.worker = Some(
            std::thread::Builder::new()
                .name("cloudcam-reduce".to_string())
                .spawn(move || reduce_loop(rx, shared, expected, sigma_max))
                .expect("spawn cloudcam-reduce"),
        );
        log::info!(
            "focus session started ({})",
            if manual { "manual" } else { "auto" }
        );
    }

    /// End the focus session; the reduce thread drains and exits.
    pub fn end_focus(&self) {
        let worker = {
            let mut session = self.shared.focus.lock();
            session.mode = FocusMode::Off;
            session.feed = None; // closes the channel
            session.reply = None;
            session.worker.take()
        };
        if let Some(handle) = worker {
            let _ = handle.join();
            log::info!("focus session ended");
        }
    }

    /// The focuser reports the last commanded step would cross its limit:
    /// terminate the session with a failure notice.
    pub fn focus_limit(&self) {
        let reply = {
            let session = self.shared.focus.lock();
            if session.mode != FocusMode::Auto {
                None
            } else {
                session.reply.clone()
            }
        };
        if let Some(endpoint) = reply {
            let msg = FocusMessage::End {
                success: false,
                fwhm_centi: 0,
            };
            if let Err(e) = endpoint.reply(&msg.encode()) {
                log::warn!("focus limit reply failed: {}", e);
            }
            log::warn!("focuser limit reached, auto-focus aborted");
        }
        self.end_focus();
    }

    pub fn stop(&mut self) {
        self.end_focus();
        self.shared.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.supervisor.take() {
            let _ = h.join();
        }
        if let Some(h) = self.cooler.take() {
            let _ = h.join();
        }
        log::info!("Cloud Camera: stopped");
    }
}

impl Drop for CloudCamera {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Supervisor {
    config: CameraConfig,
    site: Arc<Site>,
    raw_dir: PathBuf,
    observed_list: PathBuf,
    day_log: DailyRecord,
    shared: Arc<CamShared>,
    camera: SharedDriver,
    /// Commanded exposure, whole seconds
    expdur: u32,
    /// Exposure most recently programmed into the driver
    programmed_expdur: f64,
    frame_no: u32,
    sample_cycle: Duration,
}

impl Supervisor {
    fn run(&mut self) {
        while !self.shared.shutdown.load(Ordering::Relaxed) {
            if self.camera.lock().is_none() && !self.connect() {
                self.wait(self.sample_cycle);
                continue;
            }
            if self.shared.state() == PipelineState::Error {
                log::error!("camera pipeline in error state, reconnecting");
                if let Some(mut cam) = self.camera.lock().take() {
                    cam.disconnect();
                }
                self.shared.healthy.store(false, Ordering::Relaxed);
                self.shared.set_state(PipelineState::Idle);
                continue;
            }

            match self.one_frame() {
                Ok(()) => {}
                Err(e) => {
                    log::error!("frame failed: {}", e);
                    self.shared.set_state(PipelineState::Error);
                    continue;
                }
            }

            // focus frames recycle at the exposure time itself
            let pause = if self.shared.focus_mode() == FocusMode::Off {
                self.sample_cycle
            } else {
                Duration::from_secs(self.expdur.max(1) as u64)
            };
            self.wait(pause);
        }

        if let Some(mut cam) = self.camera.lock().take() {
            cam.disconnect();
        }
        self.shared.healthy.store(false, Ordering::Relaxed);
    }

    fn connect(&mut self) -> bool {
        match driver::create_driver(&self.config.driver).and_then(|mut cam| {
            cam.connect()?;
            // full-frame unbinned readout with the slow, low-noise chain
            let geometry = cam.geometry();
            cam.set_roi(driver::Roi {
                x0: 0,
                y0: 0,
                width: geometry.width,
                height: geometry.height,
                xbin: 1,
                ybin: 1,
            })?;
            cam.set_adc_channel(0)?;
            cam.set_read_port(0)?;
            cam.set_read_rate(1)?;
            cam.set_preamp_gain(0)?;
            cam.set_vshift_rate(1)?;
            cam.set_em_gain(0)?;
            cam.set_cooler(true, self.config.cooler_set)?;
            cam.set_shutter(ShutterMode::Auto)?;
            Ok(cam)
        }) {
            Ok(cam) => {
                *self.camera.lock() = Some(cam);
                self.expdur = self.config.expdur_min;
                self.programmed_expdur = f64::NAN;
                self.frame_no = 1;
                self.shared.set_state(PipelineState::Idle);
                self.shared.healthy.store(true, Ordering::Relaxed);
                log::info!("cloud camera connected");
                true
            }
            Err(e) => {
                self.shared.healthy.store(false, Ordering::Relaxed);
                log::error!("failed to connect camera: {}", e);
                false
            }
        }
    }

    fn one_frame(&mut self) -> Result<()> {
        let camera = Arc::clone(&self.camera);
        let mut guard = camera.lock();
        let cam = guard.as_mut().expect("camera present");
        let geometry = cam.geometry();

        // program the exposure only when it moved by more than a millisecond
        let expdur_s = self.expdur as f64;
        if (expdur_s - self.programmed_expdur).abs() > 0.001 {
            cam.set_exposure(expdur_s)?;
            self.programmed_expdur = expdur_s;
        }

        self.shared.set_state(PipelineState::Exposing);
        let date_obs = Utc::now().naive_utc();
        cam.start_exposure()?;

        // wait for end of exposure; two full cycles of slack before the
        // readout watchdog trips
        let watchdog = Duration::from_secs_f64(expdur_s) + 2 * self.sample_cycle;
        let started = Instant::now();
        loop {
            if self.shared.shutdown.load(Ordering::Relaxed) {
                let _ = cam.abort_exposure();
                return Ok(());
            }
            if cam.image_ready()? {
                break;
            }
            if started.elapsed() > watchdog {
                log::warn!("long time no readout");
                let _ = cam.abort_exposure();
                return Err(Error::Camera("readout timeout".to_string()));
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        self.shared.set_state(PipelineState::Reading);
        let data = cam.read_image()?;
        let date_end = Utc::now().naive_utc();

        let file_name = format!("C{}.fit", date_obs.format("%Y%m%dT%H%M%S"));
        let path = self.raw_dir.join(&file_name);
        let cooler_actual = cam.sensor_temperature().unwrap_or(f64::NAN);
        fits::write_frame(
            &path,
            &data,
            geometry.width,
            geometry.height,
            &fits::FitsHeader {
                date_obs,
                date_end,
                expdur_s,
                gain: cam.preamp_gain(),
                cooler_set: self.config.cooler_set,
                cooler_actual: cooler_actual as i32,
                frame_no: self.frame_no,
                site: &self.site,
            },
        )?;
        self.shared.set_state(PipelineState::Written);
        *self.shared.last_obs.lock() = date_obs.format("%Y-%m-%dT%H:%M:%S").to_string();

        let mean = central_mean(&data, geometry.width, geometry.height);
        self.expdur = adapt_exposure(
            self.expdur,
            mean,
            self.config.expdur_min,
            self.config.expdur_max,
        );
        log::debug!(
            "frame {}: center mean {:.0} ADU, next exposure {} s",
            self.frame_no,
            mean,
            self.expdur
        );

        let mut frame = Frame::new(
            path,
            geometry.width,
            geometry.height,
            date_obs,
            expdur_s,
            mean,
        );
        frame.file_name = file_name.clone();

        let feed = {
            let session = self.shared.focus.lock();
            if session.mode == FocusMode::Off {
                None
            } else {
                session.feed.clone()
            }
        };
        match feed {
            Some(tx) => {
                if tx.try_send(frame).is_err() {
                    log::warn!("reduce queue full, focus frame dropped");
                }
            }
            None => self.announce_frame(&file_name)?,
        }

        self.frame_no += 1;
        self.shared.set_state(PipelineState::Idle);
        Ok(())
    }

    /// Hand a written frame to the external reducer and the daily log.
    fn announce_frame(&mut self, file_name: &str) -> Result<()> {
        let line = format!("{}\t{}", self.raw_dir.display(), file_name);
        let mut list = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.observed_list)?;
        writeln!(list, "{}", line)?;
        self.day_log.append(Utc::now().date_naive(), &line)?;
        Ok(())
    }

    fn wait(&self, period: Duration) {
        let deadline = Instant::now() + period;
        while Instant::now() < deadline {
            if self.shared.shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_millis(50).min(deadline - Instant::now()));
        }
    }
}

/// Temperature watch: 1 Hz sampling while the pipeline idles. Three straight
/// read failures flip the pipeline to `Error` with the `get_temp` code; the
/// first successful read clears it.
fn cooling_watch(shared: Arc<CamShared>, camera: SharedDriver) {
    let mut failures = 0u32;
    while !shared.shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));
        if shared.state() != PipelineState::Idle {
            continue;
        }
        let reading = {
            let mut guard = camera.lock();
            match guard.as_mut() {
                Some(cam) => Some(cam.sensor_temperature()),
                None => None,
            }
        };
        match reading {
            None => {} // not connected yet
            Some(Ok(temp)) => {
                if failures >= TEMP_FAIL_MAX {
                    log::info!("get_temp recovered ({:.1} C)", temp);
                }
                failures = 0;
                log::trace!("sensor temperature {:.1} C", temp);
            }
            Some(Err(e)) => {
                failures += 1;
                log::warn!("get_temp failed ({}): {}", failures, e);
                if failures >= TEMP_FAIL_MAX {
                    log::error!("camera fault: get_temp");
                    shared.set_state(PipelineState::Error);
                }
            }
        }
    }
}

/// Mean ADU of the fixed central patch (up to 512 x 512 about the centre).
pub fn central_mean(data: &[u16], width: u32, height: u32) -> f64 {
    let half = CENTER_HALF.min(width / 2).min(height / 2);
    if half == 0 || data.is_empty() {
        return 0.0;
    }
    let (x0, y0) = (width / 2, height / 2);
    let mut sum = 0.0f64;
    for y in (y0 - half)..(y0 + half) {
        let row = (y * width) as usize;
        for x in (x0 - half)..(x0 + half) {
            sum += data[row + x as usize] as f64;
        }
    }
    sum / ((2 * half) as f64 * (2 * half) as f64)
}

/// Single-step exposure servo toward the central-count target.
pub fn adapt_exposure(expdur: u32, mean_center: f64, min: u32, max: u32) -> u32 {
    if !mean_center.is_finite() || mean_center <= 0.0 {
        return max;
    }
    let next = (expdur as f64 * CENTER_TARGET / mean_center).round();
    if next <= min as f64 {
        min
    } else if next >= max as f64 {
        max
    } else {
        next as u32
    }
}

/// Focus reduce loop: extract stars from each queued frame, advance the
/// three-frame FWHM window, and drive the focuser until convergence.
fn reduce_loop(rx: Receiver<Frame>, shared: Arc<CamShared>, expected: f64, sigma_max: f64) {
    let extractor = match StarExtractor::prepare() {
        Ok(e) => e,
        Err(e) => {
            log::error!("focus reduce unavailable: {}", e);
            return;
        }
    };
    let mut window: VecDeque<f64> = VecDeque::new();
    let mut algo = FocusAlgo::new(expected, FWHM_EXPECT_ERROR);

    while let Ok(mut frame) = rx.recv() {
        if shared.focus_mode() == FocusMode::Off {
            break;
        }
        let age = Utc::now().naive_utc() - frame.date_obs;
        if age > chrono::Duration::seconds(FRAME_MAX_AGE_SECS) {
            log::warn!("[{}] was too old, reducer might be blocked", frame.file_name);
            continue;
        }
        if let Err(e) = extractor.measure(&mut frame) {
            log::warn!("{}", e);
            continue;
        }

        if frame.fwhm <= 1.0 {
            // a bad frame invalidates the oldest window entry
            window.pop_front();
            continue;
        }
        window.push_back(frame.fwhm);
        if window.len() < FOCUS_WINDOW {
            continue;
        }
        while window.len() > FOCUS_WINDOW {
            window.pop_front();
        }

        let mean = window.iter().sum::<f64>() / FOCUS_WINDOW as f64;
        let var = window
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / (FOCUS_WINDOW - 1) as f64;
        let sigma = if var > 0.0 { var.sqrt() } else { 0.0 };
        log::info!(
            "{} : FWHM = {:.1}, sigma = {:.2}",
            if sigma <= sigma_max { "--->>> GOOD <<<---" } else { "!!! BAD !!!" },
            mean,
            sigma
        );

        if sigma > sigma_max || (mean - expected) <= FWHM_EXPECT_ERROR {
            continue;
        }
        let (mode, reply) = {
            let session = shared.focus.lock();
            (session.mode, session.reply.clone())
        };
        if mode != FocusMode::Auto {
            continue;
        }
        let Some(endpoint) = reply else { continue };

        match algo.push(mean) {
            FocusStep::Move(step) => {
                let msg = FocusMessage::Move { step };
                if let Err(e) = endpoint.reply(&msg.encode()) {
                    log::warn!("focus move send failed: {}", e);
                } else {
                    log::info!("AutoFocus[Move]: {}", step);
                }
            }
            FocusStep::Converged => {
                let msg = FocusMessage::End {
                    success: true,
                    fwhm_centi: (mean * 100.0).round() as u16,
                };
                if let Err(e) = endpoint.reply(&msg.encode()) {
                    log::warn!("focus end send failed: {}", e);
                }
                log::info!("AutoFocus stopped, the last FWHM is {:4.1}", mean);
                shared.focus.lock().mode = FocusMode::Off;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposure_servo_tracks_the_target() {
        // central mean at half the target doubles the exposure
        assert_eq!(adapt_exposure(10, 20_000.0, 1, 60), 20);
        // at the target it holds
        assert_eq!(adapt_exposure(10, 40_000.0, 1, 60), 10);
        // saturated sky shortens hard, clamped to the floor
        assert_eq!(adapt_exposure(10, 4_000_000.0, 2, 60), 2);
        // starved sky clamps to the ceiling
        assert_eq!(adapt_exposure(10, 100.0, 1, 60), 60);
        // degenerate means park at the ceiling
        assert_eq!(adapt_exposure(10, 0.0, 1, 60), 60);
        assert_eq!(adapt_exposure(10, f64::NAN, 1, 60), 60);
    }

    #[test]
    fn exposure_servo_output_always_within_bounds() {
        for mean in [1.0, 100.0, 8000.0, 40_000.0, 65_535.0, 1e9] {
            let next = adapt_exposure(30, mean, 5, 40);
            assert!((5..=40).contains(&next), "mean {} -> {}", mean, next);
        }
    }

    #[test]
    fn central_mean_ignores_the_frame_edges() {
        let (w, h) = (1024u32, 1024u32);
        let mut data = vec![100u16; (w * h) as usize];
        // bright centre patch, dark border
        for y in 0..h {
            for x in 0..w {
                let central = (x as i32 - 512).abs() < 256 && (y as i32 - 512).abs() < 256;
                if central {
                    data[(y * w + x) as usize] = 40_000;
                }
            }
        }
        let mean = central_mean(&data, w, h);
        assert!((mean - 40_000.0).abs() < 200.0, "mean = {}", mean);
    }

    #[test]
    fn central_mean_handles_small_sensors() {
        let data = vec![500u16; 64 * 64];
        assert!((central_mean(&data, 64, 64) - 500.0).abs() < 1e-9);
        assert_eq!(central_mean(&[], 0, 0), 0.0);
    }

    #[test]
    fn pipeline_writes_frames_and_announces_them() {
        let sample_dir = tempfile::tempdir().unwrap();
        let raw_dir = tempfile::tempdir().unwrap();
        let config = CameraConfig {
            driver: "sim".to_string(),
            raw_image_dir: raw_dir.path().to_string_lossy().into_owned(),
            prefix: "WMC".to_string(),
            cloudage_file: "cloudage.txt".to_string(),
            sun_alt_max: -10.0,
            expdur_min: 1,
            expdur_max: 30,
            saturation: 50_000,
            cooler_set: -20,
            fwhm_target: 3.0,
            focus_sigma: 0.1,
            cloud_stale_secs: 300,
            min_disk_free_gb: 0,
        };
        let site = Arc::new(Site {
            name: "T".to_string(),
            device_id: "D".to_string(),
            longitude: 0.0,
            latitude: 0.0,
            altitude: 0.0,
            timezone: 0,
        });

        let mut cam =
            CloudCamera::start(config, site, sample_dir.path().to_path_buf(), 1).unwrap();

        // let the supervisor produce at least one frame (sim exposures
        // complete within 50 ms, cadence is 1 s)
        std::thread::sleep(Duration::from_millis(1800));
        assert!(cam.is_healthy());
        cam.stop();

        let observed = fs::read_to_string(sample_dir.path().join("observed.list")).unwrap();
        assert!(!observed.is_empty(), "observed.list is empty");
        let first = observed.lines().next().unwrap();
        let (dir, name) = first.split_once('\t').unwrap();
        assert!(name.starts_with('C') && name.ends_with(".fit"));
        let fits_path = PathBuf::from(dir).join(name);
        assert!(fits_path.exists(), "missing {}", fits_path.display());
        assert_eq!(fs::metadata(&fits_path).unwrap().len() % 2880, 0);
        assert!(!cam.last_observation().is_empty());
    }
}
