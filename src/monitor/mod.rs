//! Environment monitor: the nightly schedule, the lifecycle of the
//! night-only sensors, disk housekeeping and the command ingress endpoint.
//!
//! The twilight supervisor computes the day's solar crossings, keeps the
//! [`ObservationPhase`] current, and owns starting the cloud camera and the
//! SQM at dusk and tearing them down at dawn. The always-on components
//! (weather station, cloud-map reader, telemetry publisher) live for the
//! whole daemon.

pub mod diskfree;
pub mod sun;

use crate::config::Config;
use crate::devices::{CloudCamera, CloudageReader, SqmPoller, WeatherStation};
use crate::error::{Error, Result};
use crate::streaming::publisher::{TelemetryPublisher, TelemetrySnapshot};
use crate::streaming::FocusMessage;
use crate::transport::UdpLink;
use crate::types::{ObservationPhase, Site};
use chrono::{Duration as ChronoDuration, Timelike, Utc};
use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

/// Night-only components and the current phase, shared between the twilight
/// supervisor, the command endpoint and the telemetry snapshot.
struct NightShared {
    camera: Mutex<Option<CloudCamera>>,
    sqm: Mutex<Option<SqmPoller>>,
    phase: Mutex<ObservationPhase>,
}

pub struct EnvMonitor {
    night: Arc<NightShared>,
    weather: Option<WeatherStation>,
    cloudage: Option<CloudageReader>,
    publisher: Option<TelemetryPublisher>,
    command: Option<Arc<UdpLink>>,
    twilight: Option<JoinHandle<()>>,
    housekeeper: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl EnvMonitor {
    /// Bring up the always-on components and the schedule threads.
    /// Directory-creation failures here are fatal-startup errors.
    pub fn start(config: Config) -> Result<Self> {
        let sample_dir = PathBuf::from(&config.sampling.sample_dir);
        fs::create_dir_all(&sample_dir)
            .map_err(|e| Error::Config(format!("sample_dir {}: {}", sample_dir.display(), e)))?;
        fs::create_dir_all(&config.camera.raw_image_dir).map_err(|e| {
            Error::Config(format!("raw_image_dir {}: {}", config.camera.raw_image_dir, e))
        })?;

        let site = Arc::new(config.site.clone());
        let shutdown = Arc::new(AtomicBool::new(false));
        let night = Arc::new(NightShared {
            camera: Mutex::new(None),
            sqm: Mutex::new(None),
            phase: Mutex::new(ObservationPhase::Day),
        });

        let weather = WeatherStation::spawn(
            config.weather.clone(),
            &sample_dir,
            config.sampling.cycle_secs,
        );
        let cloudage = CloudageReader::spawn(
            &sample_dir,
            &config.camera.cloudage_file,
            config.camera.cloud_stale_secs,
        );

        let command = Self::open_command_endpoint(&config, &night)?;

        let publisher = if config.pdxp.enable {
            let wea_sample = weather.sample_handle();
            let cloud = cloudage.snapshot();
            let night_snap = Arc::clone(&night);
            let snapshot = Box::new(move || TelemetrySnapshot {
                weather: Some(wea_sample.lock().clone()),
                sqm: night_snap.sqm.lock().as_ref().map(|s| s.sample()),
                sqm_connected: night_snap
                    .sqm
                    .lock()
                    .as_ref()
                    .map(|s| s.is_connected())
                    .unwrap_or(false),
                cloud: Some(Arc::clone(&cloud.read())),
                camera_healthy: night_snap
                    .camera
                    .lock()
                    .as_ref()
                    .map(|c| c.is_healthy())
                    .unwrap_or(true),
            });
            Some(TelemetryPublisher::spawn(
                config.pdxp.clone(),
                site.timezone,
                sample_dir.clone(),
                site.device_id.clone(),
                config.sampling.cycle_secs,
                snapshot,
            )?)
        } else {
            None
        };

        let twilight = {
            let config = config.clone();
            let site = Arc::clone(&site);
            let night = Arc::clone(&night);
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("twilight".to_string())
                .spawn(move || twilight_loop(config, site, night, shutdown))
                .map_err(|e| Error::Other(format!("spawn twilight: {}", e)))?
        };

        let housekeeper = if config.camera.min_disk_free_gb > 0 {
            let raw_root = PathBuf::from(&config.camera.raw_image_dir);
            let prefix = config.camera.prefix.clone();
            let floor = config.camera.min_disk_free_gb;
            let tz = site.timezone;
            let shutdown = Arc::clone(&shutdown);
            Some(
                std::thread::Builder::new()
                    .name("diskfree".to_string())
                    .spawn(move || housekeeper_loop(raw_root, prefix, floor, tz, shutdown))
                    .map_err(|e| Error::Other(format!("spawn diskfree: {}", e)))?,
            )
        } else {
            None
        };

        Ok(Self {
            night,
            weather: Some(weather),
            cloudage: Some(cloudage),
            publisher,
            command,
            twilight: Some(twilight),
            housekeeper,
            shutdown,
        })
    }

    fn open_command_endpoint(
        config: &Config,
        night: &Arc<NightShared>,
    ) -> Result<Option<Arc<UdpLink>>> {
        let link = match UdpLink::open(config.network.command_port) {
            Ok(l) => Arc::new(l),
            Err(e) => {
                log::warn!(
                    "failed to create UDP server on [{}] for command: {}",
                    config.network.command_port,
                    e
                );
                return Ok(None);
            }
        };

        let night = Arc::clone(night);
        let weak: Weak<UdpLink> = Arc::downgrade(&link);
        link.on_receive(Box::new(move |bytes, peer| {
            let Some(msg) = FocusMessage::decode(bytes) else {
                return; // protocol hardening: drop silently
            };
            log::debug!("focus command {:?} from {}", msg, peer);
            let camera = night.camera.lock();
            let Some(cam) = camera.as_ref() else {
                log::warn!("cloud camera is not working, rejected focus command");
                return;
            };
            match msg {
                FocusMessage::Begin { manual } => {
                    if let Some(endpoint) = weak.upgrade() {
                        cam.begin_focus(manual, endpoint);
                    }
                }
                FocusMessage::End { .. } => cam.end_focus(),
                FocusMessage::Move { step } => {
                    // motion is executed by the focuser host; record only
                    log::info!("Focus[Move]: {}", step);
                }
                FocusMessage::Limit => cam.focus_limit(),
            }
        }));
        log::info!("command endpoint on UDP {}", config.network.command_port);
        Ok(Some(link))
    }

    pub fn phase(&self) -> ObservationPhase {
        *self.night.phase.lock()
    }

    /// Orderly shutdown: command ingress first, then the schedulers, then
    /// the night components, then the always-on pollers.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);

        if let Some(link) = self.command.take() {
            drop(link);
        }
        if let Some(mut publisher) = self.publisher.take() {
            publisher.stop();
        }
        if let Some(h) = self.housekeeper.take() {
            let _ = h.join();
        }
        if let Some(h) = self.twilight.take() {
            let _ = h.join();
        }

        if let Some(mut cam) = self.night.camera.lock().take() {
            cam.stop();
        }
        if let Some(mut sqm) = self.night.sqm.lock().take() {
            sqm.stop();
        }

        if let Some(mut weather) = self.weather.take() {
            weather.stop();
        }
        if let Some(mut cloudage) = self.cloudage.take() {
            cloudage.stop();
        }
        log::info!("environment monitor stopped");
    }
}

impl Drop for EnvMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fractional local clock hours at the site.
fn local_hours(timezone_hours: i32) -> f64 {
    let local = Utc::now().naive_utc() + ChronoDuration::hours(timezone_hours as i64);
    local.num_seconds_from_midnight() as f64 / 3600.0
}

/// Phase from the two daily crossings: above the horizon is day, between
/// horizon and threshold is twilight, below the threshold is night.
fn phase_of(hours: f64, horizon: &sun::SunCrossing, threshold: &sun::SunCrossing) -> ObservationPhase {
    let within = |crossing: &sun::SunCrossing| match *crossing {
        sun::SunCrossing::Normal { rise, set } => hours > rise && hours < set,
        sun::SunCrossing::PolarDay => true,
        sun::SunCrossing::PolarNight => false,
    };
    if within(horizon) {
        ObservationPhase::Day
    } else if within(threshold) {
        ObservationPhase::Twilight
    } else {
        ObservationPhase::Night
    }
}

fn twilight_loop(
    config: Config,
    site: Arc<Site>,
    night: Arc<NightShared>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        let today = (Utc::now().naive_utc() + ChronoDuration::hours(site.timezone as i64)).date();
        let threshold = sun::sun_crossing(
            today,
            site.latitude,
            site.longitude,
            site.timezone,
            config.camera.sun_alt_max,
        );
        let horizon =
            sun::sun_crossing(today, site.latitude, site.longitude, site.timezone, 0.0);

        // polar conditions degenerate to an all-night schedule
        let (rise, set) = match threshold {
            sun::SunCrossing::Normal { rise, set } => (rise, set),
            sun::SunCrossing::PolarDay | sun::SunCrossing::PolarNight => (24.0, 0.0),
        };
        log::info!(
            "Observation Duration: From = {}, To = {}",
            sun::hours_to_hms(set),
            sun::hours_to_hms(rise)
        );

        // daytime: wait for dusk
        let hours = local_hours(site.timezone);
        *night.phase.lock() = phase_of(hours, &horizon, &threshold);
        if hours > rise && hours < set {
            let to_dusk = (set - hours) * 3600.0 + 1.5;
            if !sleep_interruptible(Duration::from_secs_f64(to_dusk), &shutdown) {
                return;
            }
        }
        *night.phase.lock() = ObservationPhase::Night;

        // dusk: bring up the night-only services
        match CloudCamera::start(
            config.camera.clone(),
            Arc::clone(&site),
            PathBuf::from(&config.sampling.sample_dir),
            config.sampling.cycle_secs,
        ) {
            Ok(cam) => *night.camera.lock() = Some(cam),
            Err(e) => log::error!("cloud camera start failed: {}", e),
        }
        if config.sqm.enable {
            *night.sqm.lock() = Some(SqmPoller::spawn(
                config.sqm.address.clone(),
                &config.sampling.sample_dir,
                config.sampling.cycle_secs,
            ));
        }

        // observe until dawn
        let hours = local_hours(site.timezone);
        let mut to_dawn = rise - hours;
        if to_dawn < 0.0 {
            to_dawn += 24.0;
        }
        let keep_going =
            sleep_interruptible(Duration::from_secs_f64(to_dawn * 3600.0 + 1.5), &shutdown);

        // dawn (or shutdown): tear the night services down
        if let Some(mut cam) = night.camera.lock().take() {
            cam.stop();
            log::info!("Cloud Camera stopped for entering into day time");
        }
        if let Some(mut sqm) = night.sqm.lock().take() {
            sqm.stop();
            log::info!("SQM stopped for entering into day time");
        }
        if !keep_going {
            return;
        }
    }
}

fn housekeeper_loop(
    raw_root: PathBuf,
    prefix: String,
    floor_gb: u64,
    timezone_hours: i32,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        // wake at the next local noon
        let hours = local_hours(timezone_hours);
        let mut to_noon = 12.0 - hours;
        if to_noon <= 0.0 {
            to_noon += 24.0;
        }
        if !sleep_interruptible(Duration::from_secs_f64(to_noon * 3600.0), &shutdown) {
            return;
        }
        diskfree::reclaim(&raw_root, &prefix, floor_gb);
    }
}

/// Sleep in slices, returning false when shutdown was requested.
fn sleep_interruptible(period: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = std::time::Instant::now() + period;
    while std::time::Instant::now() < deadline {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(500).min(deadline - std::time::Instant::now()));
    }
    !shutdown.load(Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sun::SunCrossing;

    #[test]
    fn phase_classification() {
        let horizon = SunCrossing::Normal {
            rise: 6.0,
            set: 18.0,
        };
        let threshold = SunCrossing::Normal {
            rise: 5.0,
            set: 19.0,
        };
        assert_eq!(phase_of(12.0, &horizon, &threshold), ObservationPhase::Day);
        assert_eq!(
            phase_of(18.5, &horizon, &threshold),
            ObservationPhase::Twilight
        );
        assert_eq!(
            phase_of(22.0, &horizon, &threshold),
            ObservationPhase::Night
        );
        assert_eq!(
            phase_of(4.0, &horizon, &threshold),
            ObservationPhase::Night
        );
    }

    #[test]
    fn interruptible_sleep_honours_shutdown() {
        let flag = AtomicBool::new(true);
        let start = std::time::Instant::now();
        assert!(!sleep_interruptible(Duration::from_secs(30), &flag));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
