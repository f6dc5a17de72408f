//! Fused-telemetry publisher.
//!
//! On a fixed cadence (never faster than once per ten seconds) the publisher
//! snapshots every channel, composes one [`TelemetryFrame`] and emits its
//! shards fire-and-forget to the configured peer. The frame always goes out
//! on cadence: dead channels ride along as state bytes plus sentinel values
//! so consumers can distinguish "no data" from "zero".

use super::wire::{self, TelemetryFrame};
use super::wea_json;
use crate::config::PdxpConfig;
use crate::error::Result;
use crate::transport::UdpLink;
use crate::types::{ChannelState, CloudMap, SkySample, WeatherSample, WIRE_STATE_OFFLINE};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Floor on the publish period, seconds.
const MIN_CADENCE_SECS: u64 = 10;

/// One coherent view across every channel, taken at composition time.
/// `None` components are not running at all (wire state OFFLINE).
pub struct TelemetrySnapshot {
    pub weather: Option<WeatherSample>,
    pub sqm: Option<SkySample>,
    /// The SQM's TCP session is currently open
    pub sqm_connected: bool,
    pub cloud: Option<Arc<CloudMap>>,
    /// The camera pipeline reports a working state; a failed camera poisons
    /// the cloud channel because the reducer has nothing to process
    pub camera_healthy: bool,
}

pub type SnapshotFn = Box<dyn Fn() -> TelemetrySnapshot + Send>;

/// Compose the wire frame from one snapshot.
pub fn compose_frame(snap: &TelemetrySnapshot, sid: u32, timezone_hours: i32) -> TelemetryFrame {
    let (date, time) = wire::now_local(timezone_hours);
    let mut frame = TelemetryFrame::sentinel(sid, date, time);

    match snap.weather.as_ref() {
        None => frame.wea_state = WIRE_STATE_OFFLINE,
        Some(wea) => {
            frame.wea_state = wea.state.wire_code();
            if wea.state == ChannelState::Ok {
                if let Some((d, t)) = wire::utc_str_to_local(&wea.utc, timezone_hours) {
                    frame.wea_date = d;
                    frame.wea_time = t;
                }
                frame.temp = (wea.temperature * 10.0).round() as i16;
                frame.humidity = (wea.humidity * 10.0).round() as u16;
                frame.airpres = (wea.pressure * 10.0).round() as u16;
                frame.windspd = (wea.wind_speed * 10.0).round() as u16;
                frame.winddir = wea.wind_dir * 10;
                frame.rainfall = wea.rain;
            }
        }
    }

    match snap.sqm.as_ref() {
        None => frame.sqm_state = WIRE_STATE_OFFLINE,
        Some(sky) => {
            frame.sqm_state = if !snap.sqm_connected {
                ChannelState::NotConnected.wire_code()
            } else {
                sky.state.wire_code()
            };
            if frame.sqm_state == 0 {
                if let Some((d, t)) = wire::utc_str_to_local(&sky.utc, timezone_hours) {
                    frame.sqm_date = d;
                    frame.sqm_time = t;
                }
                frame.sqm_bkmag = (sky.mpsas * 100.0).round() as i16;
            }
        }
    }

    match snap.cloud.as_ref() {
        None => frame.cloud_state = WIRE_STATE_OFFLINE,
        Some(map) => {
            frame.cloud_state = if !snap.camera_healthy {
                1 // the producing device is down
            } else {
                match map.state {
                    ChannelState::Ok => 0,
                    ChannelState::NotConnected | ChannelState::NoData => 1,
                    ChannelState::Stale => 2,
                }
            };
            if frame.cloud_state == 0 {
                if let Some((d, t)) = wire::utc_str_to_local(&map.utc, timezone_hours) {
                    frame.cloud_date = d;
                    frame.cloud_time = t;
                }
                frame.cloud_percent = map.cover_per_mille();
                frame.azi_step = (map.az_step * 10.0).round() as u32;
                frame.alt_step = (map.el_step * 10.0).round() as u32;
                frame.zones = map
                    .zones
                    .iter()
                    .map(|z| {
                        (
                            (z.azimuth * 10.0).round() as i32,
                            (z.elevation * 10.0).round() as i32,
                            z.level,
                        )
                    })
                    .collect();
            }
        }
    }

    frame
}

pub struct TelemetryPublisher {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryPublisher {
    pub fn spawn(
        config: PdxpConfig,
        timezone_hours: i32,
        sample_dir: PathBuf,
        device_id: String,
        cycle_secs: u64,
        snapshot: SnapshotFn,
    ) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let peer: SocketAddr = (config.host.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| crate::error::Error::Config(format!("pdxp peer: {}", e)))?
            .next()
            .ok_or_else(|| {
                crate::error::Error::Config(format!("pdxp peer {} did not resolve", config.host))
            })?;
        let link = UdpLink::open(0)?;

        let handle = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("pdxp".to_string())
                .spawn(move || {
                    run(
                        link, peer, config, timezone_hours, sample_dir, device_id, cycle_secs,
                        snapshot, shutdown,
                    )
                })
                .map_err(|e| crate::error::Error::Other(format!("spawn pdxp: {}", e)))?
        };

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        log::info!("Telemetry publisher: stopped");
    }
}

impl Drop for TelemetryPublisher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    link: UdpLink,
    peer: SocketAddr,
    config: PdxpConfig,
    timezone_hours: i32,
    sample_dir: PathBuf,
    device_id: String,
    cycle_secs: u64,
    snapshot: SnapshotFn,
    shutdown: Arc<AtomicBool>,
) {
    let cadence = Duration::from_secs(cycle_secs.max(MIN_CADENCE_SECS));
    let mut pno: u32 = 0;
    let mut deadline = Instant::now() + cadence;
    log::info!("Telemetry publisher: {} every {:?}", peer, cadence);

    while !shutdown.load(Ordering::Relaxed) {
        // interruptible wait to the absolute deadline
        while Instant::now() < deadline {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            std::thread::sleep(Duration::from_millis(100).min(deadline - Instant::now()));
        }
        deadline += cadence;
        if Instant::now() - deadline > cadence {
            deadline = Instant::now() + cadence;
        }

        let snap = snapshot();
        let frame = compose_frame(&snap, config.source_id, timezone_hours);
        for packet in frame.encode_packets(&mut pno) {
            if let Err(e) = link.send_to(&packet, peer) {
                log::warn!("pdxp send failed: {}", e);
            }
        }
        log::debug!(
            "pdxp frame sent: wea={} sqm={} cloud={} zones={}",
            frame.wea_state,
            frame.sqm_state,
            frame.cloud_state,
            frame.zones.len()
        );

        if config.wea_json {
            if let Some(map) = snap.cloud.as_ref() {
                if let Err(e) = wea_json::save_wea(
                    &sample_dir,
                    &device_id,
                    snap.weather.as_ref(),
                    snap.sqm.as_ref(),
                    map,
                ) {
                    log::warn!("wea json: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CloudZone;

    fn ok_weather() -> WeatherSample {
        let mut wea = WeatherSample::offline();
        wea.state = ChannelState::Ok;
        wea.utc = "2026-08-02T14:30:00".to_string();
        wea.temperature = -5.5;
        wea.humidity = 42.0;
        wea.pressure = 554.5;
        wea.wind_speed = 3.2;
        wea.wind_dir = 270;
        wea.rain = 1;
        wea
    }

    fn ok_cloud() -> Arc<CloudMap> {
        let mut map = CloudMap::empty();
        map.state = ChannelState::Ok;
        map.utc = "2026-08-02T14:29:00".to_string();
        map.az_step = 30.0;
        map.el_step = 20.0;
        for i in 0..10 {
            map.zones.push(CloudZone {
                azimuth: i as f64 * 30.0,
                elevation: 60.0,
                level: if i < 4 { 9 } else { 0 },
            });
        }
        Arc::new(map)
    }

    #[test]
    fn all_channels_offline_yields_sentinels() {
        let snap = TelemetrySnapshot {
            weather: None,
            sqm: None,
            sqm_connected: false,
            cloud: None,
            camera_healthy: false,
        };
        let frame = compose_frame(&snap, 7, 8);
        assert_eq!(frame.wea_state, WIRE_STATE_OFFLINE);
        assert_eq!(frame.sqm_state, WIRE_STATE_OFFLINE);
        assert_eq!(frame.cloud_state, WIRE_STATE_OFFLINE);
        assert_eq!(frame.temp, i16::MAX);
        assert_eq!(frame.cloud_percent, u16::MAX);
        assert!(frame.zones.is_empty());
    }

    #[test]
    fn healthy_channels_carry_scaled_values() {
        let mut sky = SkySample::offline();
        sky.state = ChannelState::Ok;
        sky.utc = "2026-08-02T14:30:10".to_string();
        sky.mpsas = 21.37;

        let snap = TelemetrySnapshot {
            weather: Some(ok_weather()),
            sqm: Some(sky),
            sqm_connected: true,
            cloud: Some(ok_cloud()),
            camera_healthy: true,
        };
        let frame = compose_frame(&snap, 7, 8);
        assert_eq!(frame.wea_state, 0);
        assert_eq!(frame.temp, -55);
        assert_eq!(frame.humidity, 420);
        assert_eq!(frame.airpres, 5545);
        assert_eq!(frame.windspd, 32);
        assert_eq!(frame.winddir, 2700);
        assert_eq!(frame.rainfall, 1);
        assert_eq!(frame.sqm_state, 0);
        assert_eq!(frame.sqm_bkmag, 2137);
        assert_eq!(frame.cloud_state, 0);
        assert_eq!(frame.cloud_percent, 400); // 4 of 10 zones at level >= 7
        assert_eq!(frame.azi_step, 300);
        assert_eq!(frame.zones.len(), 10);
        assert_eq!(frame.zones[1], (300, 600, 9));
    }

    #[test]
    fn disconnected_sqm_overrides_sample_state() {
        let mut sky = SkySample::offline();
        sky.state = ChannelState::Ok;
        let snap = TelemetrySnapshot {
            weather: None,
            sqm: Some(sky),
            sqm_connected: false,
            cloud: None,
            camera_healthy: false,
        };
        let frame = compose_frame(&snap, 7, 0);
        assert_eq!(frame.sqm_state, 1);
        assert_eq!(frame.sqm_bkmag, i16::MAX);
    }

    #[test]
    fn sick_camera_poisons_the_cloud_channel() {
        let snap = TelemetrySnapshot {
            weather: None,
            sqm: None,
            sqm_connected: false,
            cloud: Some(ok_cloud()),
            camera_healthy: false,
        };
        let frame = compose_frame(&snap, 7, 0);
        assert_eq!(frame.cloud_state, 1);
        assert_eq!(frame.cloud_percent, u16::MAX);
        assert!(frame.zones.is_empty());
    }

    #[test]
    fn stale_map_reads_no_data_on_the_wire() {
        let mut map = (*ok_cloud()).clone();
        map.state = ChannelState::Stale;
        let snap = TelemetrySnapshot {
            weather: None,
            sqm: None,
            sqm_connected: false,
            cloud: Some(Arc::new(map)),
            camera_healthy: true,
        };
        let frame = compose_frame(&snap, 7, 0);
        assert_eq!(frame.cloud_state, 2);
    }
}
