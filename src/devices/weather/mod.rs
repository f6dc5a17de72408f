//! Weather-station poller.
//!
//! Drives two serial lines: the combined T/H/P + wind station at 9600 baud
//! and the independent rain detector at 4800 baud. Each cycle issues the
//! field-bus queries of [`protocol`], waits up to five seconds per reply on a
//! condition variable, and publishes one consolidated [`WeatherSample`].
//!
//! Liveness: a failed connect flips the channel to `NotConnected`; three
//! consecutive failed full cycles flip it to `NoData` and close the port so
//! the connect phase restarts on the next tick.

pub mod protocol;

use crate::config::WeatherConfig;
use crate::records::DailyRecord;
use crate::transport::SerialLink;
use crate::types::{ChannelState, WeatherSample};
use chrono::Utc;
use parking_lot::{Condvar, Mutex};
use protocol::Reading;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Per-query reply budget.
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);
/// The station needs recovery time between queries.
const INTER_QUERY_DELAY: Duration = Duration::from_secs(1);
/// Failed full cycles before the channel reads `NoData`.
const NO_DATA_CYCLES: u32 = 3;
/// Minimum buffered bytes before the read callback fires (shortest frame).
const MIN_FRAME: usize = 7;

/// Values collected by the read callbacks during one cycle.
#[derive(Default)]
struct CycleInbox {
    thp: Option<(f64, f64, f64)>,
    wind: Option<(f64, u16)>,
    rain: Option<bool>,
}

type Inbox = Arc<(Mutex<CycleInbox>, Condvar)>;

pub struct WeatherStation {
    sample: Arc<Mutex<WeatherSample>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WeatherStation {
    /// Spawn the polling thread.
    pub fn spawn<P: AsRef<Path>>(config: WeatherConfig, sample_root: P, cycle_secs: u64) -> Self {
        let sample = Arc::new(Mutex::new(WeatherSample::offline()));
        let running = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let sample = Arc::clone(&sample);
            let running = Arc::clone(&running);
            let shutdown = Arc::clone(&shutdown);
            let record = DailyRecord::new(sample_root, "Weather");
            std::thread::Builder::new()
                .name("weather".to_string())
                .spawn(move || {
                    let mut poller = Poller {
                        config,
                        cycle: Duration::from_secs(cycle_secs.max(1)),
                        sample,
                        running,
                        shutdown,
                        record,
                        wea: None,
                        rain: None,
                        inbox: Arc::new((Mutex::new(CycleInbox::default()), Condvar::new())),
                        wea_fails: 0,
                        rain_fails: 0,
                    };
                    poller.run();
                })
                .expect("spawn weather thread")
        };

        Self {
            sample,
            running,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Copy of the latest published sample.
    pub fn sample(&self) -> WeatherSample {
        self.sample.lock().clone()
    }

    /// Shared handle for the telemetry composer.
    pub fn sample_handle(&self) -> Arc<Mutex<WeatherSample>> {
        Arc::clone(&self.sample)
    }

    /// The station line is currently connected.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        log::info!("Weather Station: stopped");
    }
}

impl Drop for WeatherStation {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Poller {
    config: WeatherConfig,
    cycle: Duration,
    sample: Arc<Mutex<WeatherSample>>,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    record: DailyRecord,
    wea: Option<SerialLink>,
    rain: Option<SerialLink>,
    inbox: Inbox,
    wea_fails: u32,
    rain_fails: u32,
}

impl Poller {
    fn run(&mut self) {
        let mut deadline = Instant::now();
        while !self.shutdown.load(Ordering::Relaxed) {
            self.connect_station();
            if self.config.rain_enable {
                self.connect_rain();
            }

            self.poll_station();
            self.poll_rain();

            // absolute-deadline cadence with a one-period catch-up cap
            deadline += self.cycle;
            let now = Instant::now();
            if deadline > now {
                self.sleep_until(deadline);
            } else if now - deadline > self.cycle {
                deadline = now;
            }
        }
        self.wea = None;
        self.rain = None;
    }

    fn sleep_until(&self, deadline: Instant) {
        while Instant::now() < deadline && !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100).min(deadline - Instant::now()));
        }
    }

    fn connect_station(&mut self) {
        if self.wea.is_some() {
            return;
        }
        match SerialLink::open(&self.config.port, 9600) {
            Ok(link) => {
                link.set_min_read(MIN_FRAME);
                let inbox = Arc::clone(&self.inbox);
                link.on_read(Box::new(move |reader, ec, _buffered| {
                    if ec != 0 {
                        return;
                    }
                    while let Some(frame) = protocol::take_frame(reader) {
                        match protocol::parse_response(&frame) {
                            Ok(Reading::Thp {
                                temperature,
                                humidity,
                                pressure,
                            }) => {
                                inbox.0.lock().thp = Some((temperature, humidity, pressure));
                                inbox.1.notify_one();
                            }
                            Ok(Reading::Wind { speed, direction }) => {
                                inbox.0.lock().wind = Some((speed, direction));
                                inbox.1.notify_one();
                            }
                            Ok(Reading::Rain(_)) => {}
                            Err(e) => log::warn!("weather: discarded reply: {}", e),
                        }
                    }
                }));
                self.wea = Some(link);
                self.wea_fails = 0;
                self.running.store(true, Ordering::Relaxed);
                let mut sample = self.sample.lock();
                sample.state = ChannelState::Ok;
                sample.utc = iso_now();
                log::info!("Weather Station: connected");
            }
            Err(e) => {
                self.sample.lock().state = ChannelState::NotConnected;
                self.running.store(false, Ordering::Relaxed);
                log::error!(
                    "failed to connect Weather Station[{}]: {}",
                    self.config.port,
                    e
                );
            }
        }
    }

    fn connect_rain(&mut self) {
        if self.rain.is_some() {
            return;
        }
        match SerialLink::open(&self.config.rain_port, 4800) {
            Ok(link) => {
                link.set_min_read(MIN_FRAME);
                let inbox = Arc::clone(&self.inbox);
                link.on_read(Box::new(move |reader, ec, _buffered| {
                    if ec != 0 {
                        return;
                    }
                    while let Some(frame) = protocol::take_frame(reader) {
                        if let Ok(Reading::Rain(raining)) = protocol::parse_response(&frame) {
                            inbox.0.lock().rain = Some(raining);
                            inbox.1.notify_one();
                        }
                    }
                }));
                self.rain = Some(link);
                self.rain_fails = 0;
                {
                    let mut sample = self.sample.lock();
                    sample.rain = 0;
                    sample.rain_state = ChannelState::Ok;
                }
                log::info!("Rain Monitor: connected");
            }
            Err(e) => {
                self.sample.lock().rain_state = ChannelState::NotConnected;
                log::error!(
                    "failed to connect Rain Monitor[{}]: {}",
                    self.config.rain_port,
                    e
                );
            }
        }
    }

    /// Issue one query and wait for its reply slot to fill.
    fn exchange<F>(&self, link: &SerialLink, query: &[u8], arrived: F) -> bool
    where
        F: Fn(&CycleInbox) -> bool,
    {
        link.write(query);
        let deadline = Instant::now() + REPLY_TIMEOUT;
        let mut inbox = self.inbox.0.lock();
        while !arrived(&inbox) {
            let now = Instant::now();
            if now >= deadline
                || self
                    .inbox
                    .1
                    .wait_for(&mut inbox, deadline - now)
                    .timed_out()
            {
                break;
            }
        }
        let ok = arrived(&inbox);
        drop(inbox);
        if ok {
            std::thread::sleep(INTER_QUERY_DELAY);
        }
        ok
    }

    fn poll_station(&mut self) {
        let Some(link) = self.wea.as_ref() else {
            return;
        };
        let utc = Utc::now();

        {
            let mut inbox = self.inbox.0.lock();
            inbox.thp = None;
            inbox.wind = None;
        }
        let thp_ok = self.exchange(link, &protocol::query_thp(), |i| i.thp.is_some());
        let wind_ok = self.exchange(link, &protocol::query_wind(), |i| i.wind.is_some());

        if thp_ok && wind_ok {
            let (thp, wind) = {
                let inbox = self.inbox.0.lock();
                (inbox.thp.unwrap(), inbox.wind.unwrap())
            };
            self.wea_fails = 0;
            let line = {
                let mut sample = self.sample.lock();
                sample.state = ChannelState::Ok;
                sample.utc = utc.format("%Y-%m-%dT%H:%M:%S").to_string();
                sample.temperature = thp.0;
                sample.humidity = thp.1;
                sample.pressure = thp.2;
                sample.wind_speed = wind.0;
                sample.wind_dir = wind.1;
                format!(
                    "{} {:5.1} {:5.1} {:6.1} {:4.1} {:3} {:10}",
                    sample.utc,
                    sample.temperature,
                    sample.humidity,
                    sample.pressure,
                    sample.wind_speed,
                    sample.wind_dir,
                    sample.rain
                )
            };
            if let Err(e) = self.record.append(utc.date_naive(), &line) {
                log::error!("weather record: {}", e);
            }
        } else {
            self.wea_fails += 1;
            log::warn!(
                "weather: cycle without full reply ({} consecutive)",
                self.wea_fails
            );
            if self.wea_fails >= NO_DATA_CYCLES {
                self.sample.lock().state = ChannelState::NoData;
                self.running.store(false, Ordering::Relaxed);
                self.wea = None; // close; reconnect next tick
            }
        }
    }

    fn poll_rain(&mut self) {
        let Some(link) = self.rain.as_ref() else {
            return;
        };
        self.inbox.0.lock().rain = None;
        if self.exchange(link, &protocol::query_rain(), |i| i.rain.is_some()) {
            let raining = self.inbox.0.lock().rain.unwrap();
            self.rain_fails = 0;
            let mut sample = self.sample.lock();
            sample.rain = u16::from(raining);
            sample.rain_state = ChannelState::Ok;
        } else {
            self.rain_fails += 1;
            if self.rain_fails >= NO_DATA_CYCLES {
                self.sample.lock().rain_state = ChannelState::NoData;
                self.rain = None;
            }
        }
    }
}

fn iso_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_starts_offline() {
        // no serial hardware in the test environment: the poller must come
        // up reporting NotConnected and keep the process alive
        let dir = tempfile::tempdir().unwrap();
        let mut station = WeatherStation::spawn(
            WeatherConfig {
                port: "/nonexistent/tty".to_string(),
                rain_enable: false,
                rain_port: String::new(),
            },
            dir.path(),
            1,
        );
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(station.sample().state, ChannelState::NotConnected);
        assert!(!station.is_running());
        station.stop();
    }
}
