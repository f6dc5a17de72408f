//! Sky-quality-meter poller.
//!
//! Opens TCP to the meter on port 10001 and sends the `rx` reading request
//! every cycle. Replies are fixed-width 57-byte ASCII records; the signed
//! magnitude sits in bytes 2..8. When more than five requests go unanswered
//! the channel flips to `NoData` and the connection is rebuilt.

pub mod discovery;

use crate::records::DailyRecord;
use crate::transport::TcpLink;
use crate::types::{ChannelState, SkySample};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Device-side TCP port.
const SQM_PORT: u16 = 10001;
/// Fixed reply record length.
const REPLY_LEN: usize = 57;
/// Unanswered queries tolerated before reconnecting.
const MAX_PENDING: u32 = 5;

/// The reading request; the trailing NUL is part of the device protocol.
const QUERY: &[u8] = b"rx\0";

pub struct SqmPoller {
    sample: Arc<Mutex<SkySample>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SqmPoller {
    pub fn spawn<P: AsRef<Path>>(address: String, sample_root: P, cycle_secs: u64) -> Self {
        let sample = Arc::new(Mutex::new(SkySample::offline()));
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let sample = Arc::clone(&sample);
            let connected = Arc::clone(&connected);
            let shutdown = Arc::clone(&shutdown);
            let record = DailyRecord::new(sample_root, "SQM");
            std::thread::Builder::new()
                .name("sqm".to_string())
                .spawn(move || {
                    run(address, cycle_secs.max(1), sample, connected, shutdown, record)
                })
                .expect("spawn sqm thread")
        };

        Self {
            sample,
            connected,
            shutdown,
            handle: Some(handle),
        }
    }

    pub fn sample(&self) -> SkySample {
        self.sample.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        log::info!("SQM: stopped");
    }
}

impl Drop for SqmPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Extract the magnitude from one reply record.
pub fn parse_reply(record: &[u8]) -> Option<f64> {
    if record.len() < REPLY_LEN || record[0] != b'r' {
        return None;
    }
    let field = std::str::from_utf8(&record[2..8]).ok()?;
    field.trim().parse::<f64>().ok()
}

fn run(
    address: String,
    cycle_secs: u64,
    sample: Arc<Mutex<SkySample>>,
    connected: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    record: DailyRecord,
) {
    let cycle = Duration::from_secs(cycle_secs);
    let mut link: Option<TcpLink> = None;
    let mut queries: u32 = 0;
    let replies = Arc::new(AtomicU32::new(0));
    let record = Arc::new(Mutex::new(record));
    let mut deadline = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        if link.is_none() {
            match TcpLink::connect(&address, SQM_PORT) {
                Ok(new_link) => {
                    let sample_cb = Arc::clone(&sample);
                    let replies_cb = Arc::clone(&replies);
                    let record_cb = Arc::clone(&record);
                    new_link.set_min_read(REPLY_LEN);
                    new_link.on_read(Box::new(move |reader, ec, _buffered| {
                        if ec != 0 {
                            sample_cb.lock().state = ChannelState::NotConnected;
                            log::warn!("SQM: remote closed");
                            return;
                        }
                        let mut rec = [0u8; REPLY_LEN];
                        while reader.buffered() >= REPLY_LEN {
                            reader.read(&mut rec, 0, true);
                            let Some(mpsas) = parse_reply(&rec) else {
                                log::warn!("SQM: discarded malformed record");
                                continue;
                            };
                            let now = Utc::now();
                            let utc = now.format("%Y-%m-%dT%H:%M:%S").to_string();
                            {
                                let mut s = sample_cb.lock();
                                s.state = ChannelState::Ok;
                                s.utc = utc.clone();
                                s.mpsas = mpsas;
                            }
                            replies_cb.fetch_add(1, Ordering::Relaxed);
                            log::debug!("SQM: {:6.2} mpsas", mpsas);
                            let line = format!("{}  {:6.2}", utc, mpsas);
                            if let Err(e) = record_cb.lock().append(now.date_naive(), &line) {
                                log::error!("SQM record: {}", e);
                            }
                        }
                    }));
                    {
                        let mut s = sample.lock();
                        s.state = ChannelState::Ok;
                        s.utc = Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
                        s.mpsas = 0.0;
                    }
                    queries = 0;
                    replies.store(0, Ordering::Relaxed);
                    connected.store(true, Ordering::Relaxed);
                    link = Some(new_link);
                    log::info!("SQM: starts working...");
                }
                Err(e) => {
                    sample.lock().state = ChannelState::NotConnected;
                    connected.store(false, Ordering::Relaxed);
                    log::error!("failed to connect SQM[{}:{}]: {}", address, SQM_PORT, e);
                }
            }
        }

        let mut rebuild = false;
        if let Some(active) = link.as_ref() {
            let pending = queries.saturating_sub(replies.load(Ordering::Relaxed));
            if pending > MAX_PENDING {
                sample.lock().state = ChannelState::NoData;
                log::warn!("SQM: long time no data response");
                rebuild = true;
            } else if !active.is_open() {
                rebuild = true;
            } else {
                queries += 1;
                active.write(QUERY);
            }
        }
        if rebuild {
            connected.store(false, Ordering::Relaxed);
            link = None; // reconnect next tick
        }

        deadline += cycle;
        let now = Instant::now();
        if deadline > now {
            let mut remaining = deadline - now;
            while remaining > Duration::ZERO && !shutdown.load(Ordering::Relaxed) {
                let step = remaining.min(Duration::from_millis(100));
                std::thread::sleep(step);
                remaining = deadline.saturating_duration_since(Instant::now());
            }
        } else if now - deadline > cycle {
            deadline = now;
        }
    }
    connected.store(false, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_record_parses_magnitude() {
        let record = b"r, 06.70m,0000022921Hz,0000000020c,0000000.000s, 039.4C\r\n";
        assert_eq!(record.len(), 57);
        assert_eq!(parse_reply(record), Some(6.70));
    }

    #[test]
    fn negative_magnitude_parses() {
        let record = b"r,-09.15m,0000022921Hz,0000000020c,0000000.000s, 039.4C\r\n";
        assert_eq!(parse_reply(record), Some(-9.15));
    }

    #[test]
    fn garbage_record_is_dropped() {
        let record = [b'x'; REPLY_LEN];
        assert_eq!(parse_reply(&record), None);
        assert_eq!(parse_reply(b"r,"), None);
    }
}
