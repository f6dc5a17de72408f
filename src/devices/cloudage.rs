//! Cloud-cover map reader.
//!
//! The external reducer rewrites an exchange file after every processed
//! frame. This component watches the file's mtime at 1 Hz, reparses it on
//! change, and republishes the map as an immutable snapshot behind a pointer
//! swap so the telemetry composer never blocks the reader. A map that has
//! not been refreshed within the configured window is marked stale.

use crate::error::{Error, Result};
use crate::types::{ChannelState, CloudMap, CloudZone};
use chrono::{DateTime, NaiveDateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

/// Shared snapshot handle: producer swaps the inner `Arc`, consumers clone it.
pub type CloudSnapshot = Arc<RwLock<Arc<CloudMap>>>;

pub struct CloudageReader {
    snapshot: CloudSnapshot,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CloudageReader {
    pub fn spawn<P: AsRef<Path>>(sample_dir: P, file_name: &str, stale_secs: u64) -> Self {
        let snapshot: CloudSnapshot = Arc::new(RwLock::new(Arc::new(CloudMap::empty())));
        let shutdown = Arc::new(AtomicBool::new(false));

        let handle = {
            let snapshot = Arc::clone(&snapshot);
            let shutdown = Arc::clone(&shutdown);
            let sample_dir = sample_dir.as_ref().to_path_buf();
            let file_path = sample_dir.join(file_name);
            std::thread::Builder::new()
                .name("cloudage".to_string())
                .spawn(move || run(file_path, sample_dir, stale_secs, snapshot, shutdown))
                .expect("spawn cloudage thread")
        };

        Self {
            snapshot,
            shutdown,
            handle: Some(handle),
        }
    }

    /// Handle for consumers; cheap to clone into the publisher.
    pub fn snapshot(&self) -> CloudSnapshot {
        Arc::clone(&self.snapshot)
    }

    /// Latest map.
    pub fn map(&self) -> Arc<CloudMap> {
        Arc::clone(&self.snapshot.read())
    }

    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
        log::info!("Cloudage reader: stopped");
    }
}

impl Drop for CloudageReader {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    file_path: PathBuf,
    sample_dir: PathBuf,
    stale_secs: u64,
    snapshot: CloudSnapshot,
    shutdown: Arc<AtomicBool>,
) {
    let stale_after = Duration::from_secs(stale_secs);
    let mut known_mtime: Option<SystemTime> = None;
    let mut last_change = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_secs(1));

        let mtime = fs::metadata(&file_path).and_then(|m| m.modified()).ok();
        match mtime {
            None => {
                publish_state(&snapshot, ChannelState::NoData);
            }
            Some(t) if known_mtime != Some(t) => {
                known_mtime = Some(t);
                last_change = Instant::now();
                match fs::read_to_string(&file_path)
                    .map_err(Error::from)
                    .and_then(|text| parse_exchange(&text))
                {
                    Ok(map) => {
                        if map.state == ChannelState::Ok {
                            if let Err(e) = save_mirror(&sample_dir, &map) {
                                log::warn!("cloudage mirror: {}", e);
                            }
                        }
                        *snapshot.write() = Arc::new(map);
                    }
                    Err(e) => {
                        log::warn!("cloudage: discarded exchange file: {}", e);
                        publish_state(&snapshot, ChannelState::NoData);
                    }
                }
            }
            Some(_) => {
                if last_change.elapsed() > stale_after {
                    let current = snapshot.read().state;
                    if current != ChannelState::Stale {
                        log::warn!(
                            "cloudage: no reducer update in {} s, map is stale",
                            stale_secs
                        );
                        publish_state(&snapshot, ChannelState::Stale);
                    }
                }
            }
        }
    }
}

fn publish_state(snapshot: &CloudSnapshot, state: ChannelState) {
    let mut guard = snapshot.write();
    if guard.state != state {
        let mut map = (**guard).clone();
        map.state = state;
        *guard = Arc::new(map);
    }
}

/// Parse the reducer exchange file.
///
/// `#` comments carry `ID`, `SITE lon lat alt` and `STEP az el`; the first
/// data line is the reducer state integer, the second the UTC timestamp,
/// every further line one `az el level` zone.
pub fn parse_exchange(text: &str) -> Result<CloudMap> {
    let mut map = CloudMap::empty();
    let mut az_step = None;
    let mut el_step = None;
    let mut data_line = 0usize;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(comment) = line.strip_prefix('#') {
            let tokens: Vec<&str> = comment
                .split(|c: char| c.is_whitespace() || c == '=')
                .filter(|t| !t.is_empty())
                .collect();
            match tokens.first().map(|t| t.to_ascii_uppercase()).as_deref() {
                Some("ID") if tokens.len() >= 2 => map.id = tokens[1].to_string(),
                Some("SITE") if tokens.len() >= 4 => {
                    map.site = Some((
                        parse_num(tokens[1])?,
                        parse_num(tokens[2])?,
                        parse_num(tokens[3])?,
                    ));
                }
                Some("STEP") if tokens.len() >= 3 => {
                    az_step = Some(parse_num(tokens[1])?);
                    el_step = Some(parse_num(tokens[2])?);
                }
                _ => {}
            }
            continue;
        }

        data_line += 1;
        match data_line {
            1 => {
                map.reducer_state = line
                    .parse()
                    .map_err(|_| Error::Protocol(format!("reducer state '{}'", line)))?
            }
            2 => map.utc = line.to_string(),
            _ => {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                if tokens.len() < 3 {
                    return Err(Error::Protocol(format!("zone line '{}'", line)));
                }
                map.zones.push(CloudZone {
                    azimuth: parse_num(tokens[0])?,
                    elevation: parse_num(tokens[1])?,
                    level: tokens[2]
                        .parse()
                        .map_err(|_| Error::Protocol(format!("zone level '{}'", tokens[2])))?,
                });
            }
        }
    }

    map.sort_zones();
    match (az_step, el_step) {
        (Some(az), Some(el)) if map.reducer_state == 0 => {
            map.az_step = az;
            map.el_step = el;
            map.state = ChannelState::Ok;
        }
        (az, el) => {
            map.az_step = az.unwrap_or(0.0);
            map.el_step = el.unwrap_or(0.0);
            map.state = ChannelState::NoData;
        }
    }
    Ok(map)
}

fn parse_num(token: &str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| Error::Protocol(format!("number '{}'", token)))
}

/// Mirror a parsed map as a JSON diagnostic under
/// `CloudAge/Y<YYYY>/CA<YYYYMMDD>/CA<YYYYMMDD>T<HHMMSS>.json`.
fn save_mirror(sample_dir: &Path, map: &CloudMap) -> Result<()> {
    let utc = parse_iso(&map.utc)
        .ok_or_else(|| Error::Protocol(format!("timestamp '{}'", map.utc)))?;
    let day = format!("CA{}", utc.format("%Y%m%d"));
    let dir = sample_dir
        .join("CloudAge")
        .join(format!("Y{}", utc.format("%Y")))
        .join(&day);
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}T{}.json", day, utc.format("%H%M%S")));

    let mut doc = json!({
        "ID": map.id,
        "state": map.reducer_state,
        "utc": map.utc,
        "Step": { "Azimuth": map.az_step, "Elevation": map.el_step },
        "distribution": map
            .zones
            .iter()
            .map(|z| json!({ "azi": z.azimuth, "ele": z.elevation, "level": z.level }))
            .collect::<Vec<_>>(),
    });
    if let Some((lon, lat, alt)) = map.site {
        doc["GeoSite"] = json!({ "Longitude": lon, "Latitude": lat, "Altitude": alt });
    }
    fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
    Ok(())
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    if let Ok(t) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(t);
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(t);
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|t| t.with_timezone(&Utc).naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# ID = ALLSKY-5606
# SITE = 80.03 32.32 5100
# STEP = 30 20
0
2026-08-02T14:30:00
0 80 1
30 80 2
0 60 8
30 60 9
";

    #[test]
    fn exchange_file_parses_and_sorts() {
        let map = parse_exchange(SAMPLE).unwrap();
        assert_eq!(map.state, ChannelState::Ok);
        assert_eq!(map.id, "ALLSKY-5606");
        assert_eq!(map.site, Some((80.03, 32.32, 5100.0)));
        assert_eq!(map.az_step, 30.0);
        assert_eq!(map.el_step, 20.0);
        assert_eq!(map.utc, "2026-08-02T14:30:00");
        assert_eq!(map.zones.len(), 4);
        // descending elevation, ascending azimuth
        assert_eq!(map.zones[0].elevation, 80.0);
        assert_eq!(map.zones[0].azimuth, 0.0);
        assert_eq!(map.zones[3].level, 9);
        assert_eq!(map.cover_per_mille(), 500);
    }

    #[test]
    fn nonzero_reducer_state_is_no_data() {
        let text = SAMPLE.replacen("\n0\n", "\n2\n", 1);
        let map = parse_exchange(&text).unwrap();
        assert_eq!(map.reducer_state, 2);
        assert_eq!(map.state, ChannelState::NoData);
    }

    #[test]
    fn missing_step_is_no_data() {
        let text = SAMPLE.replace("# STEP = 30 20\n", "");
        let map = parse_exchange(&text).unwrap();
        assert_eq!(map.state, ChannelState::NoData);
    }

    #[test]
    fn malformed_zone_is_rejected() {
        let text = format!("{}garbage line\n", SAMPLE);
        assert!(parse_exchange(&text).is_err());
    }

    #[test]
    fn mirror_path_layout() {
        let dir = tempfile::tempdir().unwrap();
        let map = parse_exchange(SAMPLE).unwrap();
        save_mirror(dir.path(), &map).unwrap();
        let path = dir
            .path()
            .join("CloudAge/Y2026/CA20260802/CA20260802T143000.json");
        let text = fs::read_to_string(path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(doc["ID"], "ALLSKY-5606");
        assert_eq!(doc["distribution"].as_array().unwrap().len(), 4);
        assert_eq!(doc["GeoSite"]["Altitude"], 5100.0);
    }

    #[test]
    fn reader_goes_stale_without_updates() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("cloudage.txt"), SAMPLE).unwrap();
        let mut reader = CloudageReader::spawn(dir.path(), "cloudage.txt", 2);

        // first tick parses the file
        std::thread::sleep(Duration::from_millis(1500));
        assert_eq!(reader.map().state, ChannelState::Ok);

        // no further updates: stale after the configured 2 s
        std::thread::sleep(Duration::from_millis(2600));
        assert_eq!(reader.map().state, ChannelState::Stale);
        assert_eq!(reader.map().zones.len(), 4);
        reader.stop();
    }
}
