//! Best-effort WEA JSON diagnostics.
//!
//! A per-cycle JSON mirror of the fused telemetry, written alongside the
//! binary uplink for after-the-fact inspection. Any failure here is logged
//! and ignored; the binary frame is the normative product.

use crate::error::{Error, Result};
use crate::types::{ChannelState, CloudMap, SkySample, WeatherSample};
use chrono::NaiveDateTime;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};

/// Placeholder for a value the site cannot measure.
const INVALID: f64 = -99.9;

/// Compose and write one WEA file. `cloud` must be the map the current
/// telemetry frame was built from.
pub fn save_wea(
    sample_dir: &Path,
    device_id: &str,
    weather: Option<&WeatherSample>,
    sqm: Option<&SkySample>,
    cloud: &CloudMap,
) -> Result<PathBuf> {
    let stamp = parse_iso(&cloud.utc)
        .ok_or_else(|| Error::Protocol(format!("cloud timestamp '{}'", cloud.utc)))?;
    let mtime = spaced(&cloud.utc);

    let mut weather_doc = json!({
        "State": 1,
        "WUTC": mtime,
        "T2": INVALID,
        "Q2": INVALID,
        "PS": INVALID,
        "Td": INVALID,
        "SPD": INVALID,
        "DIR": INVALID,
        "isRain": INVALID,
        "TR": INVALID,
        "TF": INVALID,
        "GEOTF": INVALID,
    });
    if let Some(wea) = weather {
        if wea.state == ChannelState::Ok {
            weather_doc["State"] = json!(0);
            weather_doc["WUTC"] = json!(spaced(&wea.utc));
            weather_doc["T2"] = json!(wea.temperature);
            weather_doc["Q2"] = json!(wea.humidity);
            weather_doc["PS"] = json!(wea.pressure);
            weather_doc["Td"] = json!(wea.dew_point());
            weather_doc["SPD"] = json!(wea.wind_speed);
            weather_doc["DIR"] = json!(wea.wind_dir);
            weather_doc["isRain"] = json!(wea.rain);
        }
    }

    let mut sqm_doc = json!({
        "State": 1,
        "SQMUTC": mtime,
        "MPSAS": INVALID,
    });
    if let Some(sky) = sqm {
        if sky.state == ChannelState::Ok {
            sqm_doc["State"] = json!(0);
            sqm_doc["SQMUTC"] = json!(spaced(&sky.utc));
            sqm_doc["MPSAS"] = json!(sky.mpsas);
        }
    }

    let mut cloud_doc = json!({
        "State": 1,
        "CLOUTC": mtime,
        "Coordinate": 0,
        "PointCount": cloud.zones.len(),
        "Angle1Step": cloud.az_step,
        "Angle2Step": cloud.el_step,
    });
    if cloud.state == ChannelState::Ok {
        cloud_doc["State"] = json!(0);
        cloud_doc["CLOUTC"] = json!(spaced(&cloud.utc));
        cloud_doc["Angle1"] =
            json!(cloud.zones.iter().map(|z| z.azimuth).collect::<Vec<_>>());
        cloud_doc["Angle2"] =
            json!(cloud.zones.iter().map(|z| z.elevation).collect::<Vec<_>>());
        cloud_doc["Level"] = json!(cloud.zones.iter().map(|z| z.level).collect::<Vec<_>>());
    }

    let doc = json!({
        "DeviceID": device_id,
        "MTIME": mtime,
        "Weather": weather_doc,
        "SQM": sqm_doc,
        "Cloudage": cloud_doc,
    });

    let dir = sample_dir
        .join("WeaFile")
        .join(format!("Y{}", stamp.format("%Y")))
        .join(format!("WEA{}", stamp.format("%Y%m%d")));
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("{}_{}.wea", stamp.format("%Y%m%d%H%M%S"), device_id));
    fs::write(&path, serde_json::to_string_pretty(&doc)?)?;
    Ok(path)
}

/// The archival consumers expect separator-free timestamps.
fn spaced(iso: &str) -> String {
    iso.replace(['T', '-', ':', '.'], " ")
}

fn parse_iso(text: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}
