//! Minimal FITS writer for raw all-sky frames.
//!
//! Writes a single-HDU 16-bit image: one header block of 80-character cards
//! padded to 2880 bytes, then big-endian pixel data with the conventional
//! BZERO=32768 offset for unsigned sensors, padded to a 2880-byte boundary.

use crate::error::Result;
use crate::types::Site;
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const BLOCK: usize = 2880;
const CARD: usize = 80;

/// Header values carried by every frame.
pub struct FitsHeader<'a> {
    pub date_obs: NaiveDateTime,
    pub date_end: NaiveDateTime,
    pub expdur_s: f64,
    pub gain: f32,
    pub cooler_set: i32,
    pub cooler_actual: i32,
    pub frame_no: u32,
    pub site: &'a Site,
}

struct CardWriter {
    cards: Vec<u8>,
}

impl CardWriter {
    fn new() -> Self {
        Self { cards: Vec::new() }
    }

    fn push_raw(&mut self, text: &str) {
        let mut card = text.as_bytes().to_vec();
        card.resize(CARD, b' ');
        self.cards.extend_from_slice(&card[..CARD]);
    }

    fn logical(&mut self, key: &str, value: bool, comment: &str) {
        self.push_raw(&format!(
            "{:<8}= {:>20} / {}",
            key,
            if value { "T" } else { "F" },
            comment
        ));
    }

    fn integer(&mut self, key: &str, value: i64, comment: &str) {
        self.push_raw(&format!("{:<8}= {:>20} / {}", key, value, comment));
    }

    fn real(&mut self, key: &str, value: f64, comment: &str) {
        self.push_raw(&format!("{:<8}= {:>20.6} / {}", key, value, comment));
    }

    fn string(&mut self, key: &str, value: &str, comment: &str) {
        self.push_raw(&format!("{:<8}= '{}' / {}", key, value, comment));
    }

    fn finish(mut self) -> Vec<u8> {
        self.push_raw("END");
        let mut block = self.cards;
        let padded = block.len().div_ceil(BLOCK) * BLOCK;
        block.resize(padded, b' ');
        block
    }
}

/// Write one frame. `data` is row-major, `width * height` pixels.
pub fn write_frame(
    path: &Path,
    data: &[u16],
    width: u32,
    height: u32,
    header: &FitsHeader<'_>,
) -> Result<()> {
    let mut cards = CardWriter::new();
    cards.logical("SIMPLE", true, "file conforms to FITS standard");
    cards.integer("BITPIX", 16, "bits per pixel");
    cards.integer("NAXIS", 2, "number of axes");
    cards.integer("NAXIS1", width as i64, "image width");
    cards.integer("NAXIS2", height as i64, "image height");
    cards.real("BZERO", 32768.0, "unsigned sensor offset");
    cards.real("BSCALE", 1.0, "scaling factor");
    cards.string("CCDTYPE", "OBJECT", "type of image");
    cards.string(
        "DATE-OBS",
        &header.date_obs.format("%Y-%m-%d").to_string(),
        "UTC date of begin observation",
    );
    cards.string(
        "TIME-OBS",
        &header.date_obs.format("%H:%M:%S").to_string(),
        "UTC time of begin observation",
    );
    cards.string(
        "TIME-END",
        &header.date_end.format("%H:%M:%S").to_string(),
        "UTC time of end observation",
    );
    cards.real("JD", julian_day(header.date_obs), "Julian day of begin observation");
    cards.real("EXPTIME", header.expdur_s, "exposure duration");
    cards.real("GAIN", header.gain as f64, "preamp gain/index");
    cards.integer("TEMPSET", header.cooler_set as i64, "cooler set point");
    cards.integer("TEMPACT", header.cooler_actual as i64, "cooler actual point");
    cards.string("TERMTYPE", "CloudCamera", "terminal type");
    cards.integer("TELFOCUS", 12, "lens focal length in mm");
    cards.integer("FRAMENO", header.frame_no as i64, "frame no in this run");
    cards.string("DEVID", &header.site.device_id, "device ID");
    cards.string("SITENAME", &header.site.name, "observation site name");
    cards.real("SITELON", header.site.longitude, "site longitude @ degrees");
    cards.real("SITELAT", header.site.latitude, "site latitude @ degrees");
    cards.real("SITEALT", header.site.altitude, "site altitude @ meter");

    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(&cards.finish())?;

    let mut payload = Vec::with_capacity(data.len() * 2);
    for &px in data {
        // BZERO convention: stored = physical - 32768, big-endian i16
        let stored = (px as i32 - 32768) as i16;
        payload.extend_from_slice(&stored.to_be_bytes());
    }
    let padded = payload.len().div_ceil(BLOCK) * BLOCK;
    payload.resize(padded, 0);
    out.write_all(&payload)?;
    out.flush()?;
    Ok(())
}

/// Julian day of a UTC instant.
pub fn julian_day(t: NaiveDateTime) -> f64 {
    let (y, m, d) = (t.year() as f64, t.month() as f64, t.day() as f64);
    let (yy, mm) = if m <= 2.0 { (y - 1.0, m + 12.0) } else { (y, m) };
    let a = (yy / 100.0).floor();
    let b = 2.0 - a + (a / 4.0).floor();
    let day_frac = (t.num_seconds_from_midnight() as f64) / 86400.0;
    (365.25 * (yy + 4716.0)).floor() + (30.6001 * (mm + 1.0)).floor() + d + b - 1524.5 + day_frac
}
