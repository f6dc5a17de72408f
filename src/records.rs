//! Daily per-sensor sample records.
//!
//! Each sensor appends one line per successful cycle to
//! `<root>/<kind>/Y<YYYY>/<kind>_<YYYYMMDD>.log`; the file is reopened on
//! UTC day rollover.

use crate::error::Result;
use chrono::{Datelike, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct DailyRecord {
    root: PathBuf,
    /// Subdirectory under the root, e.g. "Weather"
    dir: String,
    /// File-name stem; usually the same as the directory
    stem: String,
    open_day: Option<NaiveDate>,
    file: Option<File>,
}

impl DailyRecord {
    pub fn new<P: AsRef<Path>>(root: P, kind: &str) -> Self {
        Self::with_stem(root, kind, kind)
    }

    /// Record whose file stem differs from its directory, like the camera's
    /// `<prefix>/Y<YYYY>/WMC_<date>.log`.
    pub fn with_stem<P: AsRef<Path>>(root: P, dir: &str, stem: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            dir: dir.to_string(),
            stem: stem.to_string(),
            open_day: None,
            file: None,
        }
    }

    /// Path of the record for a given UTC day.
    pub fn path_for(&self, day: NaiveDate) -> PathBuf {
        self.root
            .join(&self.dir)
            .join(format!("Y{}", day.year()))
            .join(format!(
                "{}_{}{:02}{:02}.log",
                self.stem,
                day.year(),
                day.month(),
                day.day()
            ))
    }

    /// Append one line to the day's record, rolling the file when the UTC
    /// day changed since the previous append.
    pub fn append(&mut self, day: NaiveDate, line: &str) -> Result<()> {
        if self.open_day != Some(day) {
            let path = self.path_for(day);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            log::info!("{} record = {}", self.stem, path.display());
            self.file = Some(OpenOptions::new().create(true).append(true).open(&path)?);
            self.open_day = Some(day);
        }
        if let Some(f) = self.file.as_mut() {
            writeln!(f, "{}", line)?;
            f.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_convention() {
        let rec = DailyRecord::new("/data/env", "Weather");
        let day = NaiveDate::from_ymd_opt(2026, 8, 2).unwrap();
        assert_eq!(
            rec.path_for(day),
            PathBuf::from("/data/env/Weather/Y2026/Weather_20260802.log")
        );
    }

    #[test]
    fn appends_and_rolls_on_day_change() {
        let dir = tempfile::tempdir().unwrap();
        let mut rec = DailyRecord::new(dir.path(), "SQM");
        let d1 = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap();

        rec.append(d1, "2026-01-31T22:00:00  21.40").unwrap();
        rec.append(d1, "2026-01-31T22:00:20  21.41").unwrap();
        rec.append(d2, "2026-02-01T00:00:00  21.50").unwrap();

        let f1 = fs::read_to_string(rec.path_for(d1)).unwrap();
        let f2 = fs::read_to_string(rec.path_for(d2)).unwrap();
        assert_eq!(f1.lines().count(), 2);
        assert_eq!(f2.lines().count(), 1);
        assert!(f2.contains("21.50"));
    }
}
