//! Solar rise/set times at an arbitrary elevation threshold.
//!
//! Low-precision NOAA solar geometry: fractional-year series for declination
//! and the equation of time, then the hour angle at which the Sun crosses
//! the requested elevation. Good to a couple of minutes, which is ample for
//! scheduling an observation night.

use chrono::{Datelike, NaiveDate};

/// Outcome of the daily twilight computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SunCrossing {
    /// Local hours of (rise, set) through the threshold elevation
    Normal { rise: f64, set: f64 },
    /// The Sun never drops below the threshold
    PolarDay,
    /// The Sun never climbs above the threshold
    PolarNight,
}

/// Compute the local clock hours at which the Sun crosses `altitude_deg`
/// on `date` at the given site.
///
/// `timezone_hours` is the fixed offset the site clock runs on; longitudes
/// are east-positive degrees.
pub fn sun_crossing(
    date: NaiveDate,
    latitude_deg: f64,
    longitude_deg: f64,
    timezone_hours: i32,
    altitude_deg: f64,
) -> SunCrossing {
    let lat = latitude_deg.to_radians();

    // fractional year at local noon
    let doy = date.ordinal() as f64;
    let gamma = 2.0 * std::f64::consts::PI / days_in_year(date.year()) * (doy - 1.0 + 0.5);

    // equation of time (minutes) and solar declination (radians)
    let eqtime = 229.18
        * (0.000075 + 0.001868 * gamma.cos()
            - 0.032077 * gamma.sin()
            - 0.014615 * (2.0 * gamma).cos()
            - 0.040849 * (2.0 * gamma).sin());
    let decl = 0.006918 - 0.399912 * gamma.cos() + 0.070257 * gamma.sin()
        - 0.006758 * (2.0 * gamma).cos()
        + 0.000907 * (2.0 * gamma).sin()
        - 0.002697 * (3.0 * gamma).cos()
        + 0.00148 * (3.0 * gamma).sin();

    // hour angle at the threshold altitude
    let alt = altitude_deg.to_radians();
    let cos_ha = (alt.sin() - lat.sin() * decl.sin()) / (lat.cos() * decl.cos());
    if cos_ha > 1.0 {
        // the Sun never reaches the altitude from below
        return SunCrossing::PolarNight;
    }
    if cos_ha < -1.0 {
        return SunCrossing::PolarDay;
    }
    let ha_deg = cos_ha.acos().to_degrees();

    // minutes UTC of the crossings, then shifted onto the site clock
    let noon_utc_min = 720.0 - 4.0 * longitude_deg - eqtime;
    let rise_local = (noon_utc_min - 4.0 * ha_deg) / 60.0 + timezone_hours as f64;
    let set_local = (noon_utc_min + 4.0 * ha_deg) / 60.0 + timezone_hours as f64;

    SunCrossing::Normal {
        rise: wrap24(rise_local),
        set: wrap24(set_local),
    }
}

fn days_in_year(year: i32) -> f64 {
    if NaiveDate::from_ymd_opt(year, 12, 31).map(|d| d.ordinal()) == Some(366) {
        366.0
    } else {
        365.0
    }
}

fn wrap24(hours: f64) -> f64 {
    let mut h = hours % 24.0;
    if h < 0.0 {
        h += 24.0;
    }
    h
}

/// Render fractional hours as `hh:mm:ss` for the night-schedule log line.
pub fn hours_to_hms(hours: f64) -> String {
    let total = (wrap24(hours) * 3600.0).round() as u32;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total / 60) % 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn equinox() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 20).unwrap()
    }

    #[test]
    fn equator_equinox_is_near_twelve_hours_of_day() {
        let SunCrossing::Normal { rise, set } = sun_crossing(equinox(), 0.0, 0.0, 0, 0.0) else {
            panic!("expected normal crossing");
        };
        assert!((rise - 6.0).abs() < 0.3, "rise = {}", rise);
        assert!((set - 18.0).abs() < 0.3, "set = {}", set);
    }

    #[test]
    fn longitude_shifts_the_clock_without_timezone() {
        // 90 degrees east: solar noon comes 6 clock-hours earlier in UTC
        let SunCrossing::Normal { rise, .. } = sun_crossing(equinox(), 0.0, 90.0, 0, 0.0) else {
            panic!("expected normal crossing");
        };
        assert!((rise - 0.0).abs() < 0.3 || (rise - 24.0).abs() < 0.3, "rise = {}", rise);
    }

    #[test]
    fn matching_timezone_recenters_local_noon() {
        // 120 E with UTC+8: local clock tracks the sun again
        let SunCrossing::Normal { rise, set } = sun_crossing(equinox(), 0.0, 120.0, 8, 0.0)
        else {
            panic!("expected normal crossing");
        };
        assert!((rise - 6.0).abs() < 0.3, "rise = {}", rise);
        assert!((set - 18.0).abs() < 0.3, "set = {}", set);
    }

    #[test]
    fn negative_threshold_lengthens_the_day() {
        let SunCrossing::Normal { rise: r0, set: s0 } =
            sun_crossing(equinox(), 30.0, 0.0, 0, 0.0)
        else {
            panic!()
        };
        let SunCrossing::Normal { rise: r10, set: s10 } =
            sun_crossing(equinox(), 30.0, 0.0, 0, -10.0)
        else {
            panic!()
        };
        assert!(r10 < r0);
        assert!(s10 > s0);
    }

    #[test]
    fn polar_cases() {
        let midsummer = NaiveDate::from_ymd_opt(2026, 6, 21).unwrap();
        assert_eq!(
            sun_crossing(midsummer, 80.0, 0.0, 0, 0.0),
            SunCrossing::PolarDay
        );
        let midwinter = NaiveDate::from_ymd_opt(2026, 12, 21).unwrap();
        assert_eq!(
            sun_crossing(midwinter, 80.0, 0.0, 0, 0.0),
            SunCrossing::PolarNight
        );
    }

    #[test]
    fn hms_rendering() {
        assert_eq!(hours_to_hms(6.5), "06:30:00");
        assert_eq!(hours_to_hms(23.999), "23:59:56");
        assert_eq!(hours_to_hms(-1.0), "23:00:00");
    }
}
