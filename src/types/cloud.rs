//! All-sky cloud-cover map, as produced by the external reducer.

use super::ChannelState;

/// One cell of the all-sky map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloudZone {
    /// Zone centre azimuth, degrees
    pub azimuth: f64,
    /// Zone centre elevation, degrees
    pub elevation: f64,
    /// Cloud level 0..=9, 0 = clear
    pub level: i16,
}

/// Parsed cloud-cover map.
#[derive(Debug, Clone)]
pub struct CloudMap {
    /// UTC timestamp from the exchange file, extended ISO format
    pub utc: String,
    pub state: ChannelState,
    /// State integer reported by the reducer itself
    pub reducer_state: i32,
    /// Reducer identity string from the file header
    pub id: String,
    /// Site triple from the file header, when present
    pub site: Option<(f64, f64, f64)>,
    /// Azimuth step between zone centres, degrees
    pub az_step: f64,
    /// Elevation step between zone centres, degrees
    pub el_step: f64,
    /// Zones ordered by descending elevation, then ascending azimuth
    pub zones: Vec<CloudZone>,
}

impl CloudMap {
    pub fn empty() -> Self {
        Self {
            utc: String::new(),
            state: ChannelState::NoData,
            reducer_state: 0,
            id: String::new(),
            site: None,
            az_step: 0.0,
            el_step: 0.0,
            zones: Vec::new(),
        }
    }

    /// Restore the publication order: descending elevation, ascending azimuth.
    pub fn sort_zones(&mut self) {
        self.zones.sort_by(|a, b| {
            b.elevation
                .partial_cmp(&a.elevation)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    a.azimuth
                        .partial_cmp(&b.azimuth)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
        });
    }

    /// Whole-sky cloud cover in 0.1 % units: the share of zones at level 7
    /// or above, rounded.
    pub fn cover_per_mille(&self) -> u16 {
        if self.zones.is_empty() {
            return 0;
        }
        let covered = self.zones.iter().filter(|z| z.level >= 7).count() as u64;
        let total = self.zones.len() as u64;
        ((covered * 1000 + total / 2) / total) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone(az: f64, el: f64, level: i16) -> CloudZone {
        CloudZone {
            azimuth: az,
            elevation: el,
            level,
        }
    }

    #[test]
    fn zones_sort_desc_el_asc_az() {
        let mut map = CloudMap::empty();
        map.zones = vec![
            zone(90.0, 30.0, 0),
            zone(0.0, 60.0, 1),
            zone(45.0, 30.0, 2),
            zone(180.0, 60.0, 3),
        ];
        map.sort_zones();
        let order: Vec<(f64, f64)> = map.zones.iter().map(|z| (z.elevation, z.azimuth)).collect();
        assert_eq!(
            order,
            vec![(60.0, 0.0), (60.0, 180.0), (30.0, 45.0), (30.0, 90.0)]
        );
    }

    #[test]
    fn cover_counts_level_seven_and_up() {
        let mut map = CloudMap::empty();
        for i in 0..8 {
            map.zones.push(zone(i as f64, 45.0, i as i16));
        }
        // levels 0..=7, one zone at >= 7 out of 8
        assert_eq!(map.cover_per_mille(), 125);
    }

    #[test]
    fn cover_rounds_to_nearest() {
        let mut map = CloudMap::empty();
        map.zones = vec![zone(0.0, 1.0, 9), zone(1.0, 1.0, 0), zone(2.0, 1.0, 0)];
        // 1/3 => 333.3…, rounds to 333
        assert_eq!(map.cover_per_mille(), 333);
        map.zones.push(zone(3.0, 1.0, 9));
        map.zones.push(zone(4.0, 1.0, 9));
        // 3/5 => 600
        assert_eq!(map.cover_per_mille(), 600);
    }

    #[test]
    fn cover_of_empty_map_is_zero() {
        assert_eq!(CloudMap::empty().cover_per_mille(), 0);
    }
}
