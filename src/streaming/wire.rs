//! Fused-telemetry wire format.
//!
//! One little-endian datagram per cadence tick: a fixed header, a fixed
//! prefix carrying the weather / sky-brightness / cloud channel snapshots,
//! and a per-zone suffix. When the zone list overflows one UDP MTU it is
//! sharded into packets of at most [`ZONES_PER_PACKET`] zones, each
//! repeating the prefix with its own (zone_count, pack_no).
//!
//! Dates travel as days since 2000-01-01 (that day == 1); times as 0.1 ms
//! units since local midnight. A dead channel carries its state byte plus
//! numeric fields pinned to their type's MAX.

use crate::error::{Error, Result};
use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime, Timelike, Utc};

pub const PROTOCOL_VERSION: u16 = 0x8080;
pub const BLOCK_ID: u32 = 0x5000_0001;
/// Zone suffix cap per datagram.
pub const ZONES_PER_PACKET: usize = 72;

/// Header length on the wire.
pub const HEAD_LEN: usize = 16;
/// Fixed prefix length following the header.
pub const PREFIX_LEN: usize = 65;
/// Per-zone suffix entry length.
pub const ZONE_LEN: usize = 10;

/// One complete telemetry composition; `encode_packets` turns it into wire
/// datagrams.
#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    pub sid: u32,
    /// Frame timestamp, local date/time of composition
    pub date: i32,
    pub time: i32,
    pub wea_state: u8,
    pub wea_date: i32,
    pub wea_time: i32,
    /// 0.1 degC, two's complement
    pub temp: i16,
    /// 0.1 %
    pub humidity: u16,
    /// 0.1 hPa
    pub airpres: u16,
    /// 0.1 m/s
    pub windspd: u16,
    /// 0.1 deg, north == 0
    pub winddir: u16,
    pub rainfall: u16,
    /// 0.1 % of zones at level >= 7
    pub cloud_percent: u16,
    pub sqm_state: u8,
    pub sqm_date: i32,
    pub sqm_time: i32,
    /// 0.01 mag/arcsec^2, two's complement
    pub sqm_bkmag: i16,
    pub cloud_state: u8,
    pub cloud_date: i32,
    pub cloud_time: i32,
    /// 0.1 deg
    pub azi_step: u32,
    /// 0.1 deg
    pub alt_step: u32,
    /// (azi 0.1 deg, alt 0.1 deg, level)
    pub zones: Vec<(i32, i32, i16)>,
}

impl TelemetryFrame {
    /// All channels dead, all numerics at their sentinel.
    pub fn sentinel(sid: u32, date: i32, time: i32) -> Self {
        Self {
            sid,
            date,
            time,
            wea_state: u8::MAX,
            wea_date: i32::MAX,
            wea_time: i32::MAX,
            temp: i16::MAX,
            humidity: u16::MAX,
            airpres: u16::MAX,
            windspd: u16::MAX,
            winddir: u16::MAX,
            rainfall: u16::MAX,
            cloud_percent: u16::MAX,
            sqm_state: u8::MAX,
            sqm_date: i32::MAX,
            sqm_time: i32::MAX,
            sqm_bkmag: i16::MAX,
            cloud_state: u8::MAX,
            cloud_date: i32::MAX,
            cloud_time: i32::MAX,
            azi_step: u32::MAX,
            alt_step: u32::MAX,
            zones: Vec::new(),
        }
    }

    /// Encode into one datagram per zone shard. `pno` is the running packet
    /// number, incremented once per datagram produced.
    pub fn encode_packets(&self, pno: &mut u32) -> Vec<Vec<u8>> {
        if self.cloud_state != 0 || self.zones.is_empty() {
            // no zone suffix: a single packet with an empty trailer
            return vec![self.encode_one(pno, 0, 1, &[])];
        }
        let pack_count = self.zones.len().div_ceil(ZONES_PER_PACKET) as u16;
        self.zones
            .chunks(ZONES_PER_PACKET)
            .enumerate()
            .map(|(i, chunk)| self.encode_one(pno, pack_count, i as u16 + 1, chunk))
            .collect()
    }

    fn encode_one(
        &self,
        pno: &mut u32,
        pack_count: u16,
        pack_no: u16,
        zones: &[(i32, i32, i16)],
    ) -> Vec<u8> {
        let len = (PREFIX_LEN + zones.len() * ZONE_LEN) as u16;
        let mut buf = Vec::with_capacity(HEAD_LEN + len as usize);

        *pno += 1;
        // header
        buf.extend_from_slice(&PROTOCOL_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.sid.to_le_bytes());
        buf.extend_from_slice(&BLOCK_ID.to_le_bytes());
        buf.extend_from_slice(&pno.to_le_bytes());
        buf.extend_from_slice(&len.to_le_bytes());
        // prefix
        buf.extend_from_slice(&self.date.to_le_bytes());
        buf.extend_from_slice(&self.time.to_le_bytes());
        buf.push(self.wea_state);
        buf.extend_from_slice(&self.wea_date.to_le_bytes());
        buf.extend_from_slice(&self.wea_time.to_le_bytes());
        buf.extend_from_slice(&self.temp.to_le_bytes());
        buf.extend_from_slice(&self.humidity.to_le_bytes());
        buf.extend_from_slice(&self.airpres.to_le_bytes());
        buf.extend_from_slice(&self.windspd.to_le_bytes());
        buf.extend_from_slice(&self.winddir.to_le_bytes());
        buf.extend_from_slice(&self.rainfall.to_le_bytes());
        buf.extend_from_slice(&self.cloud_percent.to_le_bytes());
        buf.push(self.sqm_state);
        buf.extend_from_slice(&self.sqm_date.to_le_bytes());
        buf.extend_from_slice(&self.sqm_time.to_le_bytes());
        buf.extend_from_slice(&self.sqm_bkmag.to_le_bytes());
        buf.push(self.cloud_state);
        buf.extend_from_slice(&self.cloud_date.to_le_bytes());
        buf.extend_from_slice(&self.cloud_time.to_le_bytes());
        buf.extend_from_slice(&(zones.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.azi_step.to_le_bytes());
        buf.extend_from_slice(&self.alt_step.to_le_bytes());
        buf.extend_from_slice(&pack_count.to_le_bytes());
        buf.extend_from_slice(&pack_no.to_le_bytes());
        // zone suffix
        for &(azi, alt, level) in zones {
            buf.extend_from_slice(&azi.to_le_bytes());
            buf.extend_from_slice(&alt.to_le_bytes());
            buf.extend_from_slice(&level.to_le_bytes());
        }
        buf
    }
}

/// Decoded view of one datagram, for consumers and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPacket {
    pub ver: u16,
    pub sid: u32,
    pub bid: u32,
    pub pno: u32,
    pub len: u16,
    pub date: i32,
    pub time: i32,
    pub wea_state: u8,
    pub temp: i16,
    pub humidity: u16,
    pub airpres: u16,
    pub windspd: u16,
    pub winddir: u16,
    pub rainfall: u16,
    pub cloud_percent: u16,
    pub sqm_state: u8,
    pub sqm_bkmag: i16,
    pub cloud_state: u8,
    pub zone_count: u16,
    pub azi_step: u32,
    pub alt_step: u32,
    pub pack_count: u16,
    pub pack_no: u16,
    pub zones: Vec<(i32, i32, i16)>,
}

pub fn decode_packet(bytes: &[u8]) -> Result<DecodedPacket> {
    if bytes.len() < HEAD_LEN + PREFIX_LEN {
        return Err(Error::Protocol("telemetry packet too short".to_string()));
    }
    let u16_at = |o: usize| u16::from_le_bytes([bytes[o], bytes[o + 1]]);
    let i16_at = |o: usize| i16::from_le_bytes([bytes[o], bytes[o + 1]]);
    let u32_at = |o: usize| u32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);
    let i32_at = |o: usize| i32::from_le_bytes([bytes[o], bytes[o + 1], bytes[o + 2], bytes[o + 3]]);

    let zone_count = u16_at(67);
    let mut zones = Vec::with_capacity(zone_count as usize);
    let mut off = HEAD_LEN + PREFIX_LEN;
    for _ in 0..zone_count {
        if off + ZONE_LEN > bytes.len() {
            return Err(Error::Protocol("truncated zone suffix".to_string()));
        }
        zones.push((i32_at(off), i32_at(off + 4), i16_at(off + 8)));
        off += ZONE_LEN;
    }

    Ok(DecodedPacket {
        ver: u16_at(0),
        sid: u32_at(2),
        bid: u32_at(6),
        pno: u32_at(10),
        len: u16_at(14),
        date: i32_at(16),
        time: i32_at(20),
        wea_state: bytes[24],
        temp: i16_at(33),
        humidity: u16_at(35),
        airpres: u16_at(37),
        windspd: u16_at(39),
        winddir: u16_at(41),
        rainfall: u16_at(43),
        cloud_percent: u16_at(45),
        sqm_state: bytes[47],
        sqm_bkmag: i16_at(56),
        cloud_state: bytes[58],
        zone_count,
        azi_step: u32_at(69),
        alt_step: u32_at(73),
        pack_count: u16_at(77),
        pack_no: u16_at(79),
        zones,
    })
}

/// Days since 2000-01-01, with that day counting as 1.
pub fn days_since_2000(date: NaiveDate) -> i32 {
    let epoch = NaiveDate::from_ymd_opt(2000, 1, 1).unwrap();
    (date - epoch).num_days() as i32 + 1
}

/// 0.1 ms units since midnight.
pub fn tenth_ms_since_midnight(t: NaiveDateTime) -> i32 {
    (t.num_seconds_from_midnight() as i64 * 10_000 + (t.nanosecond() as i64) / 100_000) as i32
}

/// Local (date, time) wire pair for a UTC instant at the given timezone
/// offset in hours.
pub fn local_date_time(utc: NaiveDateTime, timezone_hours: i32) -> (i32, i32) {
    let local = utc + ChronoDuration::hours(timezone_hours as i64);
    (
        days_since_2000(local.date()),
        tenth_ms_since_midnight(local),
    )
}

/// Local wire pair for "now".
pub fn now_local(timezone_hours: i32) -> (i32, i32) {
    local_date_time(Utc::now().naive_utc(), timezone_hours)
}

/// Parse a sample's extended-ISO UTC string into the local wire pair.
pub fn utc_str_to_local(utc: &str, timezone_hours: i32) -> Option<(i32, i32)> {
    let parsed = NaiveDateTime::parse_from_str(utc, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(utc, "%Y-%m-%dT%H:%M:%S"))
        .ok()?;
    Some(local_date_time(parsed, timezone_hours))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_day_is_one() {
        assert_eq!(
            days_since_2000(NaiveDate::from_ymd_opt(2000, 1, 1).unwrap()),
            1
        );
        assert_eq!(
            days_since_2000(NaiveDate::from_ymd_opt(2000, 1, 2).unwrap()),
            2
        );
    }

    #[test]
    fn midnight_units() {
        let t = NaiveDate::from_ymd_opt(2026, 8, 2)
            .unwrap()
            .and_hms_milli_opt(1, 2, 3, 400)
            .unwrap();
        // 1h2m3.4s = 3723.4 s = 37_234_000 x 0.1ms
        assert_eq!(tenth_ms_since_midnight(t), 37_234_000);
    }

    #[test]
    fn timezone_shift_crosses_midnight() {
        let utc = NaiveDate::from_ymd_opt(2026, 8, 2)
            .unwrap()
            .and_hms_opt(22, 0, 0)
            .unwrap();
        let (d_utc, _) = local_date_time(utc, 0);
        let (d_bj, t_bj) = local_date_time(utc, 8);
        assert_eq!(d_bj, d_utc + 1);
        assert_eq!(t_bj, 6 * 3600 * 10_000);
    }

    #[test]
    fn sentinel_frame_is_single_packet() {
        let frame = TelemetryFrame::sentinel(0x5000_1001, 100, 0);
        let mut pno = 0;
        let packets = frame.encode_packets(&mut pno);
        assert_eq!(packets.len(), 1);
        assert_eq!(pno, 1);

        let decoded = decode_packet(&packets[0]).unwrap();
        assert_eq!(decoded.ver, PROTOCOL_VERSION);
        assert_eq!(decoded.bid, BLOCK_ID);
        assert_eq!(decoded.pno, 1);
        assert_eq!(decoded.len as usize, PREFIX_LEN);
        assert_eq!(decoded.wea_state, u8::MAX);
        assert_eq!(decoded.temp, i16::MAX);
        assert_eq!(decoded.humidity, u16::MAX);
        assert_eq!(decoded.sqm_bkmag, i16::MAX);
        assert_eq!(decoded.zone_count, 0);
        assert_eq!(decoded.pack_no, 1);
        assert_eq!(packets[0].len(), HEAD_LEN + PREFIX_LEN);
    }

    #[test]
    fn sharding_216_zones_into_three_packets() {
        let mut frame = TelemetryFrame::sentinel(1, 100, 0);
        frame.cloud_state = 0;
        frame.zones = (0..216).map(|i| (i * 10, 450, (i % 10) as i16)).collect();

        let mut pno = 0;
        let packets = frame.encode_packets(&mut pno);
        assert_eq!(packets.len(), 3);
        assert_eq!(pno, 3);

        for (i, packet) in packets.iter().enumerate() {
            let d = decode_packet(packet).unwrap();
            assert_eq!(d.pack_count, 3);
            assert_eq!(d.pack_no, i as u16 + 1);
            assert_eq!(d.zone_count, 72);
            assert_eq!(d.len as usize, PREFIX_LEN + 72 * ZONE_LEN);
            assert_eq!(packet.len(), HEAD_LEN + PREFIX_LEN + 72 * ZONE_LEN);
        }
        // zone payloads concatenate back to the original list
        let all: Vec<_> = packets
            .iter()
            .flat_map(|p| decode_packet(p).unwrap().zones)
            .collect();
        assert_eq!(all.len(), 216);
        assert_eq!(all[0], (0, 450, 0));
        assert_eq!(all[215], (2150, 450, 5));
    }

    #[test]
    fn uneven_sharding_has_short_last_packet() {
        let mut frame = TelemetryFrame::sentinel(1, 100, 0);
        frame.cloud_state = 0;
        frame.zones = (0..100).map(|i| (i, i, 0i16)).collect();

        let mut pno = 10;
        let packets = frame.encode_packets(&mut pno);
        assert_eq!(packets.len(), 2);
        let last = decode_packet(&packets[1]).unwrap();
        assert_eq!(last.zone_count, 28);
        assert_eq!(last.pack_no, 2);
        assert_eq!(last.pno, 12);
    }

    #[test]
    fn dead_cloud_channel_suppresses_zones() {
        let mut frame = TelemetryFrame::sentinel(1, 100, 0);
        frame.cloud_state = 2;
        frame.zones = (0..50).map(|i| (i, i, 1i16)).collect();
        let mut pno = 0;
        let packets = frame.encode_packets(&mut pno);
        assert_eq!(packets.len(), 1);
        assert_eq!(decode_packet(&packets[0]).unwrap().zone_count, 0);
    }
}
