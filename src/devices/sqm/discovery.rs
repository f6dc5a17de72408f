//! LAN discovery for sky-quality meters.
//!
//! The meter's ethernet bridge answers a broadcast probe on port 30718 with
//! a record carrying its MAC address; replies are collected for one second.

use crate::error::Result;
use std::net::UdpSocket;
use std::time::{Duration, Instant};

const DISCOVERY_PORT: u16 = 30718;
const PROBE: [u8; 4] = [0x00, 0x00, 0x00, 0xF6];
const REPLY_MAGIC: [u8; 4] = [0x00, 0x00, 0x00, 0xF7];
const COLLECT_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SqmUnit {
    pub ip: String,
    pub mac: String,
}

/// Broadcast the probe and collect responders for one second.
pub fn discover() -> Result<Vec<SqmUnit>> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;
    socket.send_to(&PROBE, ("255.255.255.255", DISCOVERY_PORT))?;

    let mut units = Vec::new();
    let deadline = Instant::now() + COLLECT_WINDOW;
    let mut buf = [0u8; 100];
    while Instant::now() < deadline {
        match socket.recv_from(&mut buf) {
            Ok((bytes, peer)) if bytes >= 30 && buf[..4] == REPLY_MAGIC => {
                let unit = SqmUnit {
                    ip: peer.ip().to_string(),
                    mac: format_mac(&buf[24..30]),
                };
                log::info!("SQM: found [{}, {}]", unit.ip, unit.mac);
                units.push(unit);
            }
            Ok(_) => {}
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(units)
}

fn format_mac(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}
