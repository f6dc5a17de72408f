//! Sample types shared between pollers, the camera pipeline and the
//! telemetry publisher.
//!
//! Every published sample is a plain value: producers replace their snapshot
//! under a short lock, consumers clone it out. Nothing here is shared
//! mutably across components.

mod cloud;
mod frame;
mod site;
mod sky;
mod weather;

pub use cloud::{CloudMap, CloudZone};
pub use frame::{Frame, StarMeasure};
pub use site::Site;
pub use sky::SkySample;
pub use weather::WeatherSample;

/// Liveness of one telemetry channel.
///
/// Transitions are owned by the producing component: a poller flips its own
/// channel to `NotConnected` when the connect phase fails, to `NoData` after
/// three consecutive failed cycles, and the cloud-map reader flips to `Stale`
/// when the exchange file stops updating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Ok,
    NotConnected,
    NoData,
    Stale,
}

impl ChannelState {
    /// Wire encoding used by the telemetry frame.
    ///
    /// `OFFLINE` (3) is assigned by the publisher when a component is not
    /// running at all; `Stale` shares the `NO_DATA` code.
    pub fn wire_code(self) -> u8 {
        match self {
            ChannelState::Ok => 0,
            ChannelState::NotConnected => 1,
            ChannelState::NoData => 2,
            ChannelState::Stale => 2,
        }
    }
}

/// Wire state for a channel whose component is not running.
pub const WIRE_STATE_OFFLINE: u8 = 3;

/// Phase of the observation day, derived from solar elevation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationPhase {
    Day,
    Twilight,
    Night,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_codes_match_protocol() {
        assert_eq!(ChannelState::Ok.wire_code(), 0);
        assert_eq!(ChannelState::NotConnected.wire_code(), 1);
        assert_eq!(ChannelState::NoData.wire_code(), 2);
        assert_eq!(ChannelState::Stale.wire_code(), 2);
        assert_eq!(WIRE_STATE_OFFLINE, 3);
    }
}
