//! Sky-brightness sample.

use super::ChannelState;

/// Latest reading from the sky-quality meter.
#[derive(Debug, Clone)]
pub struct SkySample {
    /// UTC timestamp of the reply, extended ISO format
    pub utc: String,
    pub state: ChannelState,
    /// Sky background brightness, magnitudes per square arc-second
    pub mpsas: f64,
}

impl SkySample {
    pub fn offline() -> Self {
        Self {
            utc: String::new(),
            state: ChannelState::NotConnected,
            mpsas: 0.0,
        }
    }
}
