//! Weather-station sample.

use super::ChannelState;

/// Latest reading from the combined T/H/P + wind station and the
/// independent rain detector.
#[derive(Debug, Clone)]
pub struct WeatherSample {
    /// UTC timestamp of the producing cycle, extended ISO format
    pub utc: String,
    pub state: ChannelState,
    /// Air temperature, degrees Celsius
    pub temperature: f64,
    /// Relative humidity, percent
    pub humidity: f64,
    /// Air pressure, hectopascal
    pub pressure: f64,
    /// Wind speed, meters per second
    pub wind_speed: f64,
    /// Wind direction, degrees, 0 = north
    pub wind_dir: u16,
    /// 1 = raining, 0 = dry
    pub rain: u16,
    /// Liveness of the independent rain channel
    pub rain_state: ChannelState,
}

impl WeatherSample {
    pub fn offline() -> Self {
        Self {
            utc: String::new(),
            state: ChannelState::NotConnected,
            temperature: 0.0,
            humidity: 0.0,
            pressure: 0.0,
            wind_speed: 0.0,
            wind_dir: 0,
            rain: 0,
            rain_state: ChannelState::NotConnected,
        }
    }

    /// Dew point from the 100 − 5·(T − Td) approximation.
    pub fn dew_point(&self) -> f64 {
        self.temperature - (100.0 - self.humidity) / 5.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dew_point_approximation() {
        let mut s = WeatherSample::offline();
        s.temperature = 20.0;
        s.humidity = 100.0;
        assert!((s.dew_point() - 20.0).abs() < 1e-9);
        s.humidity = 50.0;
        assert!((s.dew_point() - 10.0).abs() < 1e-9);
    }
}
