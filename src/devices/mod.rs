//! Sensor components: each owns its transport, its polling thread(s) and its
//! published sample snapshot.

pub mod camera;
pub mod cloudage;
pub mod sqm;
pub mod weather;

pub use camera::CloudCamera;
pub use cloudage::CloudageReader;
pub use sqm::SqmPoller;
pub use weather::WeatherStation;
