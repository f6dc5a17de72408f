//! Outbound products: the binary telemetry uplink, the focus-control
//! protocol and the best-effort WEA JSON mirror.

pub mod focus_proto;
pub mod publisher;
pub mod wea_json;
pub mod wire;

pub use focus_proto::FocusMessage;
pub use publisher::{TelemetryPublisher, TelemetrySnapshot};
pub use wire::TelemetryFrame;
