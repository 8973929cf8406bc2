use skylink_proto::telemetry::TelemetryUpdate;

use crate::axes::AxisVector;
use crate::error::FcError;

/// A live connection to the flight controller. Every call is a single
/// bounded write or a non-blocking read.
pub trait VehicleTransport: Send {
    fn send_manual_control(&mut self, axes: AxisVector) -> Result<(), FcError>;

    fn send_arm(&mut self, arm: bool) -> Result<(), FcError>;

    fn send_mode(&mut self, custom_mode: u32) -> Result<(), FcError>;

    /// Companion-computer heartbeat so the autopilot sees a live controller.
    fn send_heartbeat(&mut self) -> Result<(), FcError>;

    /// At most one recognised inbound report; `Ok(None)` when nothing
    /// recognisable is buffered.
    fn poll_telemetry(&mut self) -> Result<Option<TelemetryUpdate>, FcError>;
}

pub struct Connected {
    pub transport: Box<dyn VehicleTransport>,
    pub port: String,
    pub baud: u32,
}

/// Finds and handshakes a flight controller. Returns
/// `FcError::TransportAbsent` when no candidate answers in time.
pub trait VehicleConnector: Send {
    fn probe(&mut self) -> Result<Connected, FcError>;
}
