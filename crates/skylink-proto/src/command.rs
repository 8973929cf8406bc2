use serde::{Deserialize, Serialize};

/// A single gateway request line. Exactly one of the two roles is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayRequest {
    Pilot(PilotCommand),
    Admin(AdminCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stick {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PilotAction {
    Arm,
    Disarm,
}

/// Pilot console frame: either an arm/disarm action or both stick positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PilotCommand {
    Action { action: PilotAction },
    Sticks { l: Stick, r: Stick },
}

/// Admin console frame. Absent fields leave the corresponding state untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminCommand {
    #[serde(default)]
    pub lock_controls: Option<bool>,
    #[serde(default)]
    pub lock_video: Option<bool>,
    #[serde(default)]
    pub emergency: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
}
