//! Line-oriented command gateway: one JSON request per input line, replies
//! (if any) as one JSON object per output line.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use skylink_fc::control::ControlLoop;
use skylink_fc::error::FcError;
use skylink_proto::authority::AuthorityStatus;
use skylink_proto::command::{AdminCommand, GatewayRequest, PilotAction, PilotCommand};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// Period of the `run` status log line. Default 5 s.
    pub status_log_interval_s: Option<u64>,
}

impl GatewayConfig {
    pub fn status_log_interval(&self) -> Duration {
        Duration::from_secs(self.status_log_interval_s.unwrap_or(5).max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Status(AuthorityStatus),
    Error { error: String },
}

pub fn handle_line(control: &ControlLoop, line: &str) -> Option<Reply> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str::<GatewayRequest>(line) {
        Ok(GatewayRequest::Pilot(cmd)) => pilot(control, cmd),
        Ok(GatewayRequest::Admin(cmd)) => Some(Reply::Status(admin(control, cmd))),
        Err(e) => {
            warn!("gateway: discarding malformed line: {}", e);
            None
        }
    }
}

fn pilot(control: &ControlLoop, cmd: PilotCommand) -> Option<Reply> {
    match cmd {
        PilotCommand::Sticks { l, r } => {
            if let Err(e) = control.set_sticks(l.x, l.y, r.x, r.y) {
                debug!("gateway: stick frame discarded: {}", e);
            }
            None
        }
        PilotCommand::Action { action } => {
            let res = control.arm(action == PilotAction::Arm, false);
            res.err().map(|e: FcError| Reply::Error { error: e.to_string() })
        }
    }
}

/// Applies fields in a fixed order: controls, video, emergency, message.
fn admin(control: &ControlLoop, cmd: AdminCommand) -> AuthorityStatus {
    let guard = control.guard();
    if let Some(lock) = cmd.lock_controls {
        guard.set_controls(!lock);
    }
    if let Some(lock) = cmd.lock_video {
        guard.set_video(!lock);
    }
    if cmd.emergency == Some(true) {
        control.emergency_stop();
    }
    if let Some(text) = cmd.message {
        guard.set_message(text);
    }
    guard.status()
}

/// Serves requests until `input` reaches end of stream.
pub async fn serve<R, W>(control: Arc<ControlLoop>, input: R, mut output: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    while let Some(line) = lines.next_line().await.context("gateway read")? {
        // arm/disarm writes to the serial link
        let c = control.clone();
        let reply = tokio::task::spawn_blocking(move || handle_line(&c, &line))
            .await
            .context("gateway worker")?;
        if let Some(reply) = reply {
            let mut out = serde_json::to_string(&reply).context("encode reply")?;
            out.push('\n');
            output.write_all(out.as_bytes()).await.context("gateway write")?;
            output.flush().await.context("gateway flush")?;
        }
    }
    info!("gateway: input closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use skylink_fc::axes::AxisVector;
    use skylink_fc::control::ControlSettings;
    use skylink_fc::guard::AccessGuard;
    use skylink_fc::transport::{Connected, VehicleConnector};

    struct NoVehicle;

    impl VehicleConnector for NoVehicle {
        fn probe(&mut self) -> Result<Connected, FcError> {
            Err(FcError::TransportAbsent)
        }
    }

    fn control() -> Arc<ControlLoop> {
        Arc::new(ControlLoop::new(Arc::new(AccessGuard::new()), ControlSettings::default(), Box::new(NoVehicle)))
    }

    #[test]
    fn admin_lock_is_reported_back() {
        let c = control();
        let reply = handle_line(&c, r#"{"admin":{"lock_controls":true,"message":"hold"}}"#);
        assert_eq!(
            reply,
            Some(Reply::Status(AuthorityStatus {
                controls: false,
                video: true,
                emergency: false,
                message: "hold".into(),
            }))
        );
    }

    #[test]
    fn sticks_are_neutral_while_locked() {
        let c = control();
        handle_line(&c, r#"{"admin":{"lock_controls":true}}"#);
        assert_eq!(handle_line(&c, r#"{"pilot":{"l":{"x":1.0,"y":1.0},"r":{"x":1.0,"y":1.0}}}"#), None);
        assert_eq!(c.axis_target(), AxisVector::NEUTRAL);

        handle_line(&c, r#"{"admin":{"lock_controls":false}}"#);
        handle_line(&c, r#"{"pilot":{"l":{"x":0.5,"y":1.0},"r":{"x":0.0,"y":0.0}}}"#);
        assert_eq!(c.axis_target().yaw, 500);
        assert_eq!(c.axis_target().throttle, 1000);
    }

    #[test]
    fn pilot_arm_without_vehicle_reports_error() {
        let c = control();
        let reply = handle_line(&c, r#"{"pilot":{"action":"ARM"}}"#);
        assert!(matches!(reply, Some(Reply::Error { .. })));
    }

    #[test]
    fn pilot_arm_while_locked_is_refused() {
        let c = control();
        handle_line(&c, r#"{"admin":{"lock_controls":true}}"#);
        let Some(Reply::Error { error }) = handle_line(&c, r#"{"pilot":{"action":"ARM"}}"#) else {
            panic!("expected error reply");
        };
        assert!(error.contains("locked"), "{}", error);
    }

    #[test]
    fn emergency_latches_and_message_follows() {
        let c = control();
        let Some(Reply::Status(st)) = handle_line(&c, r#"{"admin":{"emergency":true}}"#) else {
            panic!("expected status");
        };
        assert!(st.emergency && !st.controls && !st.video);
        assert_eq!(st.message, "EMERGENCY STOP");

        let Some(Reply::Status(st)) = handle_line(&c, r#"{"admin":{"lock_controls":false,"message":"landing"}}"#) else {
            panic!("expected status");
        };
        assert!(st.emergency && !st.controls);
        assert_eq!(st.message, "landing");
    }

    #[test]
    fn malformed_and_blank_lines_are_ignored() {
        let c = control();
        assert_eq!(handle_line(&c, "not json"), None);
        assert_eq!(handle_line(&c, "   "), None);
        assert_eq!(handle_line(&c, r#"{"pilot":{"action":"FLIP"}}"#), None);
        assert!(c.guard().controls_allowed());
    }

    #[tokio::test]
    async fn serve_answers_admin_lines_only() {
        let c = control();
        let input = concat!(
            r#"{"pilot":{"l":{"x":0.0,"y":0.0},"r":{"x":0.0,"y":0.0}}}"#,
            "\n",
            r#"{"admin":{"lock_video":true}}"#,
            "\n",
        );
        let mut out = Vec::new();
        serve(c, input.as_bytes(), &mut out).await.unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        let v: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(v["video"], false);
        assert_eq!(v["controls"], true);
        assert_eq!(v["emergency"], false);
    }
}
