use std::io::{Cursor, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use mavlink::{
    common::{
        MavAutopilot, MavCmd, MavMessage, MavModeFlag, MavState, MavType, COMMAND_LONG_DATA,
        HEARTBEAT_DATA, MANUAL_CONTROL_DATA, SYS_STATUS_DATA,
    },
    peek_reader::PeekReader,
    MavHeader,
};
use skylink_proto::telemetry::TelemetryUpdate;
use tokio_serial::SerialPort;
use tracing::{debug, info};

use crate::axes::AxisVector;
use crate::error::FcError;
use crate::transport::VehicleTransport;
use crate::MavIds;

const STX_V1: u8 = 0xFE;
const STX_V2: u8 = 0xFD;
const SIGNATURE_LEN: usize = 13;

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const MAX_RX_BUF: usize = 4096;

/// param2 of COMPONENT_ARM_DISARM that makes ArduPilot skip its pre-arm
/// and in-flight disarm checks.
const ARM_FORCE_MAGIC: f32 = 21196.0;

pub struct FcLink {
    port: Box<dyn SerialPort>,
    hdr: MavHeader,
    target_sys: u8,
    target_comp: u8,
    rx_buf: Vec<u8>,
    seen_heartbeat: bool,
}

impl FcLink {
    pub fn open(dev: &str, baud: u32, ids: &MavIds) -> Result<Self, FcError> {
        let port = tokio_serial::new(dev, baud)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| FcError::io("open serial", e))?;
        debug!("fc: opened {} @ {}", dev, baud);

        Ok(Self {
            port,
            hdr: MavHeader { system_id: ids.sys_id, component_id: ids.comp_id, sequence: 0 },
            target_sys: ids.target_sys,
            target_comp: ids.target_comp,
            rx_buf: Vec::with_capacity(MAX_RX_BUF),
            seen_heartbeat: false,
        })
    }

    /// Pulls whatever the port has buffered and decodes at most one message.
    pub fn poll_once_nonblocking(&mut self) -> Result<Option<(MavHeader, MavMessage)>, FcError> {
        self.fill_rx()?;
        let next = take_message(&mut self.rx_buf);
        if let Some((_, msg)) = &next {
            if is_autopilot_heartbeat(msg) {
                self.seen_heartbeat = true;
            }
        }
        Ok(next)
    }

    /// Handshake: true once an autopilot heartbeat arrives within `timeout`.
    pub fn wait_heartbeat(&mut self, timeout: Duration) -> Result<bool, FcError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if self.poll_once_nonblocking()?.is_none() {
                std::thread::sleep(Duration::from_millis(25));
            }
            if self.seen_heartbeat {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn fill_rx(&mut self) -> Result<(), FcError> {
        let avail = self.port.bytes_to_read().map_err(|e| FcError::io("serial poll", e))? as usize;
        if avail == 0 {
            return Ok(());
        }
        let mut chunk = vec![0u8; avail.min(MAX_RX_BUF)];
        let n = match self.port.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::TimedOut => 0,
            Err(e) => return Err(FcError::io("serial read", e)),
        };
        self.rx_buf.extend_from_slice(&chunk[..n]);
        if self.rx_buf.len() > MAX_RX_BUF {
            let excess = self.rx_buf.len() - MAX_RX_BUF;
            self.rx_buf.drain(..excess);
        }
        Ok(())
    }

    fn command_long(&mut self, command: MavCmd, param1: f32, param2: f32) -> Result<(), FcError> {
        let cmd = COMMAND_LONG_DATA {
            target_system: self.target_sys,
            target_component: self.target_comp,
            command,
            confirmation: 0,
            param1,
            param2,
            param3: 0.0,
            param4: 0.0,
            param5: 0.0,
            param6: 0.0,
            param7: 0.0,
        };
        self.send(&MavMessage::COMMAND_LONG(cmd))
    }

    fn send(&mut self, msg: &MavMessage) -> Result<(), FcError> {
        self.hdr.sequence = self.hdr.sequence.wrapping_add(1);
        let mut frame = Vec::with_capacity(280);
        mavlink::write_v2_msg(&mut frame, self.hdr, msg).map_err(|e| {
            FcError::io("mavlink encode", std::io::Error::new(ErrorKind::InvalidData, format!("{:?}", e)))
        })?;
        self.port.write_all(&frame).map_err(|e| FcError::io("serial write", e))?;
        Ok(())
    }
}

impl VehicleTransport for FcLink {
    fn send_manual_control(&mut self, axes: AxisVector) -> Result<(), FcError> {
        let mc = MANUAL_CONTROL_DATA {
            target: self.target_sys,
            x: axes.forward,
            y: axes.lateral,
            z: axes.throttle,
            r: axes.yaw,
            buttons: 0,
            ..Default::default()
        };
        self.send(&MavMessage::MANUAL_CONTROL(mc))
    }

    fn send_arm(&mut self, arm: bool) -> Result<(), FcError> {
        info!("FC: sending {}", if arm { "ARM" } else { "DISARM" });
        self.command_long(
            MavCmd::MAV_CMD_COMPONENT_ARM_DISARM,
            if arm { 1.0 } else { 0.0 },
            ARM_FORCE_MAGIC,
        )
    }

    fn send_mode(&mut self, custom_mode: u32) -> Result<(), FcError> {
        info!("FC: sending DO_SET_MODE custom_mode={}", custom_mode);
        self.command_long(
            MavCmd::MAV_CMD_DO_SET_MODE,
            f32::from(MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED.bits()),
            custom_mode as f32,
        )
    }

    fn send_heartbeat(&mut self) -> Result<(), FcError> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_ONBOARD_CONTROLLER,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::MAV_MODE_FLAG_CUSTOM_MODE_ENABLED,
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(&MavMessage::HEARTBEAT(hb))
    }

    fn poll_telemetry(&mut self) -> Result<Option<TelemetryUpdate>, FcError> {
        Ok(self.poll_once_nonblocking()?.and_then(|(_, msg)| telemetry_from(&msg)))
    }
}

/// Maps the message kinds the operator display cares about.
pub fn telemetry_from(msg: &MavMessage) -> Option<TelemetryUpdate> {
    match msg {
        MavMessage::SYS_STATUS(status) => Some(battery_from(status)),
        MavMessage::HEARTBEAT(hb) if hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID => {
            Some(TelemetryUpdate::Armed(hb.base_mode.contains(MavModeFlag::MAV_MODE_FLAG_SAFETY_ARMED)))
        }
        // relative_alt is millimetres above home
        MavMessage::GLOBAL_POSITION_INT(pos) => Some(TelemetryUpdate::Altitude(pos.relative_alt as f32 / 1000.0)),
        _ => None,
    }
}

fn battery_from(status: &SYS_STATUS_DATA) -> TelemetryUpdate {
    // voltage in mV (u16::MAX = unknown), current in cA (-1 = unknown),
    // remaining in percent (-1 = unknown)
    let voltage = (status.voltage_battery != u16::MAX).then(|| f32::from(status.voltage_battery) / 1000.0);
    let current = (status.current_battery != -1).then(|| f32::from(status.current_battery) / 100.0);
    let remaining = (0..=100)
        .contains(&status.battery_remaining)
        .then(|| status.battery_remaining as u8);
    TelemetryUpdate::Battery { voltage, current, remaining }
}

fn is_autopilot_heartbeat(msg: &MavMessage) -> bool {
    matches!(msg, MavMessage::HEARTBEAT(hb) if hb.autopilot != MavAutopilot::MAV_AUTOPILOT_INVALID)
}

/// Length of the frame at the head of `buf`, after discarding any bytes in
/// front of the first start marker. `None` until the whole frame is buffered.
fn frame_len(buf: &mut Vec<u8>) -> Option<usize> {
    let Some(pos) = buf.iter().position(|&b| b == STX_V2 || b == STX_V1) else {
        buf.clear();
        return None;
    };
    if pos > 0 {
        buf.drain(..pos);
    }
    if buf.len() < 3 {
        return None;
    }

    let payload_len = buf[1] as usize;
    let size = if buf[0] == STX_V2 {
        let base = 12 + payload_len;
        if buf[2] & 0x01 != 0 { base + SIGNATURE_LEN } else { base }
    } else {
        8 + payload_len
    };
    (buf.len() >= size).then_some(size)
}

/// Decodes the next complete message, resynchronising byte by byte past
/// anything that fails to parse.
fn take_message(buf: &mut Vec<u8>) -> Option<(MavHeader, MavMessage)> {
    loop {
        let size = frame_len(buf)?;
        let frame = &buf[..size];
        let mut reader = PeekReader::new(Cursor::new(frame));
        let decoded = if frame[0] == STX_V2 {
            mavlink::read_v2_msg::<MavMessage, _>(&mut reader)
        } else {
            mavlink::read_v1_msg::<MavMessage, _>(&mut reader)
        };
        match decoded {
            Ok(msg) => {
                buf.drain(..size);
                return Some(msg);
            }
            Err(_) => {
                buf.drain(..1);
            }
        }
    }
}
