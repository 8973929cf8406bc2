use serde::Serialize;

use crate::error::FcError;

/// Full deflection on the pitch/roll/yaw axes, in MANUAL_CONTROL units.
pub const AXIS_LIMIT: i16 = 1000;

/// Throttle commands below this are clamped to idle so stick noise around
/// the bottom detent can't start a climb.
pub const THROTTLE_DEADBAND: i16 = 100;

/// One four-axis command in flight-controller units:
/// forward/lateral/yaw in -1000..=1000, throttle in 0..=1000.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AxisVector {
    pub forward: i16,
    pub lateral: i16,
    pub throttle: i16,
    pub yaw: i16,
}

impl AxisVector {
    pub const NEUTRAL: AxisVector = AxisVector { forward: 0, lateral: 0, throttle: 0, yaw: 0 };

    /// Maps two gamepad sticks (each axis in [-1, 1]) onto vehicle axes.
    /// Left stick: x = yaw, y = throttle. Right stick: x = lateral, y = forward.
    pub fn from_sticks(left_x: f32, left_y: f32, right_x: f32, right_y: f32) -> Result<Self, FcError> {
        for (name, v) in [("left_x", left_x), ("left_y", left_y), ("right_x", right_x), ("right_y", right_y)] {
            if !v.is_finite() || !(-1.0..=1.0).contains(&v) {
                return Err(FcError::MalformedInput(format!("{} out of range: {}", name, v)));
            }
        }

        let scale = AXIS_LIMIT as f32;
        let raw_throttle = (left_y + 1.0) * scale / 2.0;
        let throttle = if raw_throttle < THROTTLE_DEADBAND as f32 { 0 } else { raw_throttle as i16 };

        Ok(Self {
            forward: (right_y * scale) as i16,
            lateral: (right_x * scale) as i16,
            throttle,
            yaw: (left_x * scale) as i16,
        })
    }
}

/// The value actually transmitted, kept in floating point between ticks so
/// small per-tick steps don't get lost to rounding.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SmoothedAxes {
    pub forward: f64,
    pub lateral: f64,
    pub throttle: f64,
    pub yaw: f64,
}

impl SmoothedAxes {
    /// First-order exponential smoothing: close `factor` of the remaining gap.
    pub fn advance_toward(&mut self, target: &AxisVector, factor: f64) {
        self.forward += (f64::from(target.forward) - self.forward) * factor;
        self.lateral += (f64::from(target.lateral) - self.lateral) * factor;
        self.throttle += (f64::from(target.throttle) - self.throttle) * factor;
        self.yaw += (f64::from(target.yaw) - self.yaw) * factor;
    }

    pub fn zero(&mut self) {
        *self = SmoothedAxes::default();
    }

    pub fn to_command(&self) -> AxisVector {
        let limit = f64::from(AXIS_LIMIT);
        AxisVector {
            forward: self.forward.round().clamp(-limit, limit) as i16,
            lateral: self.lateral.round().clamp(-limit, limit) as i16,
            throttle: self.throttle.round().clamp(0.0, limit) as i16,
            yaw: self.yaw.round().clamp(-limit, limit) as i16,
        }
    }
}
