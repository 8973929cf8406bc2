use serde::Serialize;

/// Last-known vehicle telemetry. Advisory display data only: every field is
/// last-write-wins and nothing tracks staleness beyond `updated_unix_ms`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub battery_voltage: Option<f32>,
    pub battery_current: Option<f32>,
    pub battery_percent: Option<u8>,
    pub armed: bool,
    pub altitude_m: Option<f32>,
    pub updated_unix_ms: Option<i64>,
}

/// One recognised inbound flight-controller report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TelemetryUpdate {
    Battery {
        voltage: Option<f32>,
        current: Option<f32>,
        remaining: Option<u8>,
    },
    Armed(bool),
    Altitude(f32),
}

impl TelemetrySnapshot {
    pub fn apply(&mut self, update: TelemetryUpdate, now_unix_ms: i64) {
        match update {
            TelemetryUpdate::Battery { voltage, current, remaining } => {
                if voltage.is_some() { self.battery_voltage = voltage; }
                if current.is_some() { self.battery_current = current; }
                if remaining.is_some() { self.battery_percent = remaining; }
            }
            TelemetryUpdate::Armed(armed) => self.armed = armed,
            TelemetryUpdate::Altitude(m) => self.altitude_m = Some(m),
        }
        self.updated_unix_ms = Some(now_unix_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn battery_update_keeps_fields_the_report_lacks() {
        let mut t = TelemetrySnapshot::default();
        t.apply(TelemetryUpdate::Battery { voltage: Some(12.4), current: Some(3.1), remaining: Some(80) }, 1);
        t.apply(TelemetryUpdate::Battery { voltage: Some(12.2), current: None, remaining: None }, 2);
        assert_eq!(t.battery_voltage, Some(12.2));
        assert_eq!(t.battery_current, Some(3.1));
        assert_eq!(t.battery_percent, Some(80));
        assert_eq!(t.updated_unix_ms, Some(2));
    }

    #[test]
    fn armed_and_altitude_are_last_write_wins() {
        let mut t = TelemetrySnapshot::default();
        t.apply(TelemetryUpdate::Armed(true), 10);
        t.apply(TelemetryUpdate::Altitude(4.5), 11);
        t.apply(TelemetryUpdate::Armed(false), 12);
        assert!(!t.armed);
        assert_eq!(t.altitude_m, Some(4.5));
    }
}
