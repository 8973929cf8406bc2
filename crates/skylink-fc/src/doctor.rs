use anyhow::Result;

use crate::{ControlConfig, FcConfig};

pub fn check_fc(fc: &FcConfig) -> Result<()> {
    if !fc.autodetect {
        anyhow::ensure!(fc.serial_dev.as_ref().map(|s| !s.is_empty()).unwrap_or(false), "fc.serial_dev missing");
        anyhow::ensure!(fc.baud.unwrap_or(0) > 0, "fc.baud invalid");
    }
    if let Some(bauds) = &fc.candidate_bauds {
        anyhow::ensure!(!bauds.is_empty() && bauds.iter().all(|b| *b > 0), "fc.candidate_bauds invalid");
    }
    anyhow::ensure!(fc.sys_id != fc.target_sys, "fc.sys_id must differ from fc.target_sys");
    if let Some(hz) = fc.send_heartbeat_hz {
        anyhow::ensure!(hz.is_finite() && hz > 0.0, "fc.send_heartbeat_hz must be > 0");
    }
    Ok(())
}

pub fn check_control(control: &ControlConfig) -> Result<()> {
    if let Some(k) = control.smoothing_factor {
        anyhow::ensure!(k > 0.0 && k <= 1.0, "control.smoothing_factor must be in (0, 1], got {}", k);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fc() -> FcConfig {
        FcConfig {
            autodetect: true,
            serial_dev: None,
            baud: None,
            candidate_devs: None,
            candidate_bauds: None,
            sys_id: 255,
            comp_id: 190,
            target_sys: 1,
            target_comp: 1,
            send_heartbeat_hz: None,
            arm_custom_mode: None,
        }
    }

    #[test]
    fn autodetect_needs_no_fixed_port() {
        assert!(check_fc(&fc()).is_ok());
    }

    #[test]
    fn fixed_port_requires_dev_and_baud() {
        let mut cfg = fc();
        cfg.autodetect = false;
        assert!(check_fc(&cfg).is_err());
        cfg.serial_dev = Some("/dev/ttyACM0".into());
        assert!(check_fc(&cfg).is_err());
        cfg.baud = Some(115200);
        assert!(check_fc(&cfg).is_ok());
    }

    #[test]
    fn smoothing_factor_bounds() {
        let ok = |k| check_control(&ControlConfig { smoothing_factor: Some(k) }).is_ok();
        assert!(ok(0.08));
        assert!(ok(1.0));
        assert!(!ok(0.0));
        assert!(!ok(1.2));
        assert!(!ok(f64::NAN));
        assert!(check_control(&ControlConfig::default()).is_ok());
    }
}
