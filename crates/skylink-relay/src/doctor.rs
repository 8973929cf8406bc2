use anyhow::Result;

use crate::frame::VehicleId;
use crate::RelayConfig;

pub fn check_relay(cfg: &RelayConfig) -> Result<()> {
    VehicleId::parse(&cfg.vehicle_id)?;
    anyhow::ensure!(!cfg.serial_dev.is_empty(), "relay.serial_dev missing");
    anyhow::ensure!(cfg.baud > 0, "relay.baud invalid");
    anyhow::ensure!(!cfg.server_host.is_empty(), "relay.server_host missing");
    anyhow::ensure!(cfg.server_port > 0, "relay.server_port invalid");
    Ok(())
}
