use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::FcError;
use crate::mav::FcLink;
use crate::transport::{Connected, VehicleConnector};
use crate::MavIds;

/// How long a candidate port gets to produce an autopilot heartbeat.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Device name prefixes that flight controllers show up under: USB CDC,
/// USB-serial adapters and the Jetson's on-board UARTs.
const DEV_PREFIXES: [&str; 3] = ["/dev/ttyACM", "/dev/ttyUSB", "/dev/ttyTHS"];

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub hb_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<(String, u32)>,
    pub probes: Vec<ProbeResult>,
}

#[derive(Debug, Clone)]
pub struct ProbePlan {
    pub candidate_devs: Vec<String>,
    pub candidate_bauds: Vec<u32>,
    pub ids: MavIds,
}

pub fn default_candidate_devs() -> Vec<String> {
    let mut devs: Vec<String> = tokio_serial::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default();
    devs.retain(|d| DEV_PREFIXES.iter().any(|p| d.starts_with(p)));
    devs.sort();
    if devs.is_empty() {
        devs = vec![
            "/dev/ttyACM0".into(),
            "/dev/ttyACM1".into(),
            "/dev/ttyUSB0".into(),
            "/dev/ttyUSB1".into(),
            "/dev/ttyTHS1".into(),
        ];
    }
    devs
}

pub fn default_candidate_bauds() -> Vec<u32> {
    vec![115200, 57600, 921600]
}

/// Tries every (device, baud) pair in order and keeps the first link that
/// answers with an autopilot heartbeat.
pub fn autodetect_fc(plan: &ProbePlan) -> (AutodetectResult, Option<FcLink>) {
    let mut probes = Vec::new();

    for dev in &plan.candidate_devs {
        for baud in &plan.candidate_bauds {
            let start = Instant::now();

            let note = match FcLink::open(dev, *baud, &plan.ids) {
                Ok(mut link) => match link.wait_heartbeat(HANDSHAKE_TIMEOUT) {
                    Ok(true) => {
                        probes.push(ProbeResult {
                            dev: dev.clone(),
                            baud: *baud,
                            hb_seen: true,
                            elapsed_ms: start.elapsed().as_millis() as u64,
                            note: "heartbeat".into(),
                        });
                        info!("fc autodetect: OK {} @ {}", dev, baud);
                        let res = AutodetectResult { chosen: Some((dev.clone(), *baud)), probes };
                        return (res, Some(link));
                    }
                    Ok(false) => "no heartbeat".to_string(),
                    Err(e) => format!("read failed: {}", e),
                },
                Err(e) => {
                    debug!("fc autodetect probe failed dev={} baud={} err={}", dev, baud, e);
                    format!("open failed: {}", e)
                }
            };

            probes.push(ProbeResult {
                dev: dev.clone(),
                baud: *baud,
                hb_seen: false,
                elapsed_ms: start.elapsed().as_millis() as u64,
                note,
            });
        }
    }

    (AutodetectResult { chosen: None, probes }, None)
}

/// Probes serial candidates on behalf of the control loop.
pub struct SerialConnector {
    plan: ProbePlan,
}

impl SerialConnector {
    pub fn new(plan: ProbePlan) -> Self {
        Self { plan }
    }
}

impl VehicleConnector for SerialConnector {
    fn probe(&mut self) -> Result<Connected, FcError> {
        let (res, link) = autodetect_fc(&self.plan);
        match (res.chosen, link) {
            (Some((port, baud)), Some(link)) => Ok(Connected { transport: Box::new(link), port, baud }),
            _ => {
                warn!("fc: no flight controller answered ({} probes)", res.probes.len());
                Err(FcError::TransportAbsent)
            }
        }
    }
}
