mod gateway;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info, warn};

use skylink_fc::autodetect::{autodetect_fc, SerialConnector};
use skylink_fc::control::{ControlLoop, ControlSettings};
use skylink_fc::doctor as fc_doctor;
use skylink_fc::guard::AccessGuard;
use skylink_fc::{ControlConfig, FcConfig};
use skylink_relay::{doctor as relay_doctor, RelayConfig};

use gateway::GatewayConfig;

#[derive(Debug, Parser)]
#[command(name = "skylink", version, about = "SkyLink - remote piloting core and vehicle relay")]
struct Cli {
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    /// Control loop with the JSON command gateway on stdin/stdout.
    Run,
    /// Vehicle-side serial <-> UDP relay.
    Relay,
    Fc { #[command(subcommand)] cmd: FcCmd },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
}

#[derive(Debug, serde::Deserialize)]
struct Config {
    fc: Option<FcConfig>,
    #[serde(default)]
    control: ControlConfig,
    relay: Option<RelayConfig>,
    #[serde(default)]
    gateway: GatewayConfig,
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli.config)?;

    match cli.cmd {
        Command::Doctor => doctor(&cfg)?,
        Command::Run => run(&cfg).await?,
        Command::Relay => relay(&cfg).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
    }
    Ok(())
}

fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    match &cfg.fc {
        Some(fc) => {
            fc_doctor::check_fc(fc)?;
            if fc.autodetect {
                info!("doctor: fc autodetect enabled (OK)");
            }
        }
        None => warn!("doctor: no [fc] section, `run` unavailable"),
    }
    fc_doctor::check_control(&cfg.control)?;

    match &cfg.relay {
        Some(r) => relay_doctor::check_relay(r)?,
        None => warn!("doctor: no [relay] section, `relay` unavailable"),
    }
    anyhow::ensure!(cfg.fc.is_some() || cfg.relay.is_some(), "config has neither [fc] nor [relay]");

    info!("doctor: OK");
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let fc = cfg.fc.as_ref().context("no [fc] config section")?;
            let plan = fc.probe_plan()?;
            let (res, _link) = tokio::task::spawn_blocking(move || autodetect_fc(&plan))
                .await
                .context("autodetect worker")?;
            if let Some((dev, baud)) = res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!("probe dev={} baud={} hb={} {}ms note={}", p.dev, p.baud, p.hb_seen, p.elapsed_ms, p.note);
            }
            Ok(())
        }
    }
}

async fn run(cfg: &Config) -> Result<()> {
    let fc = cfg.fc.as_ref().context("no [fc] config section")?;
    fc_doctor::check_control(&cfg.control)?;
    info!("run: starting");

    let guard = Arc::new(AccessGuard::new());
    let control = Arc::new(ControlLoop::new(
        guard,
        ControlSettings::from_config(fc, &cfg.control),
        Box::new(SerialConnector::new(fc.probe_plan()?)),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = control.clone().spawn(shutdown_rx);

    let gw_control = control.clone();
    let gw = tokio::spawn(async move {
        if let Err(e) = gateway::serve(gw_control, tokio::io::stdin(), tokio::io::stdout()).await {
            error!("gateway: {:#}", e);
        }
    });

    let mut status = tokio::time::interval(cfg.gateway.status_log_interval());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("install ctrl-c handler")?;
                info!("run: shutdown requested");
                break;
            }
            _ = status.tick() => log_status(&control),
        }
    }

    let _ = shutdown_tx.send(true);
    worker.await.context("control loop join")?;
    gw.abort();
    info!("run: stopped");
    Ok(())
}

fn log_status(control: &ControlLoop) {
    let auth = control.guard().status();
    let link = control.link_status();
    let tel = control.telemetry();
    let axes = control.axis_current();
    info!(
        "status: link={:?} port={:?} baud={:?} hb_age={:?} armed={} batt={:?}V/{:?}A/{:?}% alt={:?}m \
         axes=[x={} y={} z={} r={}] controls={} video={} emergency={} msg={:?}",
        link.state,
        link.port,
        link.baud,
        link.hb_age(),
        tel.armed,
        tel.battery_voltage,
        tel.battery_current,
        tel.battery_percent,
        tel.altitude_m,
        axes.forward,
        axes.lateral,
        axes.throttle,
        axes.yaw,
        auth.controls,
        auth.video,
        auth.emergency,
        auth.message,
    );
}

async fn relay(cfg: &Config) -> Result<()> {
    let rc = cfg.relay.as_ref().context("no [relay] config section")?;

    // a startup failure ends the process with a nonzero status
    let handle = skylink_relay::start(rc).await.context("relay startup")?;
    let session = handle.session();
    info!(
        "relay: {} bridging {} <-> {}",
        session.vehicle_id, session.local_transport, session.remote_endpoint
    );

    tokio::signal::ctrl_c().await.context("install ctrl-c handler")?;
    info!("relay: shutdown requested");
    handle.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = include_str!("../../../config/skylink.toml");

    #[test]
    fn sample_config_passes_doctor() {
        let cfg: Config = toml::from_str(SAMPLE).unwrap();
        assert!(cfg.fc.as_ref().unwrap().autodetect);
        assert_eq!(cfg.relay.as_ref().unwrap().server_port, 5761);
        doctor(&cfg).unwrap();
    }

    #[test]
    fn fc_section_is_optional_on_relay_hosts() {
        let cfg: Config = toml::from_str(
            r#"
            [relay]
            vehicle_id = "rover-2"
            serial_dev = "/dev/ttyUSB0"
            baud = 57600
            server_host = "10.0.0.5"
            server_port = 5761
            "#,
        )
        .unwrap();
        assert!(cfg.fc.is_none());
        assert_eq!(cfg.control.smoothing_factor, None);
        doctor(&cfg).unwrap();
    }

    #[test]
    fn doctor_rejects_bad_vehicle_id() {
        let cfg: Config = toml::from_str(
            r#"
            [relay]
            vehicle_id = "drone:1"
            serial_dev = "/dev/ttyUSB0"
            baud = 57600
            server_host = "10.0.0.5"
            server_port = 5761
            "#,
        )
        .unwrap();
        assert!(doctor(&cfg).is_err());
    }
}
