//! Operator stick input to vehicle commands.
//!
//! One blocking worker calls [`ControlLoop::tick`] every [`TICK_PERIOD`]. It
//! is the only writer of the smoothed axes, the vehicle link state and the
//! telemetry snapshot. Request handlers call [`ControlLoop::set_sticks`] and
//! [`ControlLoop::arm`] from their own threads; the axis mutex they share
//! with the worker is never held across I/O. Lock order is link, then axes.

use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use skylink_proto::telemetry::{TelemetrySnapshot, TelemetryUpdate};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::axes::{AxisVector, SmoothedAxes};
use crate::error::{FcError, Recovery};
use crate::guard::AccessGuard;
use crate::lock;
use crate::schedule::IntervalGate;
use crate::state::{LinkState, LinkStatus};
use crate::transport::{Connected, VehicleConnector, VehicleTransport};

pub const TICK_PERIOD: Duration = Duration::from_millis(20);
pub const REPROBE_INTERVAL: Duration = Duration::from_secs(2);
pub const DEFAULT_SMOOTHING_FACTOR: f64 = 0.08;
pub const DEFAULT_ARM_CUSTOM_MODE: u32 = 1;

#[derive(Debug, Clone, Copy)]
pub struct ControlSettings {
    pub smoothing_factor: f64,
    pub arm_custom_mode: u32,
    pub heartbeat_interval: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            smoothing_factor: DEFAULT_SMOOTHING_FACTOR,
            arm_custom_mode: DEFAULT_ARM_CUSTOM_MODE,
            heartbeat_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
struct Axes {
    target: AxisVector,
    current: SmoothedAxes,
}

#[derive(Default)]
struct VehicleLink {
    status: LinkStatus,
    transport: Option<Box<dyn VehicleTransport>>,
}

impl VehicleLink {
    fn install(&mut self, c: Connected) {
        self.status = LinkStatus {
            state: LinkState::Connected,
            port: Some(c.port),
            baud: Some(c.baud),
            last_heartbeat: None,
        };
        self.transport = Some(c.transport);
    }

    fn demote(&mut self, err: &FcError) {
        warn!("fc: link lost ({}); back to probing", err);
        self.transport = None;
        self.status.state = LinkState::Disconnected;
    }

    fn recover(&mut self, err: &FcError) {
        match err.recovery() {
            Recovery::Demote => self.demote(err),
            Recovery::Reprobe => {
                debug!("fc: {}; retry in {:?}", err, REPROBE_INTERVAL);
                self.transport = None;
                self.status.state = LinkState::Disconnected;
            }
            Recovery::Discard => debug!("fc: discarded: {}", err),
        }
    }
}

/// State only the tick worker touches.
struct Worker {
    connector: Box<dyn VehicleConnector>,
    reprobe: IntervalGate,
    heartbeat: IntervalGate,
}

pub struct ControlLoop {
    guard: Arc<AccessGuard>,
    settings: ControlSettings,
    axes: Mutex<Axes>,
    link: Mutex<VehicleLink>,
    telemetry: RwLock<TelemetrySnapshot>,
    worker: Mutex<Worker>,
}

impl ControlLoop {
    pub fn new(guard: Arc<AccessGuard>, settings: ControlSettings, connector: Box<dyn VehicleConnector>) -> Self {
        Self {
            guard,
            worker: Mutex::new(Worker {
                connector,
                reprobe: IntervalGate::new(REPROBE_INTERVAL),
                heartbeat: IntervalGate::new(settings.heartbeat_interval),
            }),
            settings,
            axes: Mutex::new(Axes::default()),
            link: Mutex::new(VehicleLink::default()),
            telemetry: RwLock::new(TelemetrySnapshot::default()),
        }
    }

    pub fn guard(&self) -> &Arc<AccessGuard> {
        &self.guard
    }

    /// Records operator intent. With pilot controls locked the target is
    /// forced to neutral whatever the input.
    pub fn set_sticks(&self, left_x: f32, left_y: f32, right_x: f32, right_y: f32) -> Result<(), FcError> {
        if !self.guard.controls_allowed() {
            lock(&self.axes).target = AxisVector::NEUTRAL;
            return Ok(());
        }
        let target = AxisVector::from_sticks(left_x, left_y, right_x, right_y)?;
        let mut axes = lock(&self.axes);
        axes.target = if self.guard.controls_allowed() { target } else { AxisVector::NEUTRAL };
        Ok(())
    }

    /// Arms or disarms. Pilot requests are refused while controls are
    /// locked; administrator requests always go through.
    ///
    /// Arming zeroes both throttle values before the ARM write, inside the
    /// same link critical section the tick uses to compute and send.
    pub fn arm(&self, should_arm: bool, is_administrator: bool) -> Result<(), FcError> {
        let verb = if should_arm { "ARM" } else { "DISARM" };
        if !is_administrator && !self.guard.controls_allowed() {
            warn!("fc: pilot {} blocked by administrator lock", verb);
            return Err(FcError::Unauthorized("pilot controls locked by administrator"));
        }

        let mut link = lock(&self.link);
        let Some(transport) = link.transport.as_mut() else {
            debug!("fc: {} ignored, no vehicle link", verb);
            return Err(FcError::TransportAbsent);
        };

        if should_arm {
            let mut axes = lock(&self.axes);
            axes.target.throttle = 0;
            axes.current.throttle = 0.0;
        }

        let mode = self.settings.arm_custom_mode;
        let sent = transport
            .send_arm(should_arm)
            .and_then(|()| if should_arm { transport.send_mode(mode) } else { Ok(()) });
        if let Err(e) = sent {
            link.recover(&e);
            return Err(e);
        }
        drop(link);

        info!("fc: {} sent (admin={})", verb, is_administrator);
        Ok(())
    }

    /// Administrator emergency stop: disarm first, then latch the guard.
    pub fn emergency_stop(&self) {
        self.guard.trigger_emergency(|| {
            if let Err(e) = self.arm(false, true) {
                warn!("fc: emergency disarm not delivered: {}", e);
            }
        });
    }

    /// One control period: re-probe if due, service the link, advance the
    /// smoothed axes and transmit them.
    pub fn tick(&self, now: Instant) {
        let mut worker = lock(&self.worker);

        if self.link_state() != LinkState::Connected {
            self.try_connect(&mut worker, now);
        }
        self.service_link(&mut worker, now);
        self.advance_and_transmit();
    }

    /// Runs [`tick`](Self::tick) on a blocking worker until `shutdown`
    /// turns true or its sender goes away.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::task::spawn_blocking(move || {
            info!("control loop: started ({} ms tick)", TICK_PERIOD.as_millis());
            let mut next = Instant::now();
            while !*shutdown.borrow() && shutdown.has_changed().is_ok() {
                self.tick(Instant::now());
                next += TICK_PERIOD;
                let after = Instant::now();
                if next > after {
                    std::thread::sleep(next - after);
                } else {
                    next = after;
                }
            }
            info!("control loop: stopped");
        })
    }

    pub fn axis_target(&self) -> AxisVector {
        lock(&self.axes).target
    }

    pub fn axis_current(&self) -> AxisVector {
        lock(&self.axes).current.to_command()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn link_status(&self) -> LinkStatus {
        lock(&self.link).status.clone()
    }

    pub fn link_state(&self) -> LinkState {
        lock(&self.link).status.state
    }

    fn try_connect(&self, worker: &mut Worker, now: Instant) {
        if !worker.reprobe.due(now) {
            return;
        }
        lock(&self.link).status.state = LinkState::Searching;

        // probing blocks for the handshake; the link mutex stays free meanwhile
        let started = Instant::now();
        let probed = worker.connector.probe();
        // the re-probe interval counts from the end of the probe
        worker.reprobe.stamp(now + started.elapsed());

        let mut link = lock(&self.link);
        match probed {
            Ok(connected) => {
                info!("fc: connected {} @ {}", connected.port, connected.baud);
                link.install(connected);
                worker.heartbeat.reset();
                if self.guard.emergency_locked() {
                    Self::disarm_latched(&mut link);
                }
            }
            Err(e) => link.recover(&e),
        }
    }

    /// A vehicle found while the emergency stop is latched is disarmed before
    /// anything else is sent to it.
    fn disarm_latched(link: &mut VehicleLink) {
        let Some(transport) = link.transport.as_mut() else { return };
        warn!("fc: emergency stop latched; disarming reconnected vehicle");
        if let Err(e) = transport.send_arm(false) {
            link.recover(&e);
        }
    }

    fn service_link(&self, worker: &mut Worker, now: Instant) {
        let mut link = lock(&self.link);
        let Some(transport) = link.transport.as_mut() else { return };

        let mut result = Ok(None);
        if worker.heartbeat.ready(now) {
            result = transport.send_heartbeat().map(|_| None);
        }
        if result.is_ok() {
            result = transport.poll_telemetry();
        }

        match result {
            Ok(Some(update)) => {
                if matches!(update, TelemetryUpdate::Armed(_)) {
                    link.status.last_heartbeat = Some(now);
                }
                drop(link);
                self.telemetry
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .apply(update, unix_ms());
            }
            Ok(None) => {}
            Err(e) => link.recover(&e),
        }
    }

    fn advance_axes(&self) -> AxisVector {
        let mut axes = lock(&self.axes);
        if self.guard.emergency_locked() {
            axes.current.zero();
        } else {
            if !self.guard.controls_allowed() {
                axes.target = AxisVector::NEUTRAL;
            }
            let target = axes.target;
            axes.current.advance_toward(&target, self.settings.smoothing_factor);
        }
        axes.current.to_command()
    }

    /// Computes and sends the command while holding the link, so an `arm`
    /// cannot land between the two.
    fn advance_and_transmit(&self) {
        let mut link = lock(&self.link);
        let command = self.advance_axes();
        let Some(transport) = link.transport.as_mut() else { return };
        if let Err(e) = transport.send_manual_control(command) {
            link.recover(&e);
        }
    }
}

fn unix_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}
