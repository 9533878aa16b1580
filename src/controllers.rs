use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::info;

use crate::clock::SimClock;
use crate::config::ScenarioConfig;
use crate::queue::{Sender, StateUpdate};
use crate::state::{AtomicF64, SharedState};
use crate::Result;

/// Integral accumulator clamp for the pitch PID
const PITCH_INTEGRAL_LIMIT: f64 = 10.0;
/// Pitch controller output saturation
const PITCH_OUTPUT_LIMIT: f64 = 1.0;

/// The five control laws
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ControlKind {
    /// Ramp the throttle up at a fixed rate
    ThrottleInc,
    /// Ramp the throttle down at a fixed rate
    ThrottleDec,
    /// Ramp the brake up at a fixed rate
    Brake,
    /// Proportional speed hold on the runway
    Cruise,
    /// PID pitch-angle hold
    PitchHold,
}

impl ControlKind {
    /// The roster name of the controller running this law
    pub fn name(self) -> &'static str {
        match self {
            ControlKind::ThrottleInc => "throttle_inc",
            ControlKind::ThrottleDec => "throttle_dec",
            ControlKind::Brake => "brake",
            ControlKind::Cruise => "cruise_runway",
            ControlKind::PitchHold => "pitch_hold",
        }
    }
}

/// Per-controller rate/gain parameters, copied out of [`ScenarioConfig`]
#[derive(Debug, Clone, Copy)]
pub struct ControlRates {
    /// Throttle ramp-up rate [1/s]
    pub throttle_increase_rate: f64,
    /// Throttle ramp-down rate [1/s]
    pub throttle_decrease_rate: f64,
    /// Brake application rate [1/s]
    pub brake_rate: f64,
    /// Cruise proportional gain
    pub cruise_gain: f64,
}

impl From<&ScenarioConfig> for ControlRates {
    fn from(cfg: &ScenarioConfig) -> Self {
        Self {
            throttle_increase_rate: cfg.throttle_increase_rate,
            throttle_decrease_rate: cfg.throttle_decrease_rate,
            brake_rate: cfg.brake_rate,
            cruise_gain: cfg.cruise_gain,
        }
    }
}

impl Default for ControlRates {
    fn default() -> Self {
        (&ScenarioConfig::default()).into()
    }
}

/// PID gains for the pitch-hold law
#[derive(Debug, Clone, Copy)]
pub struct PidGains {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
}

impl Default for PidGains {
    fn default() -> Self {
        Self {
            kp: 0.5,
            ki: 0.1,
            kd: 0.05,
        }
    }
}

/// Pitch PID internal state. The integral accumulator is clamped to ±10, the output is
/// saturated to ±1
#[derive(Debug, Default, Clone, Copy)]
pub struct PitchPid {
    gains: PidGains,
    integral: f64,
    prev_error: f64,
}

impl PitchPid {
    /// Creates a PID with the given gains
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: 0.0,
        }
    }
    /// Replaces the gains, keeping the accumulated state
    pub fn set_gains(&mut self, gains: PidGains) {
        self.gains = gains;
    }
    /// Zeroes the integral accumulator and the derivative memory
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
    }
    /// The current integral accumulator value
    pub fn integral(&self) -> f64 {
        self.integral
    }
    /// Computes one saturated PID output for the given error and time step
    pub fn compute(&mut self, error: f64, dt: f64) -> f64 {
        if dt <= 0.0 {
            return 0.0;
        }
        self.integral = (self.integral + self.gains.ki * error * dt)
            .clamp(-PITCH_INTEGRAL_LIMIT, PITCH_INTEGRAL_LIMIT);
        let derivative = self.gains.kd * (error - self.prev_error) / dt;
        self.prev_error = error;
        (self.gains.kp * error + self.integral + derivative)
            .clamp(-PITCH_OUTPUT_LIMIT, PITCH_OUTPUT_LIMIT)
    }
}

/// One tick of the throttle ramp-up law. Returns the new setting if it changed
pub fn throttle_inc_step(throttle: f64, rate: f64, dt: f64) -> Option<f64> {
    let next = (throttle + rate * dt).clamp(0.0, 1.0);
    (next != throttle).then_some(next)
}

/// One tick of the throttle ramp-down law
pub fn throttle_dec_step(throttle: f64, rate: f64, dt: f64) -> f64 {
    (throttle - rate * dt).max(0.0)
}

/// One tick of the brake ramp law
pub fn brake_step(brake: f64, rate: f64, dt: f64) -> f64 {
    (brake + rate * dt).min(1.0)
}

/// One tick of the cruise P law: returns (throttle, brake) commands
pub fn cruise_step(target_speed: f64, velocity: f64, gain: f64) -> (f64, f64) {
    let error = target_speed - velocity;
    if error > 0.0 {
        ((gain * error).clamp(0.0, 1.0), 0.0)
    } else {
        (0.0, (-gain * error).clamp(0.0, 1.0))
    }
}

/// A named, reference-counted control-loop worker.
///
/// `start` spawns a clock-registered worker thread; `stop` flags it down and joins it (the
/// join completes within one tick). The per-tick body runs only while the matching enable
/// flag in [`SharedState`] is true, but the worker reports step completion every tick it is
/// registered for.
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Clone for Controller {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ControllerInner {
    name: Arc<str>,
    kind: ControlKind,
    state: SharedState,
    clock: SimClock,
    tx: Sender<StateUpdate>,
    rates: ControlRates,
    active: AtomicBool,
    current: AtomicF64,
    pid: Mutex<PitchPid>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    /// Creates a controller for the given law. The worker is not started
    pub fn new(
        kind: ControlKind,
        state: SharedState,
        clock: SimClock,
        tx: Sender<StateUpdate>,
        rates: ControlRates,
    ) -> Self {
        Self {
            inner: ControllerInner {
                name: kind.name().into(),
                kind,
                state,
                clock,
                tx,
                rates,
                active: AtomicBool::new(false),
                current: AtomicF64::new(0.0),
                pid: Mutex::new(PitchPid::default()),
                handle: Mutex::new(None),
            }
            .into(),
        }
    }
    /// The controller roster name
    pub fn name(&self) -> &str {
        &self.inner.name
    }
    /// The control law this controller runs
    pub fn kind(&self) -> ControlKind {
        self.inner.kind
    }
    /// Is the per-tick body enabled (the matching flag in [`SharedState`])
    pub fn is_enabled(&self) -> bool {
        self.inner.is_enabled()
    }
    /// Is the worker thread started
    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }
    /// The last value the law produced
    pub fn current_value(&self) -> f64 {
        self.inner.current.load()
    }
    /// Replaces the pitch PID gains (meaningful for the pitch-hold law only)
    pub fn set_pid(&self, kp: f64, ki: f64, kd: f64) {
        self.inner.pid.lock().set_gains(PidGains { kp, ki, kd });
    }
    /// Zeroes the pitch PID accumulator
    pub fn reset_integral(&self) {
        self.inner.pid.lock().reset();
    }
    /// Spawns the worker thread and registers it with the clock. A no-op when already active
    pub fn start(&self) -> Result<()> {
        if self.inner.active.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut slot = self.inner.handle.lock();
        if let Some(handle) = slot.take() {
            // a worker left over from a stopped clock; it has exited
            let _ = handle.join();
        }
        let inner = self.inner.clone();
        let handle = thread::Builder::new()
            .name(format!("ctl-{}", self.inner.name))
            .spawn(move || inner.run())?;
        *slot = Some(handle);
        Ok(())
    }
    /// Flags the worker down and joins it. A no-op when not active
    pub fn stop(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.inner.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl ControllerInner {
    fn is_enabled(&self) -> bool {
        match self.kind {
            ControlKind::ThrottleInc | ControlKind::ThrottleDec => {
                self.state.is_throttle_control_enabled()
            }
            ControlKind::Brake => self.state.is_brake_control_enabled(),
            ControlKind::Cruise => self.state.is_cruise_control_enabled(),
            ControlKind::PitchHold => self.state.is_pitch_control_enabled(),
        }
    }
    fn run(self: Arc<Self>) {
        let _reg = self.clock.register();
        info!(controller = %self.name, "worker started");
        let mut step = 0;
        loop {
            step = self.clock.wait_for_next_step(step);
            if !self.clock.is_running() || !self.active.load(Ordering::Acquire) {
                break;
            }
            if self.is_enabled() {
                self.step_body();
            }
            self.clock.notify_step_completed();
        }
        info!(controller = %self.name, "worker stopped");
    }
    fn step_body(&self) {
        let dt = self.clock.time_step();
        match self.kind {
            ControlKind::ThrottleInc => {
                if let Some(next) =
                    throttle_inc_step(self.state.throttle(), self.rates.throttle_increase_rate, dt)
                {
                    let _ = self.tx.push(StateUpdate::Throttle(next));
                    self.current.store(next);
                }
            }
            ControlKind::ThrottleDec => {
                let next =
                    throttle_dec_step(self.state.throttle(), self.rates.throttle_decrease_rate, dt);
                let _ = self.tx.push(StateUpdate::Throttle(next));
                self.current.store(next);
            }
            ControlKind::Brake => {
                let next = brake_step(self.state.brake(), self.rates.brake_rate, dt);
                self.state.set_brake(next);
                self.current.store(next);
            }
            ControlKind::Cruise => {
                let (throttle, brake) = cruise_step(
                    self.state.target_speed(),
                    self.state.velocity(),
                    self.rates.cruise_gain,
                );
                let _ = self.tx.push(StateUpdate::Throttle(throttle));
                let _ = self.tx.push(StateUpdate::Brake(brake));
                self.current.store(throttle);
            }
            ControlKind::PitchHold => {
                let error = self.state.pitch_target() - self.state.pitch_angle();
                let output = self.pid.lock().compute(error, dt);
                self.state.set_pitch_control_output(output);
                self.current.store(output);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::queue::update_channel;

    const DT: f64 = 0.01;

    #[test]
    fn test_throttle_inc_saturates() {
        assert_eq!(throttle_inc_step(0.0, 0.1, DT), Some(0.001));
        assert_eq!(throttle_inc_step(1.0, 0.1, DT), None);
        assert_eq!(throttle_inc_step(0.9995, 0.1, DT), Some(1.0));
    }

    #[test]
    fn test_throttle_inc_reaches_expected_level() {
        // 0.1/s for one simulated second
        let mut throttle = 0.0;
        for _ in 0..100 {
            if let Some(next) = throttle_inc_step(throttle, 0.1, DT) {
                throttle = next;
            }
        }
        assert!((throttle - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_throttle_dec_floors_at_zero() {
        assert!((throttle_dec_step(0.5, 0.2, DT) - 0.498).abs() < 1e-12);
        assert_eq!(throttle_dec_step(0.001, 0.2, DT), 0.0);
        assert_eq!(throttle_dec_step(0.0, 0.2, DT), 0.0);
    }

    #[test]
    fn test_brake_caps_at_one() {
        assert!((brake_step(0.0, 0.2, DT) - 0.002).abs() < 1e-12);
        assert_eq!(brake_step(1.0, 0.2, DT), 1.0);
    }

    #[test]
    fn test_cruise_law_signs() {
        // below target: throttle, no brake
        let (throttle, brake) = cruise_step(10.0, 4.0, 0.1);
        assert!((throttle - 0.6).abs() < 1e-12);
        assert_eq!(brake, 0.0);
        // above target: brake, no throttle
        let (throttle, brake) = cruise_step(10.0, 18.0, 0.1);
        assert_eq!(throttle, 0.0);
        assert!((brake - 0.8).abs() < 1e-12);
        // saturation
        let (throttle, _) = cruise_step(100.0, 0.0, 1.0);
        assert_eq!(throttle, 1.0);
    }

    #[test]
    fn test_pid_proportional() {
        let mut pid = PitchPid::new(PidGains {
            kp: 0.1,
            ki: 0.0,
            kd: 0.0,
        });
        let out = pid.compute(2.0, DT);
        assert!((out - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_pid_integral_accumulates_and_clamps() {
        let mut pid = PitchPid::new(PidGains {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
        });
        for _ in 0..100 {
            pid.compute(1.0, DT);
        }
        // ki * error * dt * n = 1.0
        assert!((pid.integral() - 1.0).abs() < 1e-9);
        for _ in 0..100_000 {
            pid.compute(100.0, DT);
        }
        assert!(pid.integral() <= PITCH_INTEGRAL_LIMIT);
        // saturated output
        assert_eq!(pid.compute(100.0, DT), PITCH_OUTPUT_LIMIT);
    }

    #[test]
    fn test_pid_derivative_and_reset() {
        let mut pid = PitchPid::new(PidGains {
            kp: 0.0,
            ki: 0.0,
            kd: 0.001,
        });
        assert_eq!(pid.compute(0.0, DT), 0.0);
        // step change of 1.0 over dt: d = kd * 100 = 0.1
        let out = pid.compute(1.0, DT);
        assert!((out - 0.1).abs() < 1e-9);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.compute(0.0, DT), 0.0);
    }

    #[test]
    fn test_pid_zero_dt_is_inert() {
        let mut pid = PitchPid::default();
        assert_eq!(pid.compute(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_controller_enable_flags() {
        let state = SharedState::new();
        let clock = SimClock::new(DT);
        let (tx, _rx) = update_channel();
        let brake = Controller::new(
            ControlKind::Brake,
            state.clone(),
            clock.clone(),
            tx.clone(),
            ControlRates::default(),
        );
        assert_eq!(brake.name(), "brake");
        assert!(!brake.is_enabled());
        state.set_brake_control_enabled(true);
        assert!(brake.is_enabled());
        let cruise = Controller::new(ControlKind::Cruise, state.clone(), clock, tx, <_>::default());
        assert!(!cruise.is_enabled());
        state.set_cruise_control_enabled(true);
        assert!(cruise.is_enabled());
    }

    #[test]
    fn test_controller_worker_ramps_throttle() {
        let state = SharedState::new();
        let clock = SimClock::new(DT);
        let (tx, rx) = update_channel();
        state.set_throttle_control_enabled(true);
        let ctl = Controller::new(
            ControlKind::ThrottleInc,
            state.clone(),
            clock.clone(),
            tx,
            ControlRates::default(),
        );
        ctl.start().unwrap();
        ctl.start().unwrap(); // idempotent
        while clock.registered_workers() < 1 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        let driver = {
            let clock = clock.clone();
            std::thread::spawn(move || clock.run())
        };
        while clock.step_count() < 10 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        ctl.stop();
        assert!(!ctl.is_active());
        // the law pushed ramp updates into the queue
        let mut got = 0;
        while let Ok(update) = rx.try_recv() {
            assert!(matches!(update, StateUpdate::Throttle(v) if v > 0.0 && v <= 1.0));
            got += 1;
        }
        assert!(got >= 9, "expected ramp updates, got {}", got);
        assert!(ctl.current_value() > 0.0);
        clock.stop();
        driver.join().unwrap();
    }
}
