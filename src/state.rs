use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An `f64` cell with atomic acquire/release access, stored as raw bits
pub(crate) struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }
    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Acquire))
    }
    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Release);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Flight control mode
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightMode {
    /// The pilot owns throttle and brake
    #[default]
    Manual,
    /// The auto system owns throttle and brake
    Auto,
    /// Pilot and auto system share both channels
    SemiAuto,
}

impl FromStr for FlightMode {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "MANUAL" => Ok(FlightMode::Manual),
            "AUTO" => Ok(FlightMode::Auto),
            "SEMI_AUTO" => Ok(FlightMode::SemiAuto),
            _ => Err(Error::invalid_data(format!("unknown flight mode `{}`", s))),
        }
    }
}

impl std::fmt::Display for FlightMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlightMode::Manual => write!(f, "MANUAL"),
            FlightMode::Auto => write!(f, "AUTO"),
            FlightMode::SemiAuto => write!(f, "SEMI_AUTO"),
        }
    }
}

// mode/authority byte layout: authority flags in the low nibble, mode code above
const PILOT_THROTTLE: u8 = 0b0000_0001;
const PILOT_BRAKE: u8 = 0b0000_0010;
const AUTO_THROTTLE: u8 = 0b0000_0100;
const AUTO_BRAKE: u8 = 0b0000_1000;
const MODE_SHIFT: u8 = 4;

fn mode_byte(mode: FlightMode) -> u8 {
    let (code, authority) = match mode {
        FlightMode::Manual => (0, PILOT_THROTTLE | PILOT_BRAKE),
        FlightMode::Auto => (1, AUTO_THROTTLE | AUTO_BRAKE),
        FlightMode::SemiAuto => (2, PILOT_THROTTLE | PILOT_BRAKE | AUTO_THROTTLE | AUTO_BRAKE),
    };
    (code << MODE_SHIFT) | authority
}

fn byte_mode(byte: u8) -> FlightMode {
    match byte >> MODE_SHIFT {
        1 => FlightMode::Auto,
        2 => FlightMode::SemiAuto,
        _ => FlightMode::Manual,
    }
}

/// Which party owns each control channel
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct Authority {
    /// The pilot owns the throttle channel
    pub pilot_throttle: bool,
    /// The pilot owns the brake channel
    pub pilot_brake: bool,
    /// The auto system owns the throttle channel
    pub auto_throttle: bool,
    /// The auto system owns the brake channel
    pub auto_brake: bool,
}

/// The coherent, versioned copy of the kinematic/control/force subset of [`SharedState`].
///
/// Committed once per tick by the state manager; other flags (enables, mode) are read from
/// the live atomics and are not part of the snapshot coherence guarantee.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Snapshot version, bumped by exactly one per commit
    pub version: u64,
    /// Simulated time at the commit instant [s]
    pub time: f64,
    /// Position along the runway [m]
    pub position: f64,
    /// Longitudinal velocity [m/s]
    pub velocity: f64,
    /// Longitudinal acceleration [m/s²]
    pub acceleration: f64,
    /// Throttle setting [0..1]
    pub throttle: f64,
    /// Brake setting [0..1]
    pub brake: f64,
    /// Engine thrust [N]
    pub thrust: f64,
    /// Aerodynamic drag [N]
    pub drag_force: f64,
    /// Brake force [N]
    pub brake_force: f64,
    /// Pitch angle [deg]
    pub pitch_angle: f64,
    /// Pitch rate [deg/s]
    pub pitch_rate: f64,
    /// Pitch controller output [-1..1]
    pub pitch_control_output: f64,
}

/// The process-wide vehicle/simulation state cell. Clone-able handle; all scalar accessors
/// are atomic with acquire/release ordering, the snapshot is guarded by its own mutex.
pub struct SharedState {
    inner: Arc<StateInner>,
}

impl Clone for SharedState {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct StateInner {
    // kinematics
    position: AtomicF64,
    velocity: AtomicF64,
    acceleration: AtomicF64,
    // controls
    throttle: AtomicF64,
    brake: AtomicF64,
    // forces
    thrust: AtomicF64,
    drag_force: AtomicF64,
    brake_force: AtomicF64,
    // attitude
    pitch_angle: AtomicF64,
    pitch_rate: AtomicF64,
    pitch_control_output: AtomicF64,
    pitch_target: AtomicF64,
    // clock mirror
    simulation_time: AtomicF64,
    // targets
    target_speed: AtomicF64,
    abort_speed: AtomicF64,
    abort_speed_threshold: AtomicF64,
    // lifecycle flags
    simulation_running: AtomicBool,
    simulation_started: AtomicBool,
    user_confirmed: AtomicBool,
    system_ready: AtomicBool,
    final_stop_enabled: AtomicBool,
    // controller enables
    throttle_control_enabled: AtomicBool,
    brake_control_enabled: AtomicBool,
    cruise_control_enabled: AtomicBool,
    pitch_control_enabled: AtomicBool,
    // mode + authority, packed so a mode change swaps the whole group atomically
    mode: AtomicU8,
    // versioned snapshot
    version: AtomicU64,
    snapshot: Mutex<StateSnapshot>,
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! scalar_accessors {
    ($(#[$doc:meta] $get:ident / $set:ident),* $(,)?) => {
        $(
            #[$doc]
            pub fn $get(&self) -> f64 {
                self.inner.$get.load()
            }
            #[doc = concat!("Sets `", stringify!($get), "`")]
            pub fn $set(&self, value: f64) {
                self.inner.$get.store(value);
            }
        )*
    };
}

macro_rules! flag_accessors {
    ($(#[$doc:meta] $get:ident / $set:ident ( $field:ident )),* $(,)?) => {
        $(
            #[$doc]
            pub fn $get(&self) -> bool {
                self.inner.$field.load(Ordering::Acquire)
            }
            #[doc = concat!("Sets the `", stringify!($field), "` flag")]
            pub fn $set(&self, value: bool) {
                self.inner.$field.store(value, Ordering::Release);
            }
        )*
    };
}

impl SharedState {
    /// Creates a ready state cell with all scalars zeroed and mode `Manual`
    pub fn new() -> Self {
        let state = Self::new_unready();
        state.inner.system_ready.store(true, Ordering::Release);
        state
    }
    /// Creates a state cell, runs the user-supplied initialization hook, and marks the cell
    /// ready. A hook failure is surfaced to the caller and the cell stays not-ready
    pub fn with_init<F>(hook: F) -> Result<Self>
    where
        F: FnOnce(&SharedState) -> Result<()>,
    {
        let state = Self::new_unready();
        hook(&state).map_err(|e| Error::StateInit(e.to_string()))?;
        state.inner.system_ready.store(true, Ordering::Release);
        Ok(state)
    }
    fn new_unready() -> Self {
        Self {
            inner: StateInner {
                position: <_>::default(),
                velocity: <_>::default(),
                acceleration: <_>::default(),
                throttle: <_>::default(),
                brake: <_>::default(),
                thrust: <_>::default(),
                drag_force: <_>::default(),
                brake_force: <_>::default(),
                pitch_angle: <_>::default(),
                pitch_rate: <_>::default(),
                pitch_control_output: <_>::default(),
                pitch_target: <_>::default(),
                simulation_time: <_>::default(),
                target_speed: <_>::default(),
                abort_speed: <_>::default(),
                abort_speed_threshold: <_>::default(),
                simulation_running: AtomicBool::new(false),
                simulation_started: AtomicBool::new(false),
                user_confirmed: AtomicBool::new(false),
                system_ready: AtomicBool::new(false),
                final_stop_enabled: AtomicBool::new(false),
                throttle_control_enabled: AtomicBool::new(false),
                brake_control_enabled: AtomicBool::new(false),
                cruise_control_enabled: AtomicBool::new(false),
                pitch_control_enabled: AtomicBool::new(false),
                mode: AtomicU8::new(mode_byte(FlightMode::Manual)),
                version: AtomicU64::new(0),
                snapshot: Mutex::new(StateSnapshot::default()),
            }
            .into(),
        }
    }

    scalar_accessors! {
        /// Position along the runway [m]
        position / set_position,
        /// Longitudinal acceleration [m/s²]
        acceleration / set_acceleration,
        /// Engine thrust [N]
        thrust / set_thrust,
        /// Aerodynamic drag [N]
        drag_force / set_drag_force,
        /// Brake force [N]
        brake_force / set_brake_force,
        /// Pitch angle [deg]
        pitch_angle / set_pitch_angle,
        /// Pitch rate [deg/s]
        pitch_rate / set_pitch_rate,
        /// Pitch controller output [-1..1]
        pitch_control_output / set_pitch_control_output,
        /// Pitch hold setpoint [deg]
        pitch_target / set_pitch_target,
        /// Simulated time mirror [s]
        simulation_time / set_simulation_time,
        /// Cruise target speed [m/s]
        target_speed / set_target_speed,
        /// Abort decision speed [m/s]
        abort_speed / set_abort_speed,
        /// Margin below the abort speed treated as near-abort [m/s]
        abort_speed_threshold / set_abort_speed_threshold,
    }

    /// Longitudinal velocity [m/s]
    pub fn velocity(&self) -> f64 {
        self.inner.velocity.load()
    }
    /// Sets the velocity; values at or below zero are clamped to zero
    pub fn set_velocity(&self, value: f64) {
        self.inner.velocity.store(value.max(0.0));
    }
    /// Throttle setting [0..1]
    pub fn throttle(&self) -> f64 {
        self.inner.throttle.load()
    }
    /// Sets the throttle, saturated to [0..1]
    pub fn set_throttle(&self, value: f64) {
        self.inner.throttle.store(value.clamp(0.0, 1.0));
    }
    /// Brake setting [0..1]
    pub fn brake(&self) -> f64 {
        self.inner.brake.load()
    }
    /// Sets the brake, saturated to [0..1]
    pub fn set_brake(&self, value: f64) {
        self.inner.brake.store(value.clamp(0.0, 1.0));
    }

    flag_accessors! {
        /// Is the simulation running
        is_simulation_running / set_simulation_running(simulation_running),
        /// Has the simulation been started
        is_simulation_started / set_simulation_started(simulation_started),
        /// Has the user confirmed the run
        is_user_confirmed / set_user_confirmed(user_confirmed),
        /// Is the state cell initialized
        is_system_ready / set_system_ready(system_ready),
        /// Has the final-stop phase been entered
        is_final_stop_enabled / set_final_stop_enabled(final_stop_enabled),
        /// Is throttle control enabled
        is_throttle_control_enabled / set_throttle_control_enabled(throttle_control_enabled),
        /// Is brake control enabled
        is_brake_control_enabled / set_brake_control_enabled(brake_control_enabled),
        /// Is cruise control enabled
        is_cruise_control_enabled / set_cruise_control_enabled(cruise_control_enabled),
        /// Is pitch control enabled
        is_pitch_control_enabled / set_pitch_control_enabled(pitch_control_enabled),
    }

    /// The current flight mode
    pub fn flight_mode(&self) -> FlightMode {
        byte_mode(self.inner.mode.load(Ordering::Acquire))
    }
    /// Switches the flight mode; the four authority bits change together in one store
    pub fn set_flight_mode(&self, mode: FlightMode) {
        self.inner.mode.store(mode_byte(mode), Ordering::Release);
    }
    /// The current channel authority assignment
    pub fn authority(&self) -> Authority {
        let byte = self.inner.mode.load(Ordering::Acquire);
        Authority {
            pilot_throttle: byte & PILOT_THROTTLE != 0,
            pilot_brake: byte & PILOT_BRAKE != 0,
            auto_throttle: byte & AUTO_THROTTLE != 0,
            auto_brake: byte & AUTO_BRAKE != 0,
        }
    }
    /// True when pilot and auto system own the same channel at the same time
    pub fn has_control_conflict(&self) -> bool {
        let a = self.authority();
        (a.pilot_throttle && a.auto_throttle) || (a.pilot_brake && a.auto_brake)
    }

    /// Returns a coherent copy of the last committed snapshot
    pub fn snapshot(&self) -> StateSnapshot {
        *self.inner.snapshot.lock()
    }
    /// Builds a snapshot candidate from the live scalars with the given time stamp.
    /// The result carries the version the next commit will assign
    pub fn build_snapshot(&self, time: f64) -> StateSnapshot {
        StateSnapshot {
            version: self.state_version() + 1,
            time,
            position: self.position(),
            velocity: self.velocity(),
            acceleration: self.acceleration(),
            throttle: self.throttle(),
            brake: self.brake(),
            thrust: self.thrust(),
            drag_force: self.drag_force(),
            brake_force: self.brake_force(),
            pitch_angle: self.pitch_angle(),
            pitch_rate: self.pitch_rate(),
            pitch_control_output: self.pitch_control_output(),
        }
    }
    /// Replaces the snapshot and bumps the state version by exactly one
    pub fn commit_snapshot(&self, mut snapshot: StateSnapshot) {
        let mut slot = self.inner.snapshot.lock();
        let version = self.inner.version.fetch_add(1, Ordering::AcqRel) + 1;
        snapshot.version = version;
        self.inner.simulation_time.store(snapshot.time);
        *slot = snapshot;
    }
    /// The version of the last committed snapshot
    pub fn state_version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_mode_switches_authority_as_group() {
        let state = SharedState::new();
        state.set_flight_mode(FlightMode::Auto);
        let a = state.authority();
        assert!(!a.pilot_throttle && !a.pilot_brake && a.auto_throttle && a.auto_brake);
        state.set_flight_mode(FlightMode::Manual);
        let a = state.authority();
        assert!(a.pilot_throttle && a.pilot_brake && !a.auto_throttle && !a.auto_brake);
        state.set_flight_mode(FlightMode::SemiAuto);
        let a = state.authority();
        assert!(a.pilot_throttle && a.pilot_brake && a.auto_throttle && a.auto_brake);
    }

    #[test]
    fn test_mode_set_is_idempotent() {
        let state = SharedState::new();
        state.set_flight_mode(FlightMode::Auto);
        let before = state.authority();
        state.set_flight_mode(FlightMode::Auto);
        assert_eq!(state.authority(), before);
    }

    #[test]
    fn test_control_conflict() {
        let state = SharedState::new();
        assert!(!state.has_control_conflict());
        state.set_flight_mode(FlightMode::SemiAuto);
        assert!(state.has_control_conflict());
        state.set_flight_mode(FlightMode::Auto);
        assert!(!state.has_control_conflict());
    }

    #[test]
    fn test_control_saturation() {
        let state = SharedState::new();
        state.set_throttle(1.5);
        assert_eq!(state.throttle(), 1.0);
        state.set_throttle(-0.2);
        assert_eq!(state.throttle(), 0.0);
        state.set_brake(2.0);
        assert_eq!(state.brake(), 1.0);
        state.set_velocity(-3.0);
        assert_eq!(state.velocity(), 0.0);
    }

    #[test]
    fn test_snapshot_version_strictly_increases() {
        let state = SharedState::new();
        assert_eq!(state.state_version(), 0);
        for i in 1..=5u64 {
            let snap = state.build_snapshot(i as f64 * 0.01);
            state.commit_snapshot(snap);
            assert_eq!(state.state_version(), i);
            assert_eq!(state.snapshot().version, i);
        }
    }

    #[test]
    fn test_snapshot_mirrors_simulation_time() {
        let state = SharedState::new();
        state.commit_snapshot(state.build_snapshot(0.42));
        assert_eq!(state.simulation_time(), 0.42);
        assert_eq!(state.snapshot().time, 0.42);
    }

    #[test]
    fn test_init_hook_failure_is_fatal() {
        let result = SharedState::with_init(|_| Err(crate::Error::failed("boom")));
        assert!(matches!(result, Err(Error::StateInit(_))));
        let state = SharedState::with_init(|s| {
            s.set_target_speed(15.0);
            Ok(())
        })
        .unwrap();
        assert!(state.is_system_ready());
        assert_eq!(state.target_speed(), 15.0);
    }

    #[test]
    fn test_flight_mode_wire_names() {
        for mode in [FlightMode::Manual, FlightMode::Auto, FlightMode::SemiAuto] {
            assert_eq!(mode.to_string().parse::<FlightMode>().unwrap(), mode);
        }
        assert!("FULL_AUTO".parse::<FlightMode>().is_err());
    }
}
