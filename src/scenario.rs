use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::bus::EventBus;
use crate::clock::SimClock;
use crate::config::{ControllerAction, ScenarioConfig};
use crate::state::{FlightMode, SharedState, StateSnapshot};

/// Watchdog poll interval
const WATCHDOG_POLL: Duration = Duration::from_millis(10);

/// What an event predicate can see: the live state cell plus the bus latch set. Predicates
/// must stay pure — read-only, no publishing
pub struct EventContext<'a> {
    state: &'a SharedState,
    bus: &'a EventBus,
}

impl<'a> EventContext<'a> {
    /// Creates a context over the given state and bus
    pub fn new(state: &'a SharedState, bus: &'a EventBus) -> Self {
        Self { state, bus }
    }
    /// The live state cell
    pub fn state(&self) -> &SharedState {
        self.state
    }
    /// The last committed snapshot
    pub fn snapshot(&self) -> StateSnapshot {
        self.state.snapshot()
    }
    /// Has the named event already fired this run
    pub fn is_triggered(&self, event: &str) -> bool {
        self.bus.is_event_triggered(event)
    }
}

type Predicate = Arc<dyn Fn(&EventContext) -> bool + Send + Sync>;

/// A declarative scenario event: an edge-triggered predicate over the simulation state and
/// the ordered action list it releases
#[derive(Clone)]
pub struct EventDefinition {
    /// Event name, also the bus topic
    pub name: Arc<str>,
    /// Human-readable description for the logs
    pub description: Arc<str>,
    /// The trigger condition
    pub predicate: Predicate,
    /// Actions executed, in order, when the event fires
    pub actions: Vec<ControllerAction>,
    /// Fire at most once per run (edge trigger). All scenario events are one-shot
    pub once: bool,
}

impl EventDefinition {
    /// Creates a one-shot event definition
    pub fn new<F>(
        name: &str,
        description: &str,
        actions: Vec<ControllerAction>,
        predicate: F,
    ) -> Self
    where
        F: Fn(&EventContext) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            predicate: Arc::new(predicate),
            actions,
            once: true,
        }
    }
}

impl fmt::Debug for EventDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("actions", &self.actions)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

/// The built-in scenarios
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Throttle up, brake at distance, roll to a stop
    Taxi,
    /// Accelerate to the abort speed, brake hard, taxi clear
    AbortTakeoff,
}

impl ScenarioKind {
    /// The scenario name used for config-file lookup and logging
    pub fn name(self) -> &'static str {
        match self {
            ScenarioKind::Taxi => "taxi",
            ScenarioKind::AbortTakeoff => "abort_takeoff",
        }
    }
}

/// Seeds [`SharedState`] for a scenario run. The taxi scenario holds `target_speed`; the
/// abort scenario cruises clear of the runway at `cruise_speed`
pub fn seed_state(state: &SharedState, cfg: &ScenarioConfig, kind: ScenarioKind) {
    let target = match kind {
        ScenarioKind::Taxi => cfg.target_speed,
        ScenarioKind::AbortTakeoff => cfg.cruise_speed,
    };
    state.set_target_speed(target);
    state.set_abort_speed(cfg.abort_speed);
    state.set_abort_speed_threshold(cfg.abort_speed_threshold);
    state.set_flight_mode(FlightMode::Manual);
    state.set_user_confirmed(true);
    state.set_simulation_started(true);
    state.set_simulation_running(true);
}

/// The event table for a scenario
pub fn events_for(kind: ScenarioKind, cfg: &ScenarioConfig) -> Vec<EventDefinition> {
    match kind {
        ScenarioKind::Taxi => taxi_events(cfg),
        ScenarioKind::AbortTakeoff => abort_takeoff_events(cfg),
    }
}

fn taxi_events(cfg: &ScenarioConfig) -> Vec<EventDefinition> {
    let start_time = cfg.throttle_start_time;
    let brake_position = cfg.brake_position;
    let stop_velocity = cfg.zero_velocity_threshold;
    vec![
        EventDefinition::new(
            "START_THROTTLE",
            "begin the taxi roll",
            vec![
                ControllerAction::SwitchToAutoMode,
                ControllerAction::StartThrottleIncrease,
            ],
            move |ctx| ctx.snapshot().time >= start_time,
        ),
        EventDefinition::new(
            "BEGIN_BRAKING",
            "end of the acceleration stretch",
            vec![
                ControllerAction::StopThrottleIncrease,
                ControllerAction::StartThrottleDecrease,
                ControllerAction::StartBrake,
            ],
            move |ctx| ctx.snapshot().position >= brake_position,
        ),
        EventDefinition::new(
            "FINAL_STOP",
            "vehicle has rolled to a stop",
            vec![
                ControllerAction::StopAllControllers,
                ControllerAction::SwitchToManualMode,
            ],
            move |ctx| {
                let s = ctx.snapshot();
                s.position >= brake_position && s.velocity <= stop_velocity
            },
        ),
    ]
}

fn abort_takeoff_events(cfg: &ScenarioConfig) -> Vec<EventDefinition> {
    let start_time = cfg.throttle_start_time;
    let abort_speed = cfg.abort_speed;
    let near_abort = cfg.abort_speed - cfg.abort_speed_threshold;
    let resume_position = cfg.cruise_resume_position;
    let stop_velocity = cfg.zero_velocity_threshold;
    vec![
        EventDefinition::new(
            "START_TAKEOFF",
            "begin the takeoff roll",
            vec![
                ControllerAction::SwitchToAutoMode,
                ControllerAction::StartThrottleIncrease,
            ],
            move |ctx| ctx.snapshot().time >= start_time,
        ),
        // advisory only: no actions, the fired log line is the point
        EventDefinition::new(
            "APPROACHING_ABORT_SPEED",
            "within the abort-speed margin",
            Vec::new(),
            move |ctx| ctx.snapshot().velocity >= near_abort,
        ),
        EventDefinition::new(
            "ABORT_TAKEOFF",
            "abort decision speed reached",
            vec![
                ControllerAction::StopThrottleIncrease,
                ControllerAction::StartThrottleDecrease,
                ControllerAction::StartBrake,
            ],
            move |ctx| ctx.snapshot().velocity >= abort_speed,
        ),
        EventDefinition::new(
            "CRUISE_AFTER_ABORT",
            "taxi clear of the runway after the abort",
            vec![
                ControllerAction::StopBrake,
                ControllerAction::StopThrottleDecrease,
                ControllerAction::StartCruise,
            ],
            move |ctx| {
                ctx.is_triggered("ABORT_TAKEOFF")
                    && ctx.snapshot().position >= resume_position
            },
        ),
        EventDefinition::new(
            "FINAL_STOP",
            "vehicle stopped after the abort",
            vec![
                ControllerAction::StopAllControllers,
                ControllerAction::SwitchToManualMode,
            ],
            move |ctx| {
                ctx.is_triggered("ABORT_TAKEOFF")
                    && !ctx.is_triggered("CRUISE_AFTER_ABORT")
                    && ctx.snapshot().velocity <= stop_velocity
            },
        ),
    ]
}

/// The run watchdog: ends the scenario when the vehicle has finished its final stop, or when
/// a position/time limit is exceeded. Not a barrier worker — it polls
pub struct Watchdog {
    state: SharedState,
    clock: SimClock,
    cfg: ScenarioConfig,
}

impl Watchdog {
    /// Creates the watchdog
    pub fn new(state: SharedState, clock: SimClock, cfg: ScenarioConfig) -> Self {
        Self { state, clock, cfg }
    }
    /// Polls until a termination condition holds, then stops the clock and flags the
    /// simulation down
    pub fn run(self) {
        loop {
            thread::sleep(WATCHDOG_POLL);
            if !self.clock.is_running() || !self.state.is_simulation_running() {
                break;
            }
            let s = self.state.snapshot();
            if s.position > self.cfg.max_position {
                warn!("position limit exceeded ({:.1} m), terminating", s.position);
                break;
            }
            if s.time > self.cfg.max_simulation_time {
                warn!("time limit exceeded ({:.1} s), terminating", s.time);
                break;
            }
            if self.state.is_final_stop_enabled() && s.velocity <= self.cfg.zero_velocity_threshold
            {
                info!("final stop reached at {:.1} m, t={:.2} s", s.position, s.time);
                break;
            }
        }
        self.state.set_simulation_running(false);
        self.clock.stop();
    }
}
