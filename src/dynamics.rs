use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::clock::SimClock;
use crate::queue::{Sender, StateUpdate};
use crate::state::SharedState;

/// Air density at sea level [kg/m³]
pub const AIR_DENSITY: f64 = 1.225;
/// Gravitational acceleration [m/s²]
pub const GRAVITY: f64 = 9.81;
/// Below this speed the vehicle is treated as statically parked [m/s]
const STATIC_SPEED_EPS: f64 = 0.01;
/// Brake effectiveness scales with speed between these bounds
const BRAKE_FACTOR_MIN: f64 = 0.3;
const BRAKE_FACTOR_SPEED: f64 = 50.0;

// nonlinear-variant perturbation amplitudes and frequencies
const THRUST_RIPPLE: f64 = 0.03;
const THRUST_RIPPLE_FREQ: f64 = 2.0;
const DRAG_RIPPLE: f64 = 0.05;
const DRAG_RIPPLE_FREQ: f64 = 1.3;

/// Aircraft physical parameters. The default is the AC1 configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AircraftConfig {
    /// Vehicle mass [kg]
    pub mass: f64,
    /// Maximum engine thrust at full throttle [N]
    pub max_thrust: f64,
    /// Maximum brake force at full pedal [N]
    pub max_brake: f64,
    /// Drag coefficient
    pub drag_coefficient: f64,
    /// Frontal reference area [m²]
    pub frontal_area: f64,
    /// Static friction coefficient
    pub static_friction_coeff: f64,
}

impl Default for AircraftConfig {
    fn default() -> Self {
        Self {
            mass: 80_000.0,
            max_thrust: 500_000.0,
            max_brake: 400_000.0,
            drag_coefficient: 0.02,
            frontal_area: 50.0,
            static_friction_coeff: 0.02,
        }
    }
}

/// The force balance computed for one tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct Forces {
    /// Engine thrust [N]
    pub thrust: f64,
    /// Aerodynamic drag, signed to oppose motion [N]
    pub drag: f64,
    /// Brake force magnitude [N]
    pub brake_force: f64,
    /// Static friction bound, nonzero only when parked [N]
    pub static_friction: f64,
    /// Net longitudinal force [N]
    pub net_force: f64,
}

/// Selectable force model. The linear model is the reference; the nonlinear variant adds
/// small sinusoidal ripple to thrust and the drag coefficient
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForceModel {
    /// Reference linear model
    #[default]
    Linear,
    /// Linear model with sinusoidal perturbations
    NonLinear,
}

impl ForceModel {
    /// Computes the force balance for the given control/motion state at simulated time `time`
    pub fn compute(
        self,
        cfg: &AircraftConfig,
        throttle: f64,
        brake: f64,
        velocity: f64,
        time: f64,
    ) -> Forces {
        match self {
            ForceModel::Linear => force_balance(cfg, throttle, brake, velocity, 1.0, 1.0),
            ForceModel::NonLinear => {
                let thrust_scale = 1.0 + THRUST_RIPPLE * (THRUST_RIPPLE_FREQ * time).sin();
                let drag_scale = 1.0 + DRAG_RIPPLE * (DRAG_RIPPLE_FREQ * time).sin();
                force_balance(cfg, throttle, brake, velocity, thrust_scale, drag_scale)
            }
        }
    }
}

fn force_balance(
    cfg: &AircraftConfig,
    throttle: f64,
    brake: f64,
    velocity: f64,
    thrust_scale: f64,
    drag_scale: f64,
) -> Forces {
    let thrust = throttle * cfg.max_thrust * thrust_scale;
    // v·|v| keeps the drag term opposing the direction of motion
    let drag = 0.5
        * AIR_DENSITY
        * cfg.frontal_area
        * cfg.drag_coefficient
        * drag_scale
        * velocity
        * velocity.abs();
    if velocity.abs() < STATIC_SPEED_EPS {
        let static_friction = cfg.static_friction_coeff * cfg.mass * GRAVITY;
        let mut net_force = thrust - drag;
        if net_force.abs() < static_friction {
            net_force = 0.0;
        } else {
            net_force -= static_friction * net_force.signum();
        }
        Forces {
            thrust,
            drag,
            brake_force: 0.0,
            static_friction,
            net_force,
        }
    } else {
        let speed_factor = (velocity.abs() / BRAKE_FACTOR_SPEED).clamp(BRAKE_FACTOR_MIN, 1.0);
        let brake_force = brake * cfg.max_brake * speed_factor;
        let net_force = thrust - drag - brake_force * velocity.signum();
        Forces {
            thrust,
            drag,
            brake_force,
            static_friction: 0.0,
            net_force,
        }
    }
}

/// The dynamics-integrator worker: computes the force balance, commits the forces, and
/// enqueues the semi-implicit Euler kinematics update every tick
pub struct Dynamics {
    state: SharedState,
    clock: SimClock,
    tx: Sender<StateUpdate>,
    config: AircraftConfig,
    model: ForceModel,
}

impl Dynamics {
    /// Creates the integrator worker
    pub fn new(
        state: SharedState,
        clock: SimClock,
        tx: Sender<StateUpdate>,
        config: AircraftConfig,
        model: ForceModel,
    ) -> Self {
        Self {
            state,
            clock,
            tx,
            config,
            model,
        }
    }
    /// Runs the worker loop until the clock stops
    pub fn run(self) {
        let _reg = self.clock.register();
        let mut step = 0;
        loop {
            step = self.clock.wait_for_next_step(step);
            if !self.clock.is_running() {
                break;
            }
            let dt = self.clock.time_step();
            let velocity = self.state.velocity();
            let position = self.state.position();
            let forces = self.model.compute(
                &self.config,
                self.state.throttle(),
                self.state.brake(),
                velocity,
                self.clock.current_time(),
            );
            self.state.set_thrust(forces.thrust);
            self.state.set_drag_force(forces.drag);
            self.state.set_brake_force(forces.brake_force);
            let acceleration = forces.net_force / self.config.mass;
            let new_velocity = (velocity + acceleration * dt).max(0.0);
            // semi-implicit Euler: position advances with the pre-step velocity
            let new_position = position + velocity * dt;
            let pushed = self
                .tx
                .push(StateUpdate::Velocity(new_velocity))
                .and_then(|()| self.tx.push(StateUpdate::Position(new_position)))
                .and_then(|()| self.tx.push(StateUpdate::Acceleration(acceleration)));
            self.state.set_simulation_time(self.clock.current_time());
            debug!(
                "tick {}: net={:.1} N a={:.4} v={:.4}",
                step, forces.net_force, acceleration, new_velocity
            );
            self.clock.notify_step_completed();
            if pushed.is_err() {
                warn!("state-update channel closed, integrator exiting");
                break;
            }
        }
    }
}
