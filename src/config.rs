use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Scenario-level command tags: the wire contract with the action configuration file
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControllerAction {
    /// Start the throttle ramp-up worker
    StartThrottleIncrease,
    /// Stop the throttle ramp-up worker
    StopThrottleIncrease,
    /// Start the throttle ramp-down worker
    StartThrottleDecrease,
    /// Stop the throttle ramp-down worker
    StopThrottleDecrease,
    /// Start the brake worker
    StartBrake,
    /// Stop the brake worker
    StopBrake,
    /// Start the cruise worker
    StartCruise,
    /// Stop the cruise worker
    StopCruise,
    /// Start the pitch-hold worker
    StartPitchControl,
    /// Stop the pitch-hold worker
    StopPitchControl,
    /// Change the pitch-hold setpoint
    SetPitchAngle,
    /// Stop every controller
    StopAllControllers,
    /// Switch flight mode to Auto
    SwitchToAutoMode,
    /// Switch flight mode to Manual
    SwitchToManualMode,
    /// Switch flight mode to SemiAuto
    SwitchToSemiAutoMode,
}

impl ControllerAction {
    /// Every action, in wire order
    pub const ALL: [ControllerAction; 15] = [
        ControllerAction::StartThrottleIncrease,
        ControllerAction::StopThrottleIncrease,
        ControllerAction::StartThrottleDecrease,
        ControllerAction::StopThrottleDecrease,
        ControllerAction::StartBrake,
        ControllerAction::StopBrake,
        ControllerAction::StartCruise,
        ControllerAction::StopCruise,
        ControllerAction::StartPitchControl,
        ControllerAction::StopPitchControl,
        ControllerAction::SetPitchAngle,
        ControllerAction::StopAllControllers,
        ControllerAction::SwitchToAutoMode,
        ControllerAction::SwitchToManualMode,
        ControllerAction::SwitchToSemiAutoMode,
    ];
    /// The wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ControllerAction::StartThrottleIncrease => "START_THROTTLE_INCREASE",
            ControllerAction::StopThrottleIncrease => "STOP_THROTTLE_INCREASE",
            ControllerAction::StartThrottleDecrease => "START_THROTTLE_DECREASE",
            ControllerAction::StopThrottleDecrease => "STOP_THROTTLE_DECREASE",
            ControllerAction::StartBrake => "START_BRAKE",
            ControllerAction::StopBrake => "STOP_BRAKE",
            ControllerAction::StartCruise => "START_CRUISE",
            ControllerAction::StopCruise => "STOP_CRUISE",
            ControllerAction::StartPitchControl => "START_PITCH_CONTROL",
            ControllerAction::StopPitchControl => "STOP_PITCH_CONTROL",
            ControllerAction::SetPitchAngle => "SET_PITCH_ANGLE",
            ControllerAction::StopAllControllers => "STOP_ALL_CONTROLLERS",
            ControllerAction::SwitchToAutoMode => "SWITCH_TO_AUTO_MODE",
            ControllerAction::SwitchToManualMode => "SWITCH_TO_MANUAL_MODE",
            ControllerAction::SwitchToSemiAutoMode => "SWITCH_TO_SEMI_AUTO_MODE",
        }
    }
    /// Does the action start a controller worker
    pub fn is_start(self) -> bool {
        self.as_str().starts_with("START_")
    }
    /// Does the action stop a controller worker
    pub fn is_stop(self) -> bool {
        self.as_str().starts_with("STOP_") && self != ControllerAction::StopAllControllers
    }
}

impl fmt::Display for ControllerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControllerAction {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| Error::invalid_data(format!("unknown action `{}`", s)))
    }
}

/// What kind of operation an action entry performs
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub enum ActionType {
    /// Start/stop one named controller (optionally setting state flags first)
    Controller,
    /// Stop every controller
    StopAll,
    /// Switch the flight mode
    Mode,
}

/// Controller name implying [`ActionType::StopAll`]
pub const STOP_ALL_TARGET: &str = "STOP_ALL";
/// Controller name implying [`ActionType::Mode`]
pub const MODE_TARGET: &str = "MODE";

/// One parsed action entry: the target controller, the state settings applied before the
/// lifecycle operation, and the derived action type
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActionEntry {
    /// Target controller name (or `STOP_ALL` / `MODE`)
    pub controller: String,
    /// `key=value` state settings, applied before the lifecycle operation
    pub settings: BTreeMap<String, String>,
    /// Derived operation kind
    pub action_type: ActionType,
}

impl ActionEntry {
    fn new(controller: &str, settings: BTreeMap<String, String>) -> Self {
        let action_type = match controller {
            STOP_ALL_TARGET => ActionType::StopAll,
            MODE_TARGET => ActionType::Mode,
            _ => ActionType::Controller,
        };
        Self {
            controller: controller.to_owned(),
            settings,
            action_type,
        }
    }
}

impl fmt::Display for ActionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.controller)?;
        let mut first = true;
        for (key, value) in &self.settings {
            if first {
                write!(f, ", {}={}", key, value)?;
                first = false;
            } else {
                write!(f, "; {}={}", key, value)?;
            }
        }
        Ok(())
    }
}

impl FromStr for ActionEntry {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let (controller, rest) = match s.split_once(',') {
            Some((c, rest)) => (c.trim(), rest),
            None => (s.trim(), ""),
        };
        if controller.is_empty() {
            return Err(Error::config("empty controller name"));
        }
        let mut settings = BTreeMap::new();
        for part in rest.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::config(format!("malformed setting `{}`", part)))?;
            settings.insert(key.trim().to_owned(), value.trim().to_owned());
        }
        Ok(ActionEntry::new(controller, settings))
    }
}

/// The action table: maps scenario command tags to controller operations
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    entries: BTreeMap<ControllerAction, ActionEntry>,
}

fn default_entry(action: ControllerAction) -> ActionEntry {
    let (controller, settings): (&str, &[(&str, &str)]) = match action {
        ControllerAction::StartThrottleIncrease => {
            ("throttle_inc", &[("throttle_control_enabled", "true")])
        }
        ControllerAction::StopThrottleIncrease => {
            ("throttle_inc", &[("throttle_control_enabled", "false")])
        }
        ControllerAction::StartThrottleDecrease => {
            ("throttle_dec", &[("throttle_control_enabled", "true")])
        }
        ControllerAction::StopThrottleDecrease => {
            ("throttle_dec", &[("throttle_control_enabled", "false")])
        }
        ControllerAction::StartBrake => ("brake", &[("brake_control_enabled", "true")]),
        ControllerAction::StopBrake => ("brake", &[("brake_control_enabled", "false")]),
        ControllerAction::StartCruise => ("cruise_runway", &[("cruise_control_enabled", "true")]),
        ControllerAction::StopCruise => ("cruise_runway", &[("cruise_control_enabled", "false")]),
        ControllerAction::StartPitchControl => {
            ("pitch_hold", &[("pitch_control_enabled", "true")])
        }
        ControllerAction::StopPitchControl => {
            ("pitch_hold", &[("pitch_control_enabled", "false")])
        }
        ControllerAction::SetPitchAngle => ("pitch_hold", &[("pitch_target", "0.0")]),
        ControllerAction::StopAllControllers => {
            (STOP_ALL_TARGET, &[("final_stop_enabled", "true")])
        }
        ControllerAction::SwitchToAutoMode => (MODE_TARGET, &[("flight_mode", "AUTO")]),
        ControllerAction::SwitchToManualMode => (MODE_TARGET, &[("flight_mode", "MANUAL")]),
        ControllerAction::SwitchToSemiAutoMode => (MODE_TARGET, &[("flight_mode", "SEMI_AUTO")]),
    };
    ActionEntry::new(
        controller,
        settings
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect(),
    )
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            entries: ControllerAction::ALL
                .into_iter()
                .map(|a| (a, default_entry(a)))
                .collect(),
        }
    }
}

impl ActionConfig {
    /// Loads the table from `controller_actions_config.txt`-format text. A missing file or a
    /// malformed line keeps the built-in default for the affected entries and warns
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let mut config = Self::default();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "action config `{}` not readable ({}), using defaults",
                    path.as_ref().display(),
                    e
                );
                return config;
            }
        };
        for (no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_action_line(line) {
                Ok((action, entry)) => {
                    config.entries.insert(action, entry);
                }
                Err(e) => warn!(
                    "action config `{}` line {}: {}",
                    path.as_ref().display(),
                    no + 1,
                    e
                ),
            }
        }
        config
    }
    /// The entry for an action
    pub fn get(&self, action: ControllerAction) -> Option<&ActionEntry> {
        self.entries.get(&action)
    }
    /// Replaces the entry for an action
    pub fn insert(&mut self, action: ControllerAction, entry: ActionEntry) {
        self.entries.insert(action, entry);
    }
    /// Serializes the table back to its wire format
    pub fn to_config_text(&self) -> String {
        let mut out = String::new();
        for (action, entry) in &self.entries {
            out.push_str(&format!("{} = {}\n", action, entry));
        }
        out
    }
}

/// Parses one `ACTION_NAME = controller, key=value[;key=value]*` line
pub fn parse_action_line(line: &str) -> Result<(ControllerAction, ActionEntry)> {
    let (name, rest) = line
        .split_once('=')
        .ok_or_else(|| Error::config("missing `=`"))?;
    let action: ControllerAction = name.trim().parse()?;
    let entry: ActionEntry = rest.trim().parse()?;
    Ok((action, entry))
}

/// Scenario tuning parameters, loaded from a `KEY = double` text file
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScenarioConfig {
    /// Cruise target speed [m/s]
    pub target_speed: f64,
    /// Abort decision speed [m/s]
    pub abort_speed: f64,
    /// Margin below the abort speed treated as near-abort [m/s]
    pub abort_speed_threshold: f64,
    /// Brake application rate [1/s]
    pub brake_rate: f64,
    /// Throttle ramp-up rate [1/s]
    pub throttle_increase_rate: f64,
    /// Throttle ramp-down rate [1/s]
    pub throttle_decrease_rate: f64,
    /// Simulation time step [s]
    pub simulation_time_step: f64,
    /// Cruise speed seeded as the target [m/s]
    pub cruise_speed: f64,
    /// Cruise proportional gain [1/(m/s)]
    pub cruise_gain: f64,
    /// Position at which post-abort cruise resumes [m]
    pub cruise_resume_position: f64,
    /// Velocity below which the vehicle counts as stopped [m/s]
    pub zero_velocity_threshold: f64,
    /// Simulated time at which the throttle phase begins [s]
    pub throttle_start_time: f64,
    /// Position at which the braking phase begins [m]
    pub brake_position: f64,
    /// Watchdog position limit [m]
    pub max_position: f64,
    /// Watchdog simulated-time limit [s]
    pub max_simulation_time: f64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            target_speed: 10.0,
            abort_speed: 40.0,
            abort_speed_threshold: 0.5,
            brake_rate: 0.2,
            throttle_increase_rate: 0.1,
            throttle_decrease_rate: 0.2,
            simulation_time_step: 0.01,
            cruise_speed: 10.0,
            cruise_gain: 0.1,
            cruise_resume_position: 800.0,
            zero_velocity_threshold: 0.1,
            throttle_start_time: 1.0,
            brake_position: 500.0,
            max_position: 1500.0,
            max_simulation_time: 180.0,
        }
    }
}

impl ScenarioConfig {
    /// Loads parameters from a `KEY = double` text file over the defaults. A missing file or
    /// malformed line keeps the default and warns; unknown keys are warned and ignored
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let mut config = Self::default();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                warn!(
                    "scenario config `{}` not readable ({}), using defaults",
                    path.as_ref().display(),
                    e
                );
                return config;
            }
        };
        for (no, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                warn!(
                    "scenario config `{}` line {}: missing `=`",
                    path.as_ref().display(),
                    no + 1
                );
                continue;
            };
            let key = key.trim();
            let value: f64 = match value.trim().parse() {
                Ok(v) => v,
                Err(e) => {
                    warn!(
                        "scenario config `{}` line {}: {}",
                        path.as_ref().display(),
                        no + 1,
                        e
                    );
                    continue;
                }
            };
            if !config.set_key(key, value) {
                warn!(
                    "scenario config `{}` line {}: unknown key `{}`",
                    path.as_ref().display(),
                    no + 1,
                    key
                );
            }
        }
        config
    }
    fn set_key(&mut self, key: &str, value: f64) -> bool {
        match key {
            "target_speed" => self.target_speed = value,
            "abort_speed" => self.abort_speed = value,
            "abort_speed_threshold" => self.abort_speed_threshold = value,
            "brake_rate" => self.brake_rate = value,
            "throttle_increase_rate" => self.throttle_increase_rate = value,
            "throttle_decrease_rate" => self.throttle_decrease_rate = value,
            "simulation_time_step" => self.simulation_time_step = value,
            "cruise_speed" => self.cruise_speed = value,
            "cruise_gain" => self.cruise_gain = value,
            "cruise_resume_position" => self.cruise_resume_position = value,
            "zero_velocity_threshold" => self.zero_velocity_threshold = value,
            "throttle_start_time" => self.throttle_start_time = value,
            "brake_position" => self.brake_position = value,
            "max_position" => self.max_position = value,
            "max_simulation_time" => self.max_simulation_time = value,
            _ => return false,
        }
        true
    }
}
