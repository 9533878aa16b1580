use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::clock::SimClock;
use crate::config::{ActionConfig, ActionType, ControllerAction, ScenarioConfig};
use crate::controllers::{ControlKind, Controller};
use crate::queue::{channel, Sender, StateUpdate};
use crate::scenario::EventDefinition;
use crate::state::{FlightMode, SharedState};
use crate::{Error, Result};

/// The fixed controller roster
const ROSTER: [ControlKind; 5] = [
    ControlKind::ThrottleInc,
    ControlKind::ThrottleDec,
    ControlKind::Brake,
    ControlKind::Cruise,
    ControlKind::PitchHold,
];

enum ManagerMessage {
    Event(Arc<str>),
    Shutdown,
}

/// Owns the controller roster and translates fired scenario events into controller lifecycle
/// operations and state-flag changes.
///
/// Bus callbacks only forward the event name into the manager's FIFO; a dedicated dispatch
/// worker latches the first invocation per event and executes its ordered action list.
/// Starting an auto controller is gated on the matching authority bit; a denied start is
/// logged and ignored.
pub struct ControllerManager {
    state: SharedState,
    controllers: BTreeMap<Arc<str>, Controller>,
    actions: ActionConfig,
    definitions: Vec<EventDefinition>,
    triggered: Arc<Mutex<BTreeSet<Arc<str>>>>,
    dispatch_tx: Sender<ManagerMessage>,
    dispatch_rx: Option<crate::queue::Receiver<ManagerMessage>>,
    worker: Option<JoinHandle<()>>,
}

impl ControllerManager {
    /// Creates the manager and its controller roster
    pub fn new(
        state: SharedState,
        clock: SimClock,
        tx: Sender<StateUpdate>,
        scenario_cfg: &ScenarioConfig,
        actions: ActionConfig,
    ) -> Self {
        let controllers = ROSTER
            .into_iter()
            .map(|kind| {
                let controller = Controller::new(
                    kind,
                    state.clone(),
                    clock.clone(),
                    tx.clone(),
                    scenario_cfg.into(),
                );
                (Arc::<str>::from(kind.name()), controller)
            })
            .collect();
        let (dispatch_tx, dispatch_rx) = channel();
        Self {
            state,
            controllers,
            actions,
            definitions: Vec::new(),
            triggered: Arc::new(Mutex::new(BTreeSet::new())),
            dispatch_tx,
            dispatch_rx: Some(dispatch_rx),
            worker: None,
        }
    }
    /// Stores the scenario's event table
    pub fn set_event_definitions(&mut self, definitions: Vec<EventDefinition>) {
        self.definitions = definitions;
    }
    /// Subscribes a forwarding callback on the bus for every event in the table
    pub fn setup_event_handlers(&self, bus: &EventBus) {
        for def in &self.definitions {
            let tx = self.dispatch_tx.clone();
            let name = def.name.clone();
            bus.subscribe(&def.name, move |_, _| {
                let _ = tx.push(ManagerMessage::Event(name.clone()));
            });
        }
    }
    /// A controller handle by roster name
    pub fn controller(&self, name: &str) -> Option<&Controller> {
        self.controllers.get(name)
    }
    /// Has the named event been dispatched already
    pub fn is_event_triggered(&self, name: &str) -> bool {
        self.triggered.lock().contains(name)
    }
    /// Stops every controller worker
    pub fn stop_all(&self) {
        for controller in self.controllers.values() {
            controller.stop();
        }
    }
    /// Spawns the dispatch worker
    pub fn start(&mut self) -> Result<()> {
        let rx = self
            .dispatch_rx
            .take()
            .ok_or_else(|| Error::failed("controller manager already started"))?;
        let dispatcher = Dispatcher {
            state: self.state.clone(),
            controllers: self.controllers.clone(),
            actions: self.actions.clone(),
            definitions: self.definitions.clone(),
            triggered: self.triggered.clone(),
        };
        self.worker = Some(
            thread::Builder::new()
                .name("ctl-dispatch".into())
                .spawn(move || dispatcher.run(rx))?,
        );
        Ok(())
    }
    /// Stops every controller, then shuts down and joins the dispatch worker
    pub fn join(&mut self) {
        self.stop_all();
        if let Some(worker) = self.worker.take() {
            let _ = self.dispatch_tx.push(ManagerMessage::Shutdown);
            let _ = worker.join();
        }
    }
}

struct Dispatcher {
    state: SharedState,
    controllers: BTreeMap<Arc<str>, Controller>,
    actions: ActionConfig,
    definitions: Vec<EventDefinition>,
    triggered: Arc<Mutex<BTreeSet<Arc<str>>>>,
}

impl Dispatcher {
    fn run(self, rx: crate::queue::Receiver<ManagerMessage>) {
        while let Ok(message) = rx.recv() {
            match message {
                ManagerMessage::Event(name) => self.handle_event(&name),
                ManagerMessage::Shutdown => break,
            }
        }
        debug!("controller manager dispatch worker exiting");
    }
    fn handle_event(&self, name: &Arc<str>) {
        {
            let mut triggered = self.triggered.lock();
            if !triggered.insert(name.clone()) {
                debug!("event `{}` already handled, ignoring", name);
                return;
            }
        }
        let Some(def) = self.definitions.iter().find(|d| d.name == *name) else {
            warn!(event = %name, "no definition for event");
            return;
        };
        info!(event = %name, actions = def.actions.len(), "executing event actions");
        for action in &def.actions {
            self.execute(*action);
        }
    }
    fn execute(&self, action: ControllerAction) {
        let Some(entry) = self.actions.get(action).cloned() else {
            warn!("no configuration for action `{}`", action);
            return;
        };
        self.apply_settings(action, &entry.settings);
        match entry.action_type {
            ActionType::Mode => match entry.settings.get("flight_mode") {
                Some(value) => match value.parse::<FlightMode>() {
                    Ok(mode) => {
                        self.state.set_flight_mode(mode);
                        info!("flight mode switched to {}", mode);
                    }
                    Err(e) => warn!("action `{}`: {}", action, e),
                },
                None => warn!("action `{}`: missing flight_mode setting", action),
            },
            ActionType::StopAll => {
                info!("stopping all controllers");
                for controller in self.controllers.values() {
                    controller.stop();
                }
            }
            ActionType::Controller => {
                let Some(controller) = self.controllers.get(entry.controller.as_str()) else {
                    warn!(
                        "action `{}`: unknown controller `{}`",
                        action, entry.controller
                    );
                    return;
                };
                if action.is_start() {
                    if let Err(e) = self.check_authority(controller) {
                        warn!("action `{}` denied: {}", action, e);
                        return;
                    }
                    if let Err(e) = controller.start() {
                        warn!("action `{}`: failed to start worker: {}", action, e);
                    }
                } else if action.is_stop() {
                    controller.stop();
                }
            }
        }
    }
    fn apply_settings(&self, action: ControllerAction, settings: &BTreeMap<String, String>) {
        for (key, value) in settings {
            match key.as_str() {
                "flight_mode" => {} // handled by the Mode action type
                "throttle_control_enabled" => match parse_bool(value) {
                    Ok(v) => self.state.set_throttle_control_enabled(v),
                    Err(e) => warn!("action `{}`: {}", action, e),
                },
                "brake_control_enabled" => match parse_bool(value) {
                    Ok(v) => self.state.set_brake_control_enabled(v),
                    Err(e) => warn!("action `{}`: {}", action, e),
                },
                "cruise_control_enabled" => match parse_bool(value) {
                    Ok(v) => self.state.set_cruise_control_enabled(v),
                    Err(e) => warn!("action `{}`: {}", action, e),
                },
                "pitch_control_enabled" => match parse_bool(value) {
                    Ok(v) => self.state.set_pitch_control_enabled(v),
                    Err(e) => warn!("action `{}`: {}", action, e),
                },
                "final_stop_enabled" => match parse_bool(value) {
                    Ok(v) => self.state.set_final_stop_enabled(v),
                    Err(e) => warn!("action `{}`: {}", action, e),
                },
                "pitch_target" => match value.parse::<f64>() {
                    Ok(v) => self.state.set_pitch_target(v),
                    Err(e) => warn!("action `{}`: bad pitch_target: {}", action, e),
                },
                _ => warn!("action `{}`: unknown state setting `{}`", action, key),
            }
        }
    }
    fn check_authority(&self, controller: &Controller) -> Result<()> {
        let authority = self.state.authority();
        let granted = match controller.kind() {
            ControlKind::ThrottleInc | ControlKind::ThrottleDec | ControlKind::Cruise => {
                authority.auto_throttle
            }
            ControlKind::Brake => authority.auto_brake,
            ControlKind::PitchHold => true,
        };
        if granted {
            Ok(())
        } else {
            Err(Error::AuthorityDenied(controller.name().into()))
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(Error::invalid_data(format!("bad boolean `{}`", value))),
    }
}
