use std::collections::BTreeSet;
use std::sync::Arc;

use log::info;

use crate::bus::EventBus;
use crate::clock::SimClock;
use crate::scenario::{EventContext, EventDefinition};
use crate::state::SharedState;

/// The event-monitor worker: once per tick, evaluates every unlatched event definition and
/// publishes the ones whose predicate holds. Definitions latch on first fire (edge trigger),
/// so an event is published at most once per run.
///
/// The monitor latch is advisory: the controller manager keeps its own authoritative latch,
/// and its callbacks are idempotent on first invocation.
pub struct EventMonitor {
    state: SharedState,
    clock: SimClock,
    bus: EventBus,
    definitions: Vec<EventDefinition>,
    latched: BTreeSet<Arc<str>>,
}

impl EventMonitor {
    /// Creates a monitor over the given event table
    pub fn new(
        state: SharedState,
        clock: SimClock,
        bus: EventBus,
        definitions: Vec<EventDefinition>,
    ) -> Self {
        Self {
            state,
            clock,
            bus,
            definitions,
            latched: BTreeSet::new(),
        }
    }
    /// Runs the worker loop until the clock stops
    pub fn run(mut self) {
        let _reg = self.clock.register();
        let mut step = 0;
        loop {
            step = self.clock.wait_for_next_step(step);
            if !self.clock.is_running() {
                break;
            }
            self.evaluate();
            self.clock.notify_step_completed();
        }
    }
    fn evaluate(&mut self) {
        let ctx = EventContext::new(&self.state, &self.bus);
        for def in &self.definitions {
            if self.latched.contains(&def.name) {
                continue;
            }
            if (def.predicate)(&ctx) {
                if def.once {
                    self.latched.insert(def.name.clone());
                }
                info!("event `{}` fired: {}", def.name, def.description);
                self.bus.publish(&def.name, "");
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{ControllerAction, ScenarioConfig};
    use crate::scenario::{events_for, ScenarioKind};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_monitor_latches_once() {
        let state = SharedState::new();
        let clock = SimClock::new(0.01);
        let bus = EventBus::new();
        let defs = vec![EventDefinition::new(
            "OVERSPEED",
            "velocity above limit",
            vec![ControllerAction::StopThrottleIncrease],
            |ctx| ctx.state().velocity() >= 40.0,
        )];
        let monitor = EventMonitor::new(state.clone(), clock.clone(), bus.clone(), defs);
        let worker = thread::spawn(move || monitor.run());
        while clock.registered_workers() < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        let driver = {
            let clock = clock.clone();
            thread::spawn(move || clock.run())
        };
        while clock.step_count() < 5 {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!bus.is_event_triggered("OVERSPEED"));
        // cross the threshold, then fall back below it: one publish, total
        state.set_velocity(45.0);
        let fired_at = clock.step_count();
        while clock.step_count() < fired_at + 5 {
            thread::sleep(Duration::from_millis(1));
        }
        state.set_velocity(10.0);
        thread::sleep(Duration::from_millis(10));
        state.set_velocity(45.0);
        let again = clock.step_count();
        while clock.step_count() < again + 5 {
            thread::sleep(Duration::from_millis(1));
        }
        clock.stop();
        driver.join().unwrap();
        worker.join().unwrap();
        assert!(bus.is_event_triggered("OVERSPEED"));
        assert_eq!(bus.stats("OVERSPEED").unwrap().total, 1);
    }

    #[test]
    fn test_monitor_runs_scenario_table() {
        let state = SharedState::new();
        let clock = SimClock::new(0.01);
        let bus = EventBus::new();
        let defs = events_for(ScenarioKind::Taxi, &ScenarioConfig::default());
        // make the first taxi event eligible immediately
        state.commit_snapshot(state.build_snapshot(2.0));
        let monitor = EventMonitor::new(state.clone(), clock.clone(), bus.clone(), defs);
        let worker = thread::spawn(move || monitor.run());
        while clock.registered_workers() < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        let driver = {
            let clock = clock.clone();
            thread::spawn(move || clock.run())
        };
        while !bus.is_event_triggered("START_THROTTLE") {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(!bus.is_event_triggered("BEGIN_BRAKING"));
        clock.stop();
        driver.join().unwrap();
        worker.join().unwrap();
    }
}
