//! End-to-end scenario runs over the full worker stack: clock barrier, state manager,
//! event monitor, controller manager, dynamics and watchdog.

use std::thread::{self, JoinHandle};
use std::time::Instant;

use runwaysim::prelude::*;

const WALL_TIMEOUT: Duration = Duration::from_secs(120);

struct Harness {
    state: SharedState,
    clock: SimClock,
    bus: EventBus,
    manager: ControllerManager,
    workers: Vec<JoinHandle<()>>,
}

impl Harness {
    fn launch(kind: ScenarioKind, cfg: ScenarioConfig) -> Self {
        runwaysim::configure_logger(runwaysim::LevelFilter::Info);
        let state = SharedState::with_init(|s| {
            seed_state(s, &cfg, kind);
            Ok(())
        })
        .unwrap();
        let clock = SimClock::new(cfg.simulation_time_step);
        let (tx, rx) = update_channel();
        let bus = EventBus::new().start_workers(4).unwrap();
        let events = events_for(kind, &cfg);
        let mut manager = ControllerManager::new(
            state.clone(),
            clock.clone(),
            tx.clone(),
            &cfg,
            ActionConfig::default(),
        );
        manager.set_event_definitions(events.clone());
        manager.setup_event_handlers(&bus);
        manager.start().unwrap();

        let state_manager = StateManager::new(state.clone(), clock.clone(), rx);
        let monitor = EventMonitor::new(state.clone(), clock.clone(), bus.clone(), events);
        let dynamics = Dynamics::new(
            state.clone(),
            clock.clone(),
            tx,
            AircraftConfig::default(),
            ForceModel::Linear,
        );
        let watchdog = Watchdog::new(state.clone(), clock.clone(), cfg);

        let mut workers = vec![
            thread::spawn(move || state_manager.run()),
            thread::spawn(move || monitor.run()),
            thread::spawn(move || dynamics.run()),
            thread::spawn(move || watchdog.run()),
        ];
        while clock.registered_workers() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        {
            let clock = clock.clone();
            workers.push(thread::spawn(move || clock.run()));
        }
        Self {
            state,
            clock,
            bus,
            manager,
            workers,
        }
    }
    /// Blocks until the watchdog ends the run
    fn wait_finished(&self) {
        let started = Instant::now();
        while self.state.is_simulation_running() && self.clock.is_running() {
            assert!(
                started.elapsed() < WALL_TIMEOUT,
                "scenario did not finish: t={:.2} x={:.1} v={:.2}",
                self.state.simulation_time(),
                self.state.position(),
                self.state.velocity()
            );
            thread::sleep(Duration::from_millis(5));
        }
    }
    fn shutdown(mut self) {
        self.clock.stop();
        self.manager.join();
        self.bus.stop();
        for worker in self.workers {
            worker.join().unwrap();
        }
    }
}

/// A short taxi strip so the run completes in a couple of thousand ticks
fn short_taxi_config() -> ScenarioConfig {
    ScenarioConfig {
        brake_position: 50.0,
        throttle_start_time: 0.5,
        zero_velocity_threshold: 0.5,
        max_simulation_time: 120.0,
        ..ScenarioConfig::default()
    }
}

#[test]
fn taxi_scenario_runs_to_final_stop() {
    let harness = Harness::launch(ScenarioKind::Taxi, short_taxi_config());
    harness.wait_finished();

    // the full event chain fired, once each
    for event in ["START_THROTTLE", "BEGIN_BRAKING", "FINAL_STOP"] {
        assert!(
            harness.manager.is_event_triggered(event),
            "event {} did not fire",
            event
        );
        assert_eq!(harness.bus.stats(event).unwrap().total, 1, "event {}", event);
    }
    // the vehicle rolled past the braking mark and stopped
    let snapshot = harness.state.snapshot();
    assert!(snapshot.position >= 50.0, "x = {}", snapshot.position);
    assert!(snapshot.velocity <= 0.5, "v = {}", snapshot.velocity);
    // FINAL_STOP handed control back and entered the stop phase
    assert_eq!(harness.state.flight_mode(), FlightMode::Manual);
    assert!(harness.state.is_final_stop_enabled());
    // invariants after the run
    assert!(snapshot.throttle >= 0.0 && snapshot.throttle <= 1.0);
    assert!(snapshot.brake >= 0.0 && snapshot.brake <= 1.0);
    assert!(harness.state.state_version() > 0);
    harness.shutdown();
}

#[test]
fn abort_takeoff_latches_once() {
    let cfg = ScenarioConfig {
        abort_speed: 15.0,
        throttle_start_time: 0.5,
        zero_velocity_threshold: 0.5,
        // far beyond the stop point: the post-abort cruise leg never starts
        cruise_resume_position: 10_000.0,
        max_simulation_time: 120.0,
        max_position: 10_500.0,
        ..ScenarioConfig::default()
    };
    let harness = Harness::launch(ScenarioKind::AbortTakeoff, cfg);
    harness.wait_finished();

    assert!(harness.manager.is_event_triggered("ABORT_TAKEOFF"));
    // the abort fired exactly once even though velocity fell back below the
    // threshold afterwards
    assert_eq!(harness.bus.stats("ABORT_TAKEOFF").unwrap().total, 1);
    assert!(!harness.manager.is_event_triggered("CRUISE_AFTER_ABORT"));
    assert!(harness.manager.is_event_triggered("FINAL_STOP"));
    let snapshot = harness.state.snapshot();
    assert!(snapshot.velocity <= 0.5, "v = {}", snapshot.velocity);
    // the abort braking started only after the decision speed was reached
    assert!(snapshot.position > 0.0);
    harness.shutdown();
}

#[test]
fn abort_takeoff_cruise_leg_engages() {
    let cfg = ScenarioConfig {
        abort_speed: 15.0,
        throttle_start_time: 0.5,
        zero_velocity_threshold: 0.5,
        // just past the abort point: the vehicle is still rolling when it clears it
        cruise_resume_position: 40.0,
        cruise_speed: 8.0,
        // the cruise leg holds speed forever, so the run ends on the position limit
        max_position: 300.0,
        max_simulation_time: 120.0,
        ..ScenarioConfig::default()
    };
    let harness = Harness::launch(ScenarioKind::AbortTakeoff, cfg);
    harness.wait_finished();

    assert!(harness.manager.is_event_triggered("ABORT_TAKEOFF"));
    assert!(harness.manager.is_event_triggered("CRUISE_AFTER_ABORT"));
    let cruise = harness.manager.controller("cruise_runway").unwrap();
    assert!(harness.state.is_cruise_control_enabled());
    // cruise was driving the vehicle when the watchdog cut the run
    let snapshot = harness.state.snapshot();
    assert!(snapshot.position > 300.0 - 50.0, "x = {}", snapshot.position);
    assert!(cruise.current_value() >= 0.0);
    harness.shutdown();
}

#[test]
fn authority_gate_blocks_manual_mode_brake() {
    // manual mode: a START_BRAKE action applies its state settings but must not start the
    // worker, so no brake force ever develops
    let cfg = ScenarioConfig {
        throttle_start_time: 10_000.0, // keep the scenario's own events out of the way
        max_simulation_time: 1.0,
        ..ScenarioConfig::default()
    };
    let harness = Harness::launch(ScenarioKind::Taxi, cfg);
    assert_eq!(harness.state.flight_mode(), FlightMode::Manual);
    harness.bus.publish("BEGIN_BRAKING", "");
    let started = Instant::now();
    while !harness.manager.is_event_triggered("BEGIN_BRAKING") {
        assert!(started.elapsed() < WALL_TIMEOUT);
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(20));
    // settings applied, worker denied
    assert!(harness.state.is_brake_control_enabled());
    assert!(!harness.manager.controller("brake").unwrap().is_active());
    assert_eq!(harness.state.brake_force(), 0.0);
    harness.wait_finished();
    harness.shutdown();
}
