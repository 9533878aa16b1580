use std::path::PathBuf;
use std::thread;

use clap::Parser;
use log::info;

use runwaysim::bus::DEFAULT_POOL_WORKERS;
use runwaysim::logging::init_file_logging;
use runwaysim::prelude::*;
use runwaysim::{LevelFilter, Result};

const MAIN_POLL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "runwaysim", about = "Longitudinal flight-dynamics simulation runner")]
struct Cli {
    /// Scenario to run
    #[arg(value_enum, default_value = "taxi")]
    scenario: Scenario,
    /// Scenario config file (default: <scenario>_config.txt)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Action config file
    #[arg(long, default_value = "controller_actions_config.txt")]
    actions: PathBuf,
    /// Output directory for logs and recorded data
    #[arg(long, default_value = "output")]
    output: PathBuf,
    /// Pace the clock against wall time instead of running barrier-speed
    #[arg(long)]
    realtime: bool,
    /// Use the nonlinear force model
    #[arg(long)]
    nonlinear: bool,
    /// Override the simulation time step [s]
    #[arg(long)]
    time_step: Option<f64>,
    /// Log level filter for both sinks
    #[arg(long, default_value = "debug")]
    log_level: LevelFilter,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum Scenario {
    Taxi,
    AbortTakeoff,
}

impl From<Scenario> for ScenarioKind {
    fn from(s: Scenario) -> Self {
        match s {
            Scenario::Taxi => ScenarioKind::Taxi,
            Scenario::AbortTakeoff => ScenarioKind::AbortTakeoff,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_file_logging(&cli.output, cli.log_level)?;
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let kind: ScenarioKind = cli.scenario.into();
    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(format!("{}_config.txt", kind.name())));
    let mut cfg = ScenarioConfig::load(config_path);
    if let Some(dt) = cli.time_step {
        cfg.simulation_time_step = dt;
    }
    let actions = ActionConfig::load(&cli.actions);
    info!("starting scenario `{}` (dt={} s)", kind.name(), cfg.simulation_time_step);

    let state = SharedState::with_init(|s| {
        seed_state(s, &cfg, kind);
        Ok(())
    })?;
    let clock = SimClock::new(cfg.simulation_time_step);
    clock.set_realtime(cli.realtime);
    let (tx, rx) = update_channel();
    let bus = EventBus::new().start_workers(DEFAULT_POOL_WORKERS)?;
    let events = events_for(kind, &cfg);

    let mut manager = ControllerManager::new(
        state.clone(),
        clock.clone(),
        tx.clone(),
        &cfg,
        actions,
    );
    manager.set_event_definitions(events.clone());
    manager.setup_event_handlers(&bus);
    manager.start()?;

    let recorder = Recorder::create(cli.output.join("data.csv"), &state.build_snapshot(0.0))?;
    let state_manager =
        StateManager::new(state.clone(), clock.clone(), rx).with_recorder(recorder);
    let monitor = EventMonitor::new(state.clone(), clock.clone(), bus.clone(), events);
    let model = if cli.nonlinear {
        ForceModel::NonLinear
    } else {
        ForceModel::Linear
    };
    let dynamics = Dynamics::new(
        state.clone(),
        clock.clone(),
        tx,
        AircraftConfig::default(),
        model,
    );
    let watchdog = Watchdog::new(state.clone(), clock.clone(), cfg);

    let mut supervisor = Supervisor::new();
    supervisor.spawn("state-manager", move || state_manager.run())?;
    supervisor.spawn("event-monitor", move || monitor.run())?;
    supervisor.spawn("dynamics", move || dynamics.run())?;
    supervisor.spawn("watchdog", move || watchdog.run())?;
    {
        let clock = clock.clone();
        supervisor.spawn("clock-driver", move || clock.run())?;
    }
    let signal_source = OsSignalSource::new()?;
    supervisor.spawn_blocking("control", {
        let clock = clock.clone();
        let state = state.clone();
        move || control_loop(signal_source, clock, state)
    })?;

    info!("all workers started, simulation running");
    while state.is_simulation_running() && clock.is_running() {
        thread::sleep(MAIN_POLL);
    }

    clock.stop();
    manager.join();
    bus.stop();
    supervisor.join_all();
    let final_state = state.snapshot();
    info!(
        "scenario `{}` finished: t={:.2} s, x={:.1} m, v={:.2} m/s",
        kind.name(),
        final_state.time,
        final_state.position,
        final_state.velocity
    );
    log::logger().flush();
    Ok(())
}
