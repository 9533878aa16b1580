#![ doc = include_str!( concat!( env!( "CARGO_MANIFEST_DIR" ), "/", "README.md" ) ) ]
#![deny(missing_docs)]
use core::fmt;
use std::{num, sync::Arc};

pub use log::LevelFilter;

/// Event bus with a bounded queue and a callback worker pool
pub mod bus;
/// Tick-barrier simulation clock
pub mod clock;
/// Action and scenario configuration files
pub mod config;
/// Per-control-loop workers (throttle, brake, cruise, pitch)
pub mod controllers;
/// Longitudinal force model and integrator worker
pub mod dynamics;
/// Brief/detail file log sinks with console mirror
pub mod logging;
/// Controller roster, action execution and event dispatch
pub mod manager;
/// Clock-synchronized edge-trigger event monitor
pub mod monitor;
/// State-update channel and the state-manager worker
pub mod queue;
/// Fixed-width CSV data recorder
pub mod recorder;
/// Scenario event tables, seed state and the watchdog
pub mod scenario;
/// Pause/resume/terminate control-signal sources
pub mod signals;
/// Shared vehicle/simulation state cell
pub mod state;
/// Named-task supervisor
pub mod supervisor;

/// The crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// The crate error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The channel is closed (all senders/receivers gone)
    #[error("channel closed")]
    ChannelClosed,
    /// Receive attempt failed because the channel is empty
    #[error("channel empty")]
    ChannelEmpty,
    /// An auto controller start was requested without the matching authority bit
    #[error("authority denied for controller `{0}`")]
    AuthorityDenied(Arc<str>),
    /// The named controller is not in the roster
    #[error("unknown controller `{0}`")]
    UnknownController(String),
    /// Configuration file/line errors
    #[error("configuration error: {0}")]
    Config(String),
    /// Shared-state initialization hook failed
    #[error("state initialization failed: {0}")]
    StateInit(String),
    /// Standard I/O errors
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    /// Supervisor error: task name duplicates a registered one
    #[error("task already registered: `{0}`")]
    SupervisorDuplicateTask(String),
    /// Supervisor error: task with the given name is not found
    #[error("task not found")]
    SupervisorTaskNotFound,
    /// Invalid data received / parameters provided
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// All other errors
    #[error("operation failed: {0}")]
    Failed(String),
}

macro_rules! impl_error {
    ($t: ty, $key: ident) => {
        impl From<$t> for Error {
            fn from(err: $t) -> Self {
                Error::$key(err.to_string())
            }
        }
    };
}

impl_error!(num::ParseIntError, InvalidData);
impl_error!(num::ParseFloatError, InvalidData);

impl Error {
    /// Creates new invalid data error
    pub fn invalid_data<S: fmt::Display>(msg: S) -> Self {
        Error::InvalidData(msg.to_string())
    }
    /// Creates new configuration error
    pub fn config<S: fmt::Display>(msg: S) -> Self {
        Error::Config(msg.to_string())
    }
    /// Creates new function failed error
    pub fn failed<S: fmt::Display>(msg: S) -> Self {
        Error::Failed(msg.to_string())
    }
}

/// Configures a console-only stdout logger with the given filter, for tests and ad-hoc
/// runs; scenario runs install the file sinks via [`logging::init_file_logging`] instead.
/// Repeat calls are no-ops, so test binaries may call it once per test
pub fn configure_logger(filter: LevelFilter) {
    let _ = env_logger::Builder::new()
        .target(env_logger::Target::Stdout)
        .filter_level(filter)
        .try_init();
}

/// Prelude module
pub mod prelude {
    pub use crate::bus::EventBus;
    pub use crate::clock::SimClock;
    pub use crate::config::{ActionConfig, ControllerAction, ScenarioConfig};
    pub use crate::controllers::{ControlKind, Controller};
    pub use crate::dynamics::{AircraftConfig, Dynamics, ForceModel};
    pub use crate::manager::ControllerManager;
    pub use crate::monitor::EventMonitor;
    pub use crate::queue::{update_channel, StateManager, StateUpdate};
    pub use crate::recorder::Recorder;
    pub use crate::scenario::{
        events_for, seed_state, EventContext, EventDefinition, ScenarioKind, Watchdog,
    };
    pub use crate::signals::{control_loop, ControlSignal, ControlSignalSource, OsSignalSource};
    pub use crate::state::{FlightMode, SharedState, StateSnapshot};
    pub use crate::supervisor::Supervisor;
    pub use bma_ts::Monotonic;
    pub use std::time::Duration;
}
