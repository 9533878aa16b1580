use std::thread::{self, JoinHandle};

use log::info;
use signal_hook::consts::{SIGINT, SIGTERM, SIGUSR1};
use signal_hook::iterator::Signals;

use crate::clock::SimClock;
use crate::state::SharedState;
use crate::Result;

/// A run-control command from the outside world
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ControlSignal {
    /// Toggle the clock between paused and running
    PauseResume,
    /// End the run
    Terminate,
}

/// A source of run-control commands. The scenario runner depends only on this capability,
/// not on any particular console or signal mechanism
pub trait ControlSignalSource: Send {
    /// Blocks until the next command, or returns `None` when the source is exhausted
    fn next_signal(&mut self) -> Option<ControlSignal>;
}

/// POSIX-signal control source: SIGUSR1 toggles pause/resume, SIGINT and SIGTERM terminate
pub struct OsSignalSource {
    signals: Signals,
}

impl OsSignalSource {
    /// Registers the signal handlers
    pub fn new() -> Result<Self> {
        Ok(Self {
            signals: Signals::new([SIGINT, SIGTERM, SIGUSR1])?,
        })
    }
}

impl ControlSignalSource for OsSignalSource {
    fn next_signal(&mut self) -> Option<ControlSignal> {
        self.signals.forever().next().map(|sig| match sig {
            SIGUSR1 => ControlSignal::PauseResume,
            _ => ControlSignal::Terminate,
        })
    }
}

/// The control loop: applies commands from the source to the clock and state until the
/// source ends or a terminate arrives. Blocks inside the source between commands, so the
/// hosting thread is treated as blocking and is not joined on shutdown
pub fn control_loop<S: ControlSignalSource>(mut source: S, clock: SimClock, state: SharedState) {
    while let Some(signal) = source.next_signal() {
        match signal {
            ControlSignal::PauseResume => {
                if clock.is_paused() {
                    info!("resuming simulation");
                    clock.resume();
                } else {
                    info!("pausing simulation");
                    clock.pause();
                }
            }
            ControlSignal::Terminate => {
                info!("terminate requested");
                state.set_simulation_running(false);
                clock.stop();
                break;
            }
        }
    }
}

/// Spawns [`control_loop`] on its own thread
pub fn spawn_control_thread<S>(
    source: S,
    clock: SimClock,
    state: SharedState,
) -> std::io::Result<JoinHandle<()>>
where
    S: ControlSignalSource + 'static,
{
    thread::Builder::new()
        .name("control".into())
        .spawn(move || control_loop(source, clock, state))
}
