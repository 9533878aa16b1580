use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use object_id::UniqueId;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::clock::SimClock;
use crate::recorder::Recorder;
use crate::state::SharedState;
use crate::{Error, Result};

/// A single write produced by a controller or the integrator, applied to [`SharedState`]
/// by the state manager
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum StateUpdate {
    /// New position [m]
    Position(f64),
    /// New velocity [m/s]
    Velocity(f64),
    /// New acceleration [m/s²]
    Acceleration(f64),
    /// New throttle setting [0..1]
    Throttle(f64),
    /// New brake setting [0..1]
    Brake(f64),
}

struct Channel<T>(Arc<ChannelInner<T>>);

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Channel<T> {
    fn id(&self) -> usize {
        self.0.id.as_usize()
    }
}

struct ChannelInner<T> {
    id: UniqueId,
    shared: Mutex<Shared<T>>,
    data_available: Condvar,
}

struct Shared<T> {
    queue: VecDeque<T>,
    senders: usize,
    receivers: usize,
}

impl<T> ChannelInner<T> {
    fn push(&self, value: T) -> Result<()> {
        let mut shared = self.shared.lock();
        if shared.receivers == 0 {
            return Err(Error::ChannelClosed);
        }
        shared.queue.push_back(value);
        self.data_available.notify_one();
        Ok(())
    }
    fn recv(&self) -> Result<T> {
        let mut shared = self.shared.lock();
        loop {
            if let Some(value) = shared.queue.pop_front() {
                return Ok(value);
            } else if shared.senders == 0 {
                return Err(Error::ChannelClosed);
            }
            self.data_available.wait(&mut shared);
        }
    }
    fn try_recv(&self) -> Result<T> {
        let mut shared = self.shared.lock();
        if let Some(value) = shared.queue.pop_front() {
            Ok(value)
        } else if shared.senders == 0 {
            Err(Error::ChannelClosed)
        } else {
            Err(Error::ChannelEmpty)
        }
    }
}

/// The producer side of a [`channel`]. Push never blocks
pub struct Sender<T> {
    channel: Channel<T>,
}

impl<T> Sender<T> {
    /// Pushes a value. Fails only when every receiver is gone
    #[inline]
    pub fn push(&self, value: T) -> Result<()> {
        self.channel.0.push(value)
    }
    /// Number of queued values
    #[inline]
    pub fn len(&self) -> usize {
        self.channel.0.shared.lock().queue.len()
    }
    /// Is the queue empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channel.0.shared.lock().queue.is_empty()
    }
    /// Is at least one receiver alive
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.channel.0.shared.lock().receivers > 0
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        self.channel.0.shared.lock().senders += 1;
        Self {
            channel: self.channel.clone(),
        }
    }
}

impl<T> PartialEq for Sender<T> {
    fn eq(&self, other: &Self) -> bool {
        self.channel.id() == other.channel.id()
    }
}

impl<T> Drop for Sender<T> {
    fn drop(&mut self) {
        let mut shared = self.channel.0.shared.lock();
        shared.senders -= 1;
        if shared.senders == 0 {
            self.channel.0.data_available.notify_all();
        }
    }
}

/// The consumer side of a [`channel`]
pub struct Receiver<T> {
    channel: Channel<T>,
}

impl<T> Receiver<T> {
    /// Receives a value, blocking while the queue is empty and senders are alive
    #[inline]
    pub fn recv(&self) -> Result<T> {
        self.channel.0.recv()
    }
    /// Receives a value without blocking
    #[inline]
    pub fn try_recv(&self) -> Result<T> {
        self.channel.0.try_recv()
    }
    /// Number of queued values
    #[inline]
    pub fn len(&self) -> usize {
        self.channel.0.shared.lock().queue.len()
    }
    /// Is the queue empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.channel.0.shared.lock().queue.is_empty()
    }
}

impl<T> Iterator for Receiver<T> {
    type Item = T;
    fn next(&mut self) -> Option<Self::Item> {
        self.recv().ok()
    }
}

impl<T> PartialEq for Receiver<T> {
    fn eq(&self, other: &Self) -> bool {
        self.channel.id() == other.channel.id()
    }
}

impl<T> Drop for Receiver<T> {
    fn drop(&mut self) {
        self.channel.0.shared.lock().receivers -= 1;
    }
}

/// Creates an unbounded multi-producer/single-consumer channel with non-blocking push
pub fn channel<T>() -> (Sender<T>, Receiver<T>) {
    let ch = Channel(
        ChannelInner {
            id: <_>::default(),
            shared: Mutex::new(Shared {
                queue: VecDeque::new(),
                senders: 1,
                receivers: 1,
            }),
            data_available: Condvar::new(),
        }
        .into(),
    );
    (
        Sender {
            channel: ch.clone(),
        },
        Receiver { channel: ch },
    )
}

/// Creates the state-update channel
pub fn update_channel() -> (Sender<StateUpdate>, Receiver<StateUpdate>) {
    channel()
}

/// The state-manager worker: drains the update channel once per tick, applies every write to
/// [`SharedState`], runs the optional derived-state hook, commits the versioned snapshot and
/// feeds the per-tick recorder.
pub struct StateManager {
    state: SharedState,
    clock: SimClock,
    rx: Receiver<StateUpdate>,
    recorder: Option<Recorder>,
    derived_hook: Option<Box<dyn Fn(&SharedState) + Send>>,
}

impl StateManager {
    /// Creates a state manager over the given channel consumer
    pub fn new(state: SharedState, clock: SimClock, rx: Receiver<StateUpdate>) -> Self {
        Self {
            state,
            clock,
            rx,
            recorder: None,
            derived_hook: None,
        }
    }
    /// Attaches the per-tick CSV recorder
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }
    /// Attaches a derived-state hook, run after every drain and before the snapshot commit
    pub fn with_derived_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&SharedState) + Send + 'static,
    {
        self.derived_hook = Some(Box::new(hook));
        self
    }
    fn apply(&self, update: StateUpdate) {
        match update {
            StateUpdate::Position(v) => self.state.set_position(v),
            StateUpdate::Velocity(v) => self.state.set_velocity(v),
            StateUpdate::Acceleration(v) => self.state.set_acceleration(v),
            StateUpdate::Throttle(v) => self.state.set_throttle(v),
            StateUpdate::Brake(v) => self.state.set_brake(v),
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
            let mut applied = 0usize;
            loop {
                match self.rx.try_recv() {
                    Ok(update) => {
                        self.apply(update);
                        applied += 1;
                    }
                    Err(Error::ChannelEmpty) => break,
                    Err(_) => {
                        warn!("state-update channel closed, state manager exiting");
                        return;
                    }
                }
            }
            if let Some(ref hook) = self.derived_hook {
                hook(&self.state);
            }
            let snapshot = self.state.build_snapshot(self.clock.current_time());
            self.state.commit_snapshot(snapshot);
            if let Some(ref mut recorder) = self.recorder {
                recorder.record(&snapshot);
            }
            debug!(
                "tick {}: applied {} updates, v={:.3} x={:.3}",
                step, applied, snapshot.velocity, snapshot.position
            );
            self.clock.notify_step_completed();
        }
        if let Some(ref mut recorder) = self.recorder {
            recorder.flush();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;

    #[test]
    fn test_channel_push_try_recv() {
        let (tx, rx) = update_channel();
        tx.push(StateUpdate::Throttle(0.5)).unwrap();
        tx.push(StateUpdate::Velocity(3.0)).unwrap();
        assert_eq!(rx.try_recv().unwrap(), StateUpdate::Throttle(0.5));
        assert_eq!(rx.try_recv().unwrap(), StateUpdate::Velocity(3.0));
        assert!(matches!(rx.try_recv(), Err(Error::ChannelEmpty)));
    }

    #[test]
    fn test_channel_closed_on_receiver_drop() {
        let (tx, rx) = update_channel();
        drop(rx);
        assert!(matches!(
            tx.push(StateUpdate::Brake(1.0)),
            Err(Error::ChannelClosed)
        ));
    }

    #[test]
    fn test_channel_closed_on_senders_gone() {
        let (tx, rx) = channel::<u32>();
        let tx2 = tx.clone();
        tx2.push(7).unwrap();
        drop(tx);
        drop(tx2);
        assert_eq!(rx.try_recv().unwrap(), 7);
        assert!(matches!(rx.try_recv(), Err(Error::ChannelClosed)));
    }

    #[test]
    fn test_channel_blocking_recv() {
        let (tx, rx) = channel::<u32>();
        let handle = thread::spawn(move || rx.recv().unwrap());
        tx.push(42).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
    }

    #[test]
    fn test_channel_identity() {
        let (tx, _rx) = channel::<u32>();
        let tx2 = tx.clone();
        assert!(tx == tx2);
        let (tx3, _rx3) = channel::<u32>();
        assert!(tx != tx3);
    }

    #[test]
    fn test_manager_applies_and_commits_one_tick() {
        let state = SharedState::new();
        let clock = SimClock::new(0.01);
        let (tx, rx) = update_channel();
        tx.push(StateUpdate::Velocity(5.0)).unwrap();
        tx.push(StateUpdate::Position(0.05)).unwrap();
        tx.push(StateUpdate::Throttle(1.7)).unwrap();
        let manager = StateManager::new(state.clone(), clock.clone(), rx);
        let worker = thread::spawn(move || manager.run());
        let driver = {
            let clock = clock.clone();
            thread::spawn(move || clock.run())
        };
        while state.state_version() == 0 {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        clock.stop();
        driver.join().unwrap();
        worker.join().unwrap();
        assert_eq!(state.velocity(), 5.0);
        assert_eq!(state.position(), 0.05);
        // saturated on apply
        assert_eq!(state.throttle(), 1.0);
        assert!(state.state_version() >= 1);
        let snap = state.snapshot();
        assert!((snap.time - snap.version as f64 * 0.01).abs() < 1e-9);
    }
}
