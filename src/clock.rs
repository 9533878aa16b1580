use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bma_ts::Monotonic;
use parking_lot::{Condvar, Mutex};

/// The default simulation time step, in seconds
pub const DEFAULT_TIME_STEP: f64 = 0.01;

/// The simulation clock: a single tick-barrier time authority.
///
/// Simulated time advances only after every registered worker has reported completion of the
/// current step. The handle can be cloned and shared with no limitations.
///
/// The barrier contract for every registered worker, per tick: call
/// [`SimClock::wait_for_next_step`], perform at most one step of work, then call
/// [`SimClock::notify_step_completed`] exactly once. A worker which leaves its loop releases
/// its slot by dropping the [`Registration`] guard, which re-notifies the barrier.
pub struct SimClock {
    inner: Arc<ClockInner>,
}

impl Clone for SimClock {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct ClockInner {
    barrier: Mutex<Barrier>,
    step_start: Condvar,
    step_end: Condvar,
    dt_bits: AtomicU64,
    time_bits: AtomicU64,
    steps: AtomicU64,
    running: AtomicBool,
    realtime: AtomicBool,
    pacer: Mutex<Pacer>,
}

#[derive(Default)]
struct Barrier {
    registered: usize,
    completed: usize,
    paused: bool,
}

impl SimClock {
    /// Creates a new clock with the given time step (seconds)
    pub fn new(dt: f64) -> Self {
        Self {
            inner: ClockInner {
                barrier: Mutex::new(Barrier::default()),
                step_start: Condvar::new(),
                step_end: Condvar::new(),
                dt_bits: AtomicU64::new(dt.to_bits()),
                time_bits: AtomicU64::new(0f64.to_bits()),
                steps: AtomicU64::new(0),
                running: AtomicBool::new(true),
                realtime: AtomicBool::new(false),
                pacer: Mutex::new(Pacer::new(Duration::from_secs_f64(dt))),
            }
            .into(),
        }
    }
    /// Registers a worker with the barrier. The returned guard MUST be held for the whole
    /// worker loop; dropping it (normally or during unwind) unregisters the worker
    pub fn register(&self) -> Registration {
        {
            let mut barrier = self.inner.barrier.lock();
            barrier.registered += 1;
        }
        Registration {
            inner: self.inner.clone(),
        }
    }
    /// Runs the clock-driver loop: prime-advance to step 1, then advance one `dt` every time
    /// the barrier is satisfied. Returns when [`SimClock::stop`] is called
    pub fn run(&self) {
        self.advance();
        loop {
            {
                let mut barrier = self.inner.barrier.lock();
                while self.is_running()
                    && (barrier.registered == 0 || barrier.completed < barrier.registered)
                {
                    self.inner.step_end.wait(&mut barrier);
                }
                if !self.is_running() {
                    break;
                }
                barrier.completed = 0;
                while barrier.paused && self.is_running() {
                    self.inner.step_start.wait(&mut barrier);
                }
                if !self.is_running() {
                    break;
                }
            }
            if self.inner.realtime.load(Ordering::Acquire) {
                self.inner.pacer.lock().tick();
            }
            self.advance();
        }
    }
    fn advance(&self) {
        let t = self.current_time() + self.time_step();
        self.inner.time_bits.store(t.to_bits(), Ordering::Release);
        self.inner.steps.fetch_add(1, Ordering::AcqRel);
        // taking the barrier lock before notifying guarantees no waiter misses the wake-up
        let _barrier = self.inner.barrier.lock();
        self.inner.step_start.notify_all();
    }
    /// Blocks until a step newer than `last_step` is published or the clock stops.
    /// Returns the current step count
    pub fn wait_for_next_step(&self, last_step: u64) -> u64 {
        let mut barrier = self.inner.barrier.lock();
        while self.step_count() <= last_step && self.is_running() {
            self.inner.step_start.wait(&mut barrier);
        }
        self.step_count()
    }
    /// Reports completion of the current step for one registered worker
    pub fn notify_step_completed(&self) {
        let mut barrier = self.inner.barrier.lock();
        barrier.completed += 1;
        self.inner.step_end.notify_all();
    }
    /// Stops the clock and releases every waiter
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        let _barrier = self.inner.barrier.lock();
        self.inner.step_start.notify_all();
        self.inner.step_end.notify_all();
    }
    /// Holds the clock at the current step. Workers stay parked at the step barrier
    pub fn pause(&self) {
        self.inner.barrier.lock().paused = true;
    }
    /// Resumes a paused clock; the next tick advances by exactly one `dt`
    pub fn resume(&self) {
        let mut barrier = self.inner.barrier.lock();
        barrier.paused = false;
        self.inner.step_start.notify_all();
    }
    /// Is the clock paused
    pub fn is_paused(&self) -> bool {
        self.inner.barrier.lock().paused
    }
    /// Is the clock running (not stopped)
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }
    /// The current simulated time, in seconds
    pub fn current_time(&self) -> f64 {
        f64::from_bits(self.inner.time_bits.load(Ordering::Acquire))
    }
    /// The number of published steps
    pub fn step_count(&self) -> u64 {
        self.inner.steps.load(Ordering::Acquire)
    }
    /// The simulation time step, in seconds
    pub fn time_step(&self) -> f64 {
        f64::from_bits(self.inner.dt_bits.load(Ordering::Acquire))
    }
    /// Changes the simulation time step (seconds)
    pub fn set_time_step(&self, dt: f64) {
        self.inner.dt_bits.store(dt.to_bits(), Ordering::Release);
        self.inner.pacer.lock().set_period(Duration::from_secs_f64(dt));
    }
    /// Enables/disables wall-clock pacing: when enabled, the driver sleeps the remainder of
    /// `dt` of wall time between ticks. Disabled by default (barrier-speed)
    pub fn set_realtime(&self, realtime: bool) {
        self.inner.realtime.store(realtime, Ordering::Release);
    }
    /// Number of workers currently registered with the barrier
    pub fn registered_workers(&self) -> usize {
        self.inner.barrier.lock().registered
    }
}

/// RAII barrier slot returned by [`SimClock::register`]
pub struct Registration {
    inner: Arc<ClockInner>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut barrier = self.inner.barrier.lock();
        barrier.registered = barrier.registered.saturating_sub(1);
        // the departing worker may be the one the barrier is waiting for
        self.inner.step_end.notify_all();
    }
}

/// Wall-clock pacer for real-time runs, burst catch-up on missed ticks
struct Pacer {
    next_tick: Option<Monotonic>,
    period: Duration,
}

impl Pacer {
    fn new(period: Duration) -> Self {
        Self {
            next_tick: None,
            period,
        }
    }
    fn set_period(&mut self, period: Duration) {
        self.period = period;
        self.next_tick = None;
    }
    fn tick(&mut self) {
        let now = Monotonic::now();
        if let Some(next_tick) = self.next_tick {
            if now < next_tick {
                thread::sleep(next_tick - now);
            }
            self.next_tick = Some(next_tick + self.period);
        } else {
            self.next_tick = Some(now + self.period);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_barrier_lockstep() {
        let clock = SimClock::new(0.01);
        let mut workers = Vec::new();
        let counters: Vec<Arc<AtomicU64>> = (0..3).map(|_| Arc::new(AtomicU64::new(0))).collect();
        for counter in &counters {
            let clock = clock.clone();
            let counter = counter.clone();
            workers.push(thread::spawn(move || {
                let _reg = clock.register();
                let mut step = 0;
                loop {
                    step = clock.wait_for_next_step(step);
                    if !clock.is_running() {
                        break;
                    }
                    counter.fetch_add(1, Ordering::AcqRel);
                    clock.notify_step_completed();
                }
            }));
        }
        // let workers register before priming the barrier
        while clock.registered_workers() < 3 {
            thread::sleep(Duration::from_millis(1));
        }
        let driver = {
            let clock = clock.clone();
            thread::spawn(move || clock.run())
        };
        while clock.step_count() < 100 {
            thread::sleep(Duration::from_millis(1));
        }
        clock.stop();
        driver.join().unwrap();
        for w in workers {
            w.join().unwrap();
        }
        let steps = clock.step_count();
        // every worker ran once per published step, give or take the final partial tick
        for counter in &counters {
            let n = counter.load(Ordering::Acquire);
            assert!(n >= 99 && n <= steps, "worker ran {} of {} steps", n, steps);
        }
        let time = clock.current_time();
        assert!((time - steps as f64 * 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_empty_registry_publishes_first_step() {
        let clock = SimClock::new(0.01);
        let driver = {
            let clock = clock.clone();
            thread::spawn(move || clock.run())
        };
        thread::sleep(Duration::from_millis(20));
        // prime-advance happened exactly once, then the driver blocked at the barrier
        assert_eq!(clock.step_count(), 1);
        let worker = {
            let clock = clock.clone();
            thread::spawn(move || {
                let _reg = clock.register();
                let mut step = 0;
                for _ in 0..5 {
                    step = clock.wait_for_next_step(step);
                    if !clock.is_running() {
                        break;
                    }
                    clock.notify_step_completed();
                }
            })
        };
        worker.join().unwrap();
        assert!(clock.step_count() >= 5);
        clock.stop();
        driver.join().unwrap();
    }

    #[test]
    fn test_pause_holds_step_count() {
        let clock = SimClock::new(0.01);
        let worker = {
            let clock = clock.clone();
            thread::spawn(move || {
                let _reg = clock.register();
                let mut step = 0;
                loop {
                    step = clock.wait_for_next_step(step);
                    if !clock.is_running() {
                        break;
                    }
                    clock.notify_step_completed();
                }
            })
        };
        while clock.registered_workers() < 1 {
            thread::sleep(Duration::from_millis(1));
        }
        let driver = {
            let clock = clock.clone();
            thread::spawn(move || clock.run())
        };
        while clock.step_count() < 10 {
            thread::sleep(Duration::from_millis(1));
        }
        clock.pause();
        thread::sleep(Duration::from_millis(20));
        let frozen = clock.step_count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.step_count(), frozen);
        clock.resume();
        while clock.step_count() <= frozen {
            thread::sleep(Duration::from_millis(1));
        }
        clock.stop();
        driver.join().unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_registration_drop_releases_barrier() {
        let clock = SimClock::new(0.01);
        {
            let _reg = clock.register();
            assert_eq!(clock.registered_workers(), 1);
        }
        assert_eq!(clock.registered_workers(), 0);
    }

    #[test]
    fn test_set_time_step() {
        let clock = SimClock::new(0.01);
        assert!((clock.time_step() - 0.01).abs() < f64::EPSILON);
        clock.set_time_step(0.05);
        assert!((clock.time_step() - 0.05).abs() < f64::EPSILON);
    }
}
