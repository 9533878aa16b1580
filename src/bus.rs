use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, warn};
use object_id::UniqueId;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;

/// The default event queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
/// The default number of callback pool workers
pub const DEFAULT_POOL_WORKERS: usize = 4;

/// Callbacks slower than this are counted in [`EventStats::timeout`]
const SLOW_CALLBACK: Duration = Duration::from_millis(100);

type Callback = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Per-event delivery statistics
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize)]
pub struct EventStats {
    /// Publish attempts
    pub total: u64,
    /// Queue items fully processed (all callbacks ran)
    pub processed: u64,
    /// Publishes dropped on queue overflow
    pub dropped: u64,
    /// Callback runs that exceeded the slow-callback threshold
    pub timeout: u64,
}

/// Identifies a subscription for [`EventBus::unsubscribe`]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct SubscriptionId(usize);

struct Subscription {
    id: UniqueId,
    event: Arc<str>,
    callback: Callback,
}

struct BusEvent {
    name: Arc<str>,
    payload: String,
}

struct BusCore {
    queue: VecDeque<BusEvent>,
    subscriptions: Vec<Subscription>,
    stats: BTreeMap<Arc<str>, EventStats>,
    triggered: BTreeSet<Arc<str>>,
    dropped_events: u64,
}

struct BusInner {
    core: Mutex<BusCore>,
    data_available: Condvar,
    running: AtomicBool,
    capacity: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// In-process event bus: a bounded FIFO drained by a small pool of worker threads which run
/// the subscribed callbacks sequentially per item.
///
/// Callbacks run outside the bus lock, so a callback may publish further events. A panic in a
/// callback is caught, logged and does not affect other callbacks or items. Overflow policy
/// is drop-newest with a counter.
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the default queue capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
    /// Creates a bus with a custom queue capacity
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "event bus capacity MUST be > 0");
        Self {
            inner: BusInner {
                core: Mutex::new(BusCore {
                    queue: VecDeque::new(),
                    subscriptions: Vec::new(),
                    stats: BTreeMap::new(),
                    triggered: BTreeSet::new(),
                    dropped_events: 0,
                }),
                data_available: Condvar::new(),
                running: AtomicBool::new(true),
                capacity,
                workers: Mutex::new(Vec::new()),
            }
            .into(),
        }
    }
    /// Spawns the callback pool. Can be used as a build pattern
    pub fn start_workers(self, count: usize) -> crate::Result<Self> {
        let mut workers = self.inner.workers.lock();
        for i in 0..count {
            let inner = self.inner.clone();
            let handle = thread::Builder::new()
                .name(format!("bus-{}", i))
                .spawn(move || worker_loop(&inner))?;
            workers.push(handle);
        }
        drop(workers);
        Ok(self)
    }
    /// Subscribes a callback to an event name. The callback receives (event, payload)
    pub fn subscribe<F>(&self, event: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let id = UniqueId::default();
        let sid = SubscriptionId(id.as_usize());
        self.inner.core.lock().subscriptions.push(Subscription {
            id,
            event: event.into(),
            callback: Arc::new(callback),
        });
        sid
    }
    /// Removes a subscription
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.inner
            .core
            .lock()
            .subscriptions
            .retain(|s| s.id.as_usize() != id.0);
    }
    /// Publishes an event. On a full queue the event is dropped and counted
    pub fn publish(&self, event: &str, payload: &str) {
        let mut core = self.inner.core.lock();
        let name: Arc<str> = event.into();
        let stats = core.stats.entry(name.clone()).or_default();
        stats.total += 1;
        if core.queue.len() >= self.inner.capacity {
            core.dropped_events += 1;
            if let Some(stats) = core.stats.get_mut(&name) {
                stats.dropped += 1;
            }
            warn!("event queue full, dropping `{}`", event);
            return;
        }
        core.triggered.insert(name.clone());
        core.queue.push_back(BusEvent {
            name,
            payload: payload.to_owned(),
        });
        drop(core);
        self.inner.data_available.notify_one();
    }
    /// Has the event been published at least once since the last [`EventBus::clear`]
    pub fn is_event_triggered(&self, event: &str) -> bool {
        self.inner.core.lock().triggered.contains(event)
    }
    /// Delivery statistics for one event
    pub fn stats(&self, event: &str) -> Option<EventStats> {
        self.inner.core.lock().stats.get(event).copied()
    }
    /// Total events dropped on overflow
    pub fn dropped_events(&self) -> u64 {
        self.inner.core.lock().dropped_events
    }
    /// Drops every queued item, subscription, statistic and trigger mark
    pub fn clear(&self) {
        let mut core = self.inner.core.lock();
        core.queue.clear();
        core.subscriptions.clear();
        core.stats.clear();
        core.triggered.clear();
        core.dropped_events = 0;
    }
    /// Stops and joins the callback pool. Queued items are discarded
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        {
            let _core = self.inner.core.lock();
            self.inner.data_available.notify_all();
        }
        let workers: Vec<_> = self.inner.workers.lock().drain(..).collect();
        for handle in workers {
            let _ = handle.join();
        }
    }
}

fn worker_loop(inner: &BusInner) {
    loop {
        let (event, callbacks) = {
            let mut core = inner.core.lock();
            let event = loop {
                if !inner.running.load(Ordering::Acquire) {
                    return;
                }
                if let Some(event) = core.queue.pop_front() {
                    break event;
                }
                inner.data_available.wait(&mut core);
            };
            let callbacks: Vec<Callback> = core
                .subscriptions
                .iter()
                .filter(|s| s.event == event.name)
                .map(|s| s.callback.clone())
                .collect();
            (event, callbacks)
        };
        for callback in callbacks {
            let started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| callback(&event.name, &event.payload)));
            if result.is_err() {
                warn!("callback for event `{}` panicked", event.name);
            }
            if started.elapsed() > SLOW_CALLBACK {
                warn!("slow callback for event `{}`", event.name);
                if let Some(stats) = inner.core.lock().stats.get_mut(&event.name) {
                    stats.timeout += 1;
                }
            }
        }
        if let Some(stats) = inner.core.lock().stats.get_mut(&event.name) {
            stats.processed += 1;
        }
        debug!("event `{}` processed", event.name);
    }
}
