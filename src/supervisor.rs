use std::collections::{btree_map, BTreeMap};
use std::mem;
use std::thread::{self, JoinHandle};

use log::warn;
use serde::Serialize;

use crate::{Error, Result};

/// A supervisor object used to manage named worker threads
#[derive(Default, Serialize)]
pub struct Supervisor {
    tasks: BTreeMap<String, Task>,
}

/// A registered worker thread
#[derive(Serialize)]
pub struct Task {
    name: String,
    blocking: bool,
    #[serde(skip_serializing)]
    handle: Option<JoinHandle<()>>,
}

impl Task {
    /// Has the thread finished
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
    /// Is the task marked blocking (parked in a wait the supervisor will not join)
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }
}

impl Supervisor {
    /// Creates an empty supervisor
    pub fn new() -> Self {
        Self::default()
    }
    /// Spawns a new named task and registers it. The task name MUST be unique and SHOULD be
    /// 15 characters or less to set a proper thread name
    pub fn spawn<N, F>(&mut self, name: N, f: F) -> Result<&Task>
    where
        N: Into<String>,
        F: FnOnce() + Send + 'static,
    {
        self.spawn_inner(name.into(), false, f)
    }
    /// Spawns a task which blocks indefinitely (e.g. waits on OS signals) and therefore is
    /// skipped by [`Supervisor::join_all`]
    pub fn spawn_blocking<N, F>(&mut self, name: N, f: F) -> Result<&Task>
    where
        N: Into<String>,
        F: FnOnce() + Send + 'static,
    {
        self.spawn_inner(name.into(), true, f)
    }
    fn spawn_inner<F>(&mut self, name: String, blocking: bool, f: F) -> Result<&Task>
    where
        F: FnOnce() + Send + 'static,
    {
        let btree_map::Entry::Vacant(entry) = self.tasks.entry(name.clone()) else {
            return Err(Error::SupervisorDuplicateTask(name));
        };
        let handle = thread::Builder::new().name(name.clone()).spawn(f)?;
        Ok(entry.insert(Task {
            name,
            blocking,
            handle: Some(handle),
        }))
    }
    /// Gets a task by its name
    pub fn get_task(&self, name: &str) -> Option<&Task> {
        self.tasks.get(name)
    }
    /// Removes a task from the internal registry
    pub fn forget_task(&mut self, name: &str) -> Result<()> {
        if self.tasks.remove(name).is_some() {
            Ok(())
        } else {
            Err(Error::SupervisorTaskNotFound)
        }
    }
    /// Removes all finished tasks from the internal registry
    pub fn purge(&mut self) {
        self.tasks.retain(|_, task| !task.is_finished());
    }
    /// Joins all non-blocking tasks. After the operation the registry is cleared
    pub fn join_all(&mut self) {
        for (name, mut task) in mem::take(&mut self.tasks) {
            if task.blocking {
                continue;
            }
            if let Some(handle) = task.handle.take() {
                if handle.join().is_err() {
                    warn!("task `{}` panicked", name);
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_spawn_join() {
        let mut supervisor = Supervisor::new();
        let done = Arc::new(AtomicBool::new(false));
        {
            let done = done.clone();
            supervisor
                .spawn("worker", move || done.store(true, Ordering::Release))
                .unwrap();
        }
        supervisor.join_all();
        assert!(done.load(Ordering::Acquire));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("dup", || {}).unwrap();
        assert!(matches!(
            supervisor.spawn("dup", || {}),
            Err(Error::SupervisorDuplicateTask(_))
        ));
    }

    #[test]
    fn test_blocking_task_not_joined() {
        let mut supervisor = Supervisor::new();
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        supervisor
            .spawn_blocking("blocker", move || {
                let _ = rx.recv();
            })
            .unwrap();
        // join_all must return immediately despite the parked task
        supervisor.join_all();
        drop(tx);
    }

    #[test]
    fn test_purge() {
        let mut supervisor = Supervisor::new();
        supervisor.spawn("quick", || {}).unwrap();
        while !supervisor.get_task("quick").unwrap().is_finished() {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        supervisor.purge();
        assert!(supervisor.get_task("quick").is_none());
    }
}
