//! Single-consumer background task queue.
//!
//! `Worker::spawn` starts one named thread that drains a FIFO of deferred tasks.
//! Producers enqueue through cloneable `TaskQueue` handles from any thread.
//! Tasks run one at a time, outside the queue lock, in enqueue order. A task
//! that fails or panics is logged and discarded; the loop keeps going.

use anyhow::{anyhow, Context, Result};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Deferred unit of work.
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

#[derive(Clone, Debug, Default)]
pub struct WorkerConfig {
    /// Maximum pending tasks. `None` is unbounded. When full, the oldest pending
    /// task is dropped to make room.
    pub capacity: Option<usize>,
}

/// Counters for one worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub panicked: u64,
    pub dropped: u64,
    pub pending: usize,
}

struct QueueState {
    tasks: VecDeque<Task>,
    in_flight: bool,
    stopping: bool,
}

#[derive(Default)]
struct Counters {
    enqueued: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    dropped: AtomicU64,
}

struct Shared {
    name: String,
    capacity: Option<usize>,
    state: Mutex<QueueState>,
    /// Readiness signal: waited on while the queue is empty.
    ready: Condvar,
    /// Signalled when the queue is empty and nothing is running.
    idle: Condvar,
    counters: Counters,
}

impl Shared {
    // No task code runs under this lock, so a poisoned guard still holds a
    // consistent queue.
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Producer-side handle to a worker's queue.
#[derive(Clone)]
pub struct TaskQueue {
    shared: Arc<Shared>,
}

impl TaskQueue {
    /// Append a task to the tail of the queue and wake the worker.
    ///
    /// Returns immediately; the task runs later on the worker thread. After the
    /// worker has stopped, tasks are discarded.
    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let shared = &self.shared;
        let evicted: Option<Task>;
        {
            let mut state = shared.lock();
            if state.stopping {
                drop(state);
                shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("worker '{}' stopped; task discarded", shared.name);
                return;
            }
            evicted = match shared.capacity {
                Some(cap) if state.tasks.len() >= cap => state.tasks.pop_front(),
                _ => None,
            };
            state.tasks.push_back(Box::new(task));
        }
        shared.counters.enqueued.fetch_add(1, Ordering::Relaxed);
        shared.ready.notify_one();

        if let Some(evicted) = evicted {
            shared.counters.dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "worker '{}' queue full; dropped oldest pending task",
                shared.name
            );
            drop(evicted);
        }
    }

    /// Block until the queue is empty and no task is running, or `timeout` elapses.
    ///
    /// Returns true when idle was reached.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();
        while !state.tasks.is_empty() || state.in_flight {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .shared
                .idle
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn stats(&self) -> WorkerStats {
        let pending = self.shared.lock().tasks.len();
        let c = &self.shared.counters;
        WorkerStats {
            enqueued: c.enqueued.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            panicked: c.panicked.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            pending,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopping
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }
}

/// Owner of the worker thread.
pub struct Worker {
    queue: TaskQueue,
    join: Option<JoinHandle<()>>,
}

impl Worker {
    /// Start the worker thread.
    pub fn spawn(name: &str, config: WorkerConfig) -> Result<Self> {
        if config.capacity == Some(0) {
            return Err(anyhow!("worker capacity must be at least 1"));
        }
        let shared = Arc::new(Shared {
            name: name.to_string(),
            capacity: config.capacity,
            state: Mutex::new(QueueState {
                tasks: VecDeque::new(),
                in_flight: false,
                stopping: false,
            }),
            ready: Condvar::new(),
            idle: Condvar::new(),
            counters: Counters::default(),
        });
        let thread_shared = shared.clone();
        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_worker(thread_shared))
            .with_context(|| format!("failed to spawn worker thread '{}'", name))?;
        log::debug!("worker '{}' started", name);

        Ok(Self {
            queue: TaskQueue { shared },
            join: Some(join),
        })
    }

    /// A cloneable producer handle.
    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    pub fn enqueue<F>(&self, task: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.queue.enqueue(task)
    }

    pub fn stats(&self) -> WorkerStats {
        self.queue.stats()
    }

    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Stop after the in-flight task, discard pending tasks and join the thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let shared = &self.queue.shared;
        let pending: Vec<Task> = {
            let mut state = shared.lock();
            state.stopping = true;
            state.tasks.drain(..).collect()
        };
        shared.ready.notify_all();
        shared.idle.notify_all();
        if !pending.is_empty() {
            shared
                .counters
                .dropped
                .fetch_add(pending.len() as u64, Ordering::Relaxed);
            log::debug!(
                "worker '{}' stopping; {} pending tasks discarded",
                shared.name,
                pending.len()
            );
        }
        drop(pending);

        if let Some(join) = self.join.take() {
            if join.thread().id() == thread::current().id() {
                log::warn!(
                    "worker '{}' stopped from its own thread; not joining",
                    shared.name
                );
                return Ok(());
            }
            join.join()
                .map_err(|_| anyhow!("worker '{}' thread panicked", shared.name))?;
            log::debug!("worker '{}' joined", shared.name);
        }
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.join.is_some() {
            if let Err(err) = self.shutdown() {
                log::error!("{}", err);
            }
        }
    }
}

fn run_worker(shared: Arc<Shared>) {
    while let Some(task) = next_task(&shared) {
        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => {
                shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                log::warn!("worker '{}': task failed: {:#}", shared.name, err);
            }
            Err(payload) => {
                shared.counters.panicked.fetch_add(1, Ordering::Relaxed);
                log::error!(
                    "worker '{}': task panicked: {}",
                    shared.name,
                    panic_message(payload.as_ref())
                );
            }
        }
        finish_task(&shared);
    }
    log::debug!("worker '{}' exiting", shared.name);
}

/// Wait for readiness and dequeue one task. `None` once stop is requested.
fn next_task(shared: &Shared) -> Option<Task> {
    let mut state = shared.lock();
    loop {
        if state.stopping {
            return None;
        }
        if let Some(task) = state.tasks.pop_front() {
            state.in_flight = true;
            return Some(task);
        }
        state = shared
            .ready
            .wait(state)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

fn finish_task(shared: &Shared) {
    let mut state = shared.lock();
    state.in_flight = false;
    if state.tasks.is_empty() {
        shared.idle.notify_all();
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
