//! Main-context result handoff.
//!
//! Background code never mutates producer-owned state. It submits callbacks
//! through a `ResultSink`; the owning context runs them on its own thread, in
//! submission order, the next time it calls `MainContext::tick`.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};

/// Deferred mutation of the owning context's state.
pub type Callback<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Thread-safe, fire-and-forget submission into an owning context.
pub trait ResultSink<S>: Send + Sync {
    /// Queue `callback` for the owning context. Never runs it synchronously.
    fn submit(&self, callback: Callback<S>);
}

/// Create a connected sender/context pair.
pub fn main_context<S>() -> (ContextSender<S>, MainContext<S>) {
    let (tx, rx) = mpsc::channel();
    (
        ContextSender { tx },
        MainContext {
            rx,
            ticks: 0,
            applied: 0,
        },
    )
}

/// Submitting half. Cloneable and usable from any thread.
pub struct ContextSender<S> {
    tx: Sender<Callback<S>>,
}

impl<S> Clone for ContextSender<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: 'static> ResultSink<S> for ContextSender<S> {
    fn submit(&self, callback: Callback<S>) {
        if self.tx.send(callback).is_err() {
            log::debug!("main context closed; callback discarded");
        }
    }
}

/// Owning half. Lives on the producer's thread and is the only place callbacks run.
pub struct MainContext<S> {
    rx: Receiver<Callback<S>>,
    ticks: u64,
    applied: u64,
}

impl<S> MainContext<S> {
    /// Run every pending callback against `state`, oldest first.
    ///
    /// Returns how many callbacks ran during this tick.
    pub fn tick(&mut self, state: &mut S) -> usize {
        self.ticks += 1;
        let mut ran = 0;
        loop {
            match self.rx.try_recv() {
                Ok(callback) => {
                    callback(state);
                    ran += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.applied += ran as u64;
        ran
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Callbacks applied over the context's lifetime.
    pub fn applied(&self) -> u64 {
        self.applied
    }
}
