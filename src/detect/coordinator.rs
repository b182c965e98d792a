//! Detection pass coordination.
//!
//! One pass runs every registered classifier against one frame and hands each
//! result to the main context. Invariant: no two passes run concurrently. The
//! pass lock owns the classifier set, so matchers and their working buffers are
//! only reachable while it is held. Under a single worker thread the queue
//! already serializes passes; the lock is what keeps that true when several
//! workers share one coordinator.

use anyhow::{anyhow, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::context::ResultSink;
use crate::detect::registry::ClassifierSet;
use crate::detect::result::{DetectionParams, DetectionResult, Region};
use crate::frame::FrameBuffer;
use crate::state::DetectionState;
use crate::worker::{panic_message, TaskQueue};

/// How `DetectionCoordinator::schedule` turns frames into tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FramePolicy {
    /// One detection task per frame.
    Every,
    /// At most one pending detection; newer frames replace the pending one.
    #[default]
    Latest,
}

impl FramePolicy {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "every" => Ok(FramePolicy::Every),
            "latest" => Ok(FramePolicy::Latest),
            other => Err(anyhow!(
                "unknown frame policy '{}' (expected 'every' or 'latest')",
                other
            )),
        }
    }
}

/// Outcome of one pass, for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub frame_seq: u64,
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub passes: u64,
    pub coalesced: u64,
}

pub struct DetectionCoordinator {
    pass: Mutex<ClassifierSet>,
    params: DetectionParams,
    sink: Arc<dyn ResultSink<DetectionState>>,
    policy: FramePolicy,
    /// Latest-frame slot. Non-empty only while a scheduled task has not started.
    pending: Mutex<Option<FrameBuffer>>,
    passes: AtomicU64,
    coalesced: AtomicU64,
}

impl DetectionCoordinator {
    pub fn new(
        classifiers: ClassifierSet,
        params: DetectionParams,
        sink: Arc<dyn ResultSink<DetectionState>>,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            pass: Mutex::new(classifiers),
            params,
            sink,
            policy: FramePolicy::default(),
            pending: Mutex::new(None),
            passes: AtomicU64::new(0),
            coalesced: AtomicU64::new(0),
        })
    }

    pub fn with_policy(mut self, policy: FramePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FramePolicy {
        self.policy
    }

    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    pub fn classifier_names(&self) -> Result<Vec<String>> {
        let classifiers = self
            .pass
            .lock()
            .map_err(|_| anyhow!("detection pass lock poisoned"))?;
        Ok(classifiers.names())
    }

    pub fn stats(&self) -> CoordinatorStats {
        CoordinatorStats {
            passes: self.passes.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
        }
    }

    /// Run every classifier against `frame` and submit each result to the sink.
    ///
    /// A classifier that errors or panics is logged and skipped; the others
    /// still run. Holds the pass lock for the whole pass.
    pub fn run_pass(&self, frame: &FrameBuffer) -> Result<PassReport> {
        let mut classifiers = self
            .pass
            .lock()
            .map_err(|_| anyhow!("detection pass lock poisoned"))?;

        let mut report = PassReport {
            frame_seq: frame.seq,
            ..PassReport::default()
        };
        for classifier in classifiers.iter_mut() {
            let params = &self.params;
            let matcher = &mut classifier.matcher;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| -> Result<Vec<Region>> {
                let view = frame.image_view()?;
                matcher.detect(&view, params)
            }));

            match outcome {
                Ok(Ok(regions)) => {
                    let name = classifier.name.clone();
                    let result = DetectionResult {
                        frame_seq: frame.seq,
                        regions,
                    };
                    log::trace!(
                        "classifier '{}' frame #{}: {} regions",
                        name,
                        frame.seq,
                        result.regions.len()
                    );
                    self.sink
                        .submit(Box::new(move |state: &mut DetectionState| {
                            state.apply(name, result)
                        }));
                    report.delivered += 1;
                }
                Ok(Err(err)) => {
                    report.failed += 1;
                    log::warn!(
                        "classifier '{}' failed on frame #{}: {:#}",
                        classifier.name,
                        frame.seq,
                        err
                    );
                }
                Err(payload) => {
                    report.failed += 1;
                    log::error!(
                        "classifier '{}' panicked on frame #{}: {}",
                        classifier.name,
                        frame.seq,
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
        drop(classifiers);

        self.passes.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "pass on frame #{} ({}) delivered={} failed={}",
            frame.seq,
            frame.short_id(),
            report.delivered,
            report.failed
        );
        Ok(report)
    }

    /// Enqueue detection of `frame` on `queue` according to the frame policy.
    pub fn schedule(self: &Arc<Self>, queue: &TaskQueue, frame: FrameBuffer) {
        match self.policy {
            FramePolicy::Every => {
                let coordinator = Arc::clone(self);
                queue.enqueue(move || coordinator.run_pass(&frame).map(|_| ()));
            }
            FramePolicy::Latest => {
                let replaced = self.lock_pending().replace(frame);
                if let Some(older) = replaced {
                    self.coalesced.fetch_add(1, Ordering::Relaxed);
                    log::trace!("frame #{} superseded before detection", older.seq);
                    return;
                }
                let task = LatestFrameTask {
                    coordinator: Arc::clone(self),
                    armed: true,
                };
                queue.enqueue(move || task.run());
            }
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<FrameBuffer>> {
        // Only frame moves happen under this lock.
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Task that detects whatever frame is in the latest-frame slot when it runs.
/// If the queue discards it unrun, the slot is cleared so scheduling resumes.
struct LatestFrameTask {
    coordinator: Arc<DetectionCoordinator>,
    armed: bool,
}

impl LatestFrameTask {
    fn run(mut self) -> Result<()> {
        self.armed = false;
        let frame = self.coordinator.lock_pending().take();
        match frame {
            Some(frame) => self.coordinator.run_pass(&frame).map(|_| ()),
            None => Ok(()),
        }
    }
}

// Runs after the queue has released the task, so a frame coalesced in that gap
// is cleared too; the next scheduled frame re-arms the slot.
impl Drop for LatestFrameTask {
    fn drop(&mut self) {
        if self.armed {
            if let Some(frame) = self.coordinator.lock_pending().take() {
                log::debug!("detection of frame #{} discarded unrun", frame.seq);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::main_context;
    use crate::detect::registry::ClassifierRegistry;
    use crate::frame::PixelFormat;

    fn frame(width: u32, height: u32) -> FrameBuffer {
        FrameBuffer::new(
            vec![0u8; (width * height) as usize],
            width,
            height,
            PixelFormat::Gray8,
        )
        .unwrap()
    }

    #[test]
    fn empty_classifier_set_delivers_nothing() {
        let (sink, mut ctx) = main_context::<DetectionState>();
        let coordinator = DetectionCoordinator::new(
            ClassifierSet::empty(),
            DetectionParams::default(),
            Arc::new(sink),
        )
        .unwrap();

        let report = coordinator.run_pass(&frame(10, 10)).unwrap();
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failed, 0);

        let mut state = DetectionState::new();
        assert_eq!(ctx.tick(&mut state), 0);
        assert!(state.is_empty());
        assert_eq!(coordinator.stats().passes, 1);
    }

    #[test]
    fn results_reach_state_only_through_tick() {
        let mut registry = ClassifierRegistry::new();
        registry.register("face", "stub://face").unwrap();
        let (sink, mut ctx) = main_context::<DetectionState>();
        let params = DetectionParams {
            min_size: (5, 5),
            ..DetectionParams::default()
        };
        let coordinator =
            DetectionCoordinator::new(registry.freeze(), params, Arc::new(sink)).unwrap();

        let mut state = DetectionState::new();
        let f = frame(40, 40);
        let seq = f.seq;
        coordinator.run_pass(&f).unwrap();
        assert!(state.is_empty());

        state.begin_tick();
        assert_eq!(ctx.tick(&mut state), 1);
        let entry = state.get("face").unwrap();
        assert_eq!(entry.result.frame_seq, seq);
        assert_eq!(entry.result.regions.len(), 1);
    }

    #[test]
    fn rejects_invalid_params() {
        let (sink, _ctx) = main_context::<DetectionState>();
        let params = DetectionParams {
            scale_factor: 0.9,
            ..DetectionParams::default()
        };
        assert!(DetectionCoordinator::new(ClassifierSet::empty(), params, Arc::new(sink)).is_err());
    }

    #[test]
    fn parses_frame_policy() {
        assert_eq!(FramePolicy::parse("Every").unwrap(), FramePolicy::Every);
        assert_eq!(FramePolicy::parse("latest").unwrap(), FramePolicy::Latest);
        assert!(FramePolicy::parse("newest").is_err());
    }
}
