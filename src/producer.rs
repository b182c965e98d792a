//! Frame producer: the owning context for detection results.
//!
//! Each `tick` first applies results delivered since the previous tick, then
//! pulls a frame and, when due, schedules a detection pass. The producer never
//! waits on detection; the worker runs passes on its own thread.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::DetectdConfig;
use crate::context::{main_context, MainContext};
use crate::detect::{ClassifierRegistry, DetectionCoordinator};
use crate::frame::PixelFormat;
use crate::ingest::{open_source, FrameSource, SourceStats, SyntheticConfig};
use crate::state::DetectionState;
use crate::worker::{TaskQueue, Worker, WorkerConfig};

/// Name given to the detection worker thread.
pub const DETECTION_WORKER_NAME: &str = "detect-worker";

#[derive(Clone, Copy, Debug)]
pub struct ProducerConfig {
    pub format: PixelFormat,
    /// Schedule detection on every Nth frame.
    pub detect_interval_ticks: u32,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            format: PixelFormat::Rgb8,
            detect_interval_ticks: 1,
        }
    }
}

/// What happened during one tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    /// Result callbacks applied at the start of the tick.
    pub applied: usize,
    /// A frame was handed to the coordinator.
    pub scheduled: bool,
}

pub struct FrameProducer {
    source: Box<dyn FrameSource>,
    coordinator: Arc<DetectionCoordinator>,
    queue: TaskQueue,
    context: MainContext<DetectionState>,
    state: DetectionState,
    config: ProducerConfig,
    registered: bool,
    paused: bool,
    frames_seen: u64,
    scheduled: u64,
}

impl FrameProducer {
    pub fn new(
        source: Box<dyn FrameSource>,
        coordinator: Arc<DetectionCoordinator>,
        queue: TaskQueue,
        context: MainContext<DetectionState>,
        config: ProducerConfig,
    ) -> Self {
        Self {
            source,
            coordinator,
            queue,
            context,
            state: DetectionState::new(),
            config,
            registered: false,
            paused: false,
            frames_seen: 0,
            scheduled: 0,
        }
    }

    /// Register the pixel format with the source. On failure the producer
    /// keeps running ticks but never schedules detection.
    pub fn setup(&mut self) -> Result<()> {
        self.registered = false;
        self.source
            .register_format(self.config.format)
            .with_context(|| format!("failed to register {:?} frames", self.config.format))?;
        self.registered = true;
        Ok(())
    }

    pub fn tick(&mut self) -> Result<TickReport> {
        let tick = self.state.begin_tick();
        let applied = self.context.tick(&mut self.state);

        let mut scheduled = false;
        if self.registered && !self.paused {
            if let Some(frame) = self.source.next_frame()? {
                let interval = self.config.detect_interval_ticks.max(1) as u64;
                if self.frames_seen % interval == 0 {
                    self.coordinator.schedule(&self.queue, frame);
                    self.scheduled += 1;
                    scheduled = true;
                }
                self.frames_seen += 1;
            }
        }

        Ok(TickReport {
            tick,
            applied,
            scheduled,
        })
    }

    pub fn pause(&mut self) {
        if !self.paused {
            log::info!("detection paused");
        }
        self.paused = true;
    }

    pub fn resume(&mut self) {
        if self.paused {
            log::info!("detection resumed");
        }
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Results as of the last tick.
    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn coordinator(&self) -> &Arc<DetectionCoordinator> {
        &self.coordinator
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn source_stats(&self) -> SourceStats {
        self.source.stats()
    }

    /// Frames handed to the coordinator so far.
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }
}

/// Wire a worker, coordinator, main context and source from configuration.
///
/// Classifiers are registered and frozen here, before any frame can be
/// scheduled.
pub fn build_pipeline(cfg: &DetectdConfig) -> Result<(Worker, FrameProducer)> {
    let mut registry = ClassifierRegistry::new();
    for classifier in &cfg.classifiers {
        registry.register(&classifier.name, &classifier.source)?;
    }
    if registry.is_empty() {
        log::warn!("no classifiers registered; detection passes will produce no results");
    }

    let (sink, context) = main_context::<DetectionState>();
    let coordinator = DetectionCoordinator::new(registry.freeze(), cfg.detection, Arc::new(sink))?
        .with_policy(cfg.worker.frame_policy);

    let worker = Worker::spawn(
        DETECTION_WORKER_NAME,
        WorkerConfig {
            capacity: cfg.worker.capacity,
        },
    )?;

    let source = open_source(SyntheticConfig {
        url: cfg.source.url.clone(),
        width: cfg.source.width,
        height: cfg.source.height,
        unsupported_formats: Vec::new(),
    })?;

    let producer = FrameProducer::new(
        source,
        Arc::new(coordinator),
        worker.queue(),
        context,
        ProducerConfig {
            format: cfg.source.format,
            detect_interval_ticks: cfg.worker.detect_interval_ticks,
        },
    );
    Ok((worker, producer))
}
