//! Background classifier detection for camera frames.
//!
//! Frames are analyzed without stalling the thread that produces them:
//!
//! 1. **Task queue worker** (`worker`): one long-lived thread drains a FIFO of
//!    deferred tasks. A failing or panicking task is logged and the loop continues.
//! 2. **Detection pass coordinator** (`detect::coordinator`): one task runs every
//!    registered classifier against one frame. At most one pass runs at a time.
//! 3. **Main-context result sink** (`context`): passes submit callbacks; the
//!    owning context applies them to its `DetectionState` on its next tick.
//!
//! # Module Structure
//!
//! - `frame`: immutable frame snapshots and typed image views
//! - `detect`: matchers, classifier registry, pass coordinator
//! - `ingest`: frame sources
//! - `producer`: per-tick owner of detection results
//! - `config`: file + environment configuration for `detectd`

use anyhow::{anyhow, Result};
use std::sync::OnceLock;

pub mod config;
pub mod context;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod producer;
pub mod state;
pub mod worker;

pub use context::{main_context, Callback, ContextSender, MainContext, ResultSink};
pub use detect::{
    CascadeMatcher, ClassifierHandle, ClassifierRegistry, ClassifierSet, DetectionCoordinator,
    DetectionParams, DetectionResult, FramePolicy, PassReport, PatternMatcher, Region,
    StubMatcher,
};
pub use frame::{FrameBuffer, ImageView, PixelFormat, MAX_FRAME_DIMENSION};
pub use ingest::{FrameSource, SyntheticConfig, SyntheticSource};
pub use producer::{build_pipeline, FrameProducer, ProducerConfig, TickReport};
pub use state::{ClassifierResult, DetectionState};
pub use worker::{Task, TaskQueue, Worker, WorkerConfig, WorkerStats};

// -------------------- Classifier Names --------------------

/// Classifier names key results and log lines, so they are kept short and plain.
///
/// Allowed: "face", "left_hand", "plate-2"
/// Disallowed: whitespace, slashes, dots, anything over 64 characters.
pub fn validate_classifier_name(name: &str) -> Result<()> {
    static NAME_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = NAME_RE.get_or_init(|| regex::Regex::new(r"^[a-z0-9_-]{1,64}$").unwrap());

    let lowered = name.to_lowercase();
    if !re.is_match(&lowered) {
        return Err(anyhow!(
            "classifier name '{}' must match ^[a-z0-9_-]{{1,64}}$",
            name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_names() {
        assert!(validate_classifier_name("face").is_ok());
        assert!(validate_classifier_name("Left_Hand").is_ok());
        assert!(validate_classifier_name("plate-2").is_ok());
        assert!(validate_classifier_name("").is_err());
        assert!(validate_classifier_name("a b").is_err());
        assert!(validate_classifier_name("../face").is_err());
        assert!(validate_classifier_name(&"x".repeat(65)).is_err());
    }
}
