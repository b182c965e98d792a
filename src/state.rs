//! Producer-owned detection results.
//!
//! `DetectionState` is only ever touched on the producer's thread. Background
//! passes reach it exclusively through callbacks submitted to the main context.

use std::collections::HashMap;

use crate::detect::{DetectionResult, Region};

/// Latest result for one classifier, plus when it was applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassifierResult {
    pub result: DetectionResult,
    /// Producer tick during which the result was applied.
    pub applied_tick: u64,
    /// Number of results applied for this classifier so far.
    pub updates: u64,
}

#[derive(Debug, Default)]
pub struct DetectionState {
    results: HashMap<String, ClassifierResult>,
    tick: u64,
    stale: u64,
}

impl DetectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the tick counter. Called by the owner at the start of each tick.
    pub fn begin_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Record a classifier's result. A result from an older frame than the one
    /// already stored is ignored.
    pub fn apply(&mut self, classifier: String, result: DetectionResult) {
        let tick = self.tick;
        let entry = self.results.entry(classifier).or_default();
        if entry.updates > 0 && result.frame_seq < entry.result.frame_seq {
            self.stale += 1;
            return;
        }
        entry.result = result;
        entry.applied_tick = tick;
        entry.updates += 1;
    }

    pub fn get(&self, classifier: &str) -> Option<&ClassifierResult> {
        self.results.get(classifier)
    }

    /// Latest regions for a classifier; empty when it has never reported.
    pub fn regions(&self, classifier: &str) -> &[Region] {
        self.results
            .get(classifier)
            .map(|entry| entry.result.regions.as_slice())
            .unwrap_or(&[])
    }

    /// Classifier names with at least one result, sorted.
    pub fn classifiers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.results.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Results discarded because a newer frame had already been applied.
    pub fn stale_results(&self) -> u64 {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(frame_seq: u64, regions: Vec<Region>) -> DetectionResult {
        DetectionResult { frame_seq, regions }
    }

    #[test]
    fn apply_records_tick_and_updates() {
        let mut state = DetectionState::new();
        state.begin_tick();
        state.apply("face".into(), result(1, vec![Region::new(1, 2, 3, 4)]));
        state.begin_tick();
        state.apply("face".into(), result(2, vec![]));

        let entry = state.get("face").unwrap();
        assert_eq!(entry.applied_tick, 2);
        assert_eq!(entry.updates, 2);
        assert!(state.regions("face").is_empty());
        assert!(state.regions("hand").is_empty());
    }

    #[test]
    fn older_frames_do_not_overwrite_newer() {
        let mut state = DetectionState::new();
        state.apply("face".into(), result(5, vec![Region::new(0, 0, 10, 10)]));
        state.apply("face".into(), result(3, vec![]));

        assert_eq!(state.regions("face").len(), 1);
        assert_eq!(state.stale_results(), 1);
    }
}
