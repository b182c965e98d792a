use anyhow::{anyhow, Result};

/// Axis-aligned rectangle in frame pixel space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Regions found by one classifier in one frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionResult {
    /// Sequence number of the frame the regions came from.
    pub frame_seq: u64,
    pub regions: Vec<Region>,
}

/// Tunables passed to every matcher call. Fixed for the lifetime of a coordinator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectionParams {
    /// Window growth per scale step. Must be > 1.0.
    pub scale_factor: f64,
    /// A candidate group needs more than this many overlapping hits to be kept.
    pub min_neighbors: u32,
    /// Smallest region (width, height) reported.
    pub min_size: (u32, u32),
}

impl Default for DetectionParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: (30, 30),
        }
    }
}

impl DetectionParams {
    pub fn validate(&self) -> Result<()> {
        if !self.scale_factor.is_finite() || self.scale_factor <= 1.0 {
            return Err(anyhow!(
                "scale_factor must be a finite value greater than 1.0 (got {})",
                self.scale_factor
            ));
        }
        if self.min_size.0 == 0 || self.min_size.1 == 0 {
            return Err(anyhow!("min_size must be non-zero in both dimensions"));
        }
        Ok(())
    }
}
