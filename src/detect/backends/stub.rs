use anyhow::Result;
use sha2::{Digest, Sha256};

use crate::detect::backend::PatternMatcher;
use crate::detect::result::{DetectionParams, Region};
use crate::frame::ImageView;

/// Stub matcher for testing. Places one region at a position derived from a
/// hash of the pixels, so identical frames always give identical results.
pub struct StubMatcher {
    label: String,
    last_hash: Option<[u8; 32]>,
}

impl StubMatcher {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            last_hash: None,
        }
    }

    /// Hash of the last frame seen, if any.
    pub fn last_hash(&self) -> Option<[u8; 32]> {
        self.last_hash
    }
}

impl PatternMatcher for StubMatcher {
    fn kind(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, image: &ImageView<'_>, params: &DetectionParams) -> Result<Vec<Region>> {
        let mut hasher = Sha256::new();
        hasher.update(self.label.as_bytes());
        hasher.update(image.as_bytes());
        let current_hash: [u8; 32] = hasher.finalize().into();
        self.last_hash = Some(current_hash);

        let (width, height) = (image.width(), image.height());
        let (min_w, min_h) = params.min_size;
        if width < min_w || height < min_h {
            return Ok(Vec::new());
        }

        let side_w = (width / 4).max(min_w);
        let side_h = (height / 4).max(min_h);
        let slack_x = width - side_w;
        let slack_y = height - side_h;
        let seed_x = u32::from_le_bytes([current_hash[0], current_hash[1], current_hash[2], 0]);
        let seed_y = u32::from_le_bytes([current_hash[3], current_hash[4], current_hash[5], 0]);
        let x = if slack_x == 0 { 0 } else { seed_x % (slack_x + 1) };
        let y = if slack_y == 0 { 0 } else { seed_y % (slack_y + 1) };

        Ok(vec![Region::new(x, y, side_w, side_h)])
    }
}
