//! Staged rectangle-feature cascade.
//!
//! A cascade definition is a JSON document describing a base window and a list
//! of stages. Each stage sums the votes of its features; a window is a candidate
//! only when every stage reaches its threshold. Candidates from all scales are
//! grouped and a group survives only with more than `min_neighbors` members.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::detect::backend::PatternMatcher;
use crate::detect::result::{DetectionParams, Region};
use crate::frame::ImageView;

/// Relative tolerance used when grouping overlapping candidates.
const GROUP_EPS: f64 = 0.2;

/// Raw candidates kept per scan. Grouping is quadratic in this count.
pub const MAX_CANDIDATES: usize = 4096;

#[derive(Clone, Debug, Deserialize)]
pub struct CascadeDefinition {
    pub window: WindowSize,
    pub stages: Vec<Stage>,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Stage {
    pub threshold: f32,
    pub features: Vec<Feature>,
}

/// Weighted sum of rectangle mean intensities (normalised to 0..1), compared
/// against `threshold`: the feature votes `below` or `above`.
#[derive(Clone, Debug, Deserialize)]
pub struct Feature {
    pub rects: Vec<WeightedRect>,
    pub threshold: f32,
    pub below: f32,
    pub above: f32,
}

#[derive(Clone, Copy, Debug, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub weight: f32,
}

impl CascadeDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(anyhow!("cascade window must be non-empty"));
        }
        if self.stages.is_empty() {
            return Err(anyhow!("cascade has no stages"));
        }
        for (stage_idx, stage) in self.stages.iter().enumerate() {
            if stage.features.is_empty() {
                return Err(anyhow!("cascade stage {} has no features", stage_idx));
            }
            for feature in &stage.features {
                for rect in &feature.rects {
                    let past_right = rect
                        .x
                        .checked_add(rect.width)
                        .map_or(true, |end| end > self.window.width);
                    let past_bottom = rect
                        .y
                        .checked_add(rect.height)
                        .map_or(true, |end| end > self.window.height);
                    if rect.width == 0 || rect.height == 0 || past_right || past_bottom {
                        return Err(anyhow!(
                            "cascade stage {} has a rectangle outside the {}x{} window",
                            stage_idx,
                            self.window.width,
                            self.window.height
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Multi-scale sliding-window matcher over a luma integral image.
pub struct CascadeMatcher {
    definition: CascadeDefinition,
    /// Working buffer reused across frames: (width + 1) * (height + 1) sums.
    integral: Vec<u64>,
    integral_stride: usize,
}

impl CascadeMatcher {
    pub fn from_definition(definition: CascadeDefinition) -> Result<Self> {
        definition.validate()?;
        Ok(Self {
            definition,
            integral: Vec::new(),
            integral_stride: 0,
        })
    }

    /// Load a JSON cascade definition from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cascade {}", path.display()))?;
        let definition: CascadeDefinition = serde_json::from_str(&raw)
            .with_context(|| format!("invalid cascade definition {}", path.display()))?;
        Self::from_definition(definition)
            .with_context(|| format!("rejected cascade definition {}", path.display()))
    }

    pub fn window(&self) -> WindowSize {
        self.definition.window
    }

    fn build_integral(&mut self, image: &ImageView<'_>) {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let stride = width + 1;
        self.integral.clear();
        self.integral.resize(stride * (height + 1), 0);
        self.integral_stride = stride;
        for y in 0..height {
            let mut row_sum = 0u64;
            for x in 0..width {
                row_sum += image.luma(x as u32, y as u32) as u64;
                self.integral[(y + 1) * stride + x + 1] = self.integral[y * stride + x + 1] + row_sum;
            }
        }
    }

    /// Sum of luma over `[x0, x1) x [y0, y1)`.
    fn rect_sum(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> u64 {
        let s = self.integral_stride;
        let (x0, y0, x1, y1) = (x0 as usize, y0 as usize, x1 as usize, y1 as usize);
        self.integral[y1 * s + x1] + self.integral[y0 * s + x0]
            - self.integral[y0 * s + x1]
            - self.integral[y1 * s + x0]
    }

    fn window_passes(&self, wx: u32, wy: u32, scale: f64, bounds: (u32, u32)) -> bool {
        for stage in &self.definition.stages {
            let mut votes = 0.0f32;
            for feature in &stage.features {
                let mut value = 0.0f32;
                for rect in &feature.rects {
                    let x0 = wx + (rect.x as f64 * scale).round() as u32;
                    let y0 = wy + (rect.y as f64 * scale).round() as u32;
                    let x1 = (x0 + ((rect.width as f64 * scale).round() as u32).max(1)).min(bounds.0);
                    let y1 = (y0 + ((rect.height as f64 * scale).round() as u32).max(1)).min(bounds.1);
                    if x1 <= x0 || y1 <= y0 {
                        continue;
                    }
                    let area = ((x1 - x0) as u64 * (y1 - y0) as u64) as f32;
                    let mean = self.rect_sum(x0, y0, x1, y1) as f32 / area / 255.0;
                    value += rect.weight * mean;
                }
                votes += if value < feature.threshold {
                    feature.below
                } else {
                    feature.above
                };
            }
            if votes < stage.threshold {
                return false;
            }
        }
        true
    }

    fn scan(&self, width: u32, height: u32, params: &DetectionParams) -> Vec<Region> {
        let base = self.definition.window;
        let mut candidates = Vec::new();
        let mut scale = 1.0f64;
        loop {
            let win_w = (base.width as f64 * scale).round() as u32;
            let win_h = (base.height as f64 * scale).round() as u32;
            if win_w > width || win_h > height {
                break;
            }
            if win_w >= params.min_size.0 && win_h >= params.min_size.1 {
                let step = (scale.round() as u32).max(1);
                let mut y = 0;
                while y + win_h <= height {
                    let mut x = 0;
                    while x + win_w <= width {
                        if self.window_passes(x, y, scale, (width, height)) {
                            candidates.push(Region::new(x, y, win_w, win_h));
                            if candidates.len() == MAX_CANDIDATES {
                                log::warn!(
                                    "cascade scan {}x{} hit {} candidates, stopping early",
                                    width,
                                    height,
                                    MAX_CANDIDATES
                                );
                                return candidates;
                            }
                        }
                        x += step;
                    }
                    y += step;
                }
            }
            scale *= params.scale_factor;
        }

        log::trace!(
            "cascade scan {}x{}: {} raw candidates",
            width,
            height,
            candidates.len()
        );
        candidates
    }
}

impl PatternMatcher for CascadeMatcher {
    fn kind(&self) -> &'static str {
        "cascade"
    }

    fn detect(&mut self, image: &ImageView<'_>, params: &DetectionParams) -> Result<Vec<Region>> {
        let (width, height) = (image.width(), image.height());
        let base = self.definition.window;
        if width < base.width || height < base.height {
            return Ok(Vec::new());
        }
        self.build_integral(image);
        let candidates = self.scan(width, height, params);
        Ok(group_regions(&candidates, params.min_neighbors))
    }
}

fn similar(a: &Region, b: &Region) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar candidates and keep clusters with more than `min_neighbors`
/// members, each reduced to its average rectangle. `min_neighbors == 0` keeps
/// the raw candidates.
pub fn group_regions(candidates: &[Region], min_neighbors: u32) -> Vec<Region> {
    if min_neighbors == 0 {
        return candidates.to_vec();
    }

    let mut parent: Vec<usize> = (0..candidates.len()).collect();
    for i in 0..candidates.len() {
        for j in (i + 1)..candidates.len() {
            if similar(&candidates[i], &candidates[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // (count, sum x, sum y, sum w, sum h) in first-seen order
    let mut clusters: Vec<(u64, u64, u64, u64, u64)> = Vec::new();
    let mut by_root: HashMap<usize, usize> = HashMap::new();
    for (i, region) in candidates.iter().enumerate() {
        let root = find(&mut parent, i);
        let idx = *by_root.entry(root).or_insert_with(|| {
            clusters.push((0, 0, 0, 0, 0));
            clusters.len() - 1
        });
        let entry = &mut clusters[idx];
        entry.0 += 1;
        entry.1 += region.x as u64;
        entry.2 += region.y as u64;
        entry.3 += region.width as u64;
        entry.4 += region.height as u64;
    }

    let avg = |sum: u64, n: u64| ((sum as f64) / (n as f64)).round() as u32;
    clusters
        .into_iter()
        .filter(|c| c.0 > min_neighbors as u64)
        .map(|(n, x, y, w, h)| Region::new(avg(x, n), avg(y, n), avg(w, n), avg(h, n)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameBuffer, PixelFormat};

    fn brightness_cascade() -> CascadeDefinition {
        serde_json::from_str(
            r#"{
                "window": { "width": 24, "height": 24 },
                "stages": [{
                    "threshold": 0.5,
                    "features": [{
                        "rects": [{ "x": 0, "y": 0, "width": 24, "height": 24, "weight": 1.0 }],
                        "threshold": 0.5,
                        "below": 0.0,
                        "above": 1.0
                    }]
                }]
            }"#,
        )
        .unwrap()
    }

    fn frame_with_square(size: u32, at: u32, side: u32) -> FrameBuffer {
        let mut data = vec![0u8; (size * size) as usize];
        for y in at..at + side {
            for x in at..at + side {
                data[(y * size + x) as usize] = 255;
            }
        }
        FrameBuffer::new(data, size, size, PixelFormat::Gray8).unwrap()
    }

    fn params() -> DetectionParams {
        DetectionParams {
            scale_factor: 1.25,
            min_neighbors: 3,
            min_size: (24, 24),
        }
    }

    #[test]
    fn finds_bright_square() {
        let mut matcher = CascadeMatcher::from_definition(brightness_cascade()).unwrap();
        let frame = frame_with_square(64, 20, 24);
        let regions = matcher
            .detect(&frame.image_view().unwrap(), &params())
            .unwrap();

        assert!(!regions.is_empty());
        for region in regions {
            let cx = region.x + region.width / 2;
            let cy = region.y + region.height / 2;
            assert!(cx.abs_diff(32) <= 3, "center x {} too far", cx);
            assert!(cy.abs_diff(32) <= 3, "center y {} too far", cy);
        }
    }

    #[test]
    fn saturated_frame_caps_candidates() {
        let mut matcher = CascadeMatcher::from_definition(brightness_cascade()).unwrap();
        let frame = FrameBuffer::new(vec![255u8; 320 * 240], 320, 240, PixelFormat::Gray8).unwrap();
        let view = frame.image_view().unwrap();
        matcher.build_integral(&view);
        assert_eq!(matcher.scan(320, 240, &params()).len(), MAX_CANDIDATES);

        let regions = matcher.detect(&view, &params()).unwrap();
        assert!(!regions.is_empty());
    }

    #[test]
    fn blank_frame_has_no_regions() {
        let mut matcher = CascadeMatcher::from_definition(brightness_cascade()).unwrap();
        let frame = FrameBuffer::new(vec![0u8; 64 * 64], 64, 64, PixelFormat::Gray8).unwrap();
        let regions = matcher
            .detect(&frame.image_view().unwrap(), &params())
            .unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn frame_smaller_than_window_is_empty() {
        let mut matcher = CascadeMatcher::from_definition(brightness_cascade()).unwrap();
        let frame = FrameBuffer::new(vec![255u8; 16 * 16], 16, 16, PixelFormat::Gray8).unwrap();
        let regions = matcher
            .detect(&frame.image_view().unwrap(), &params())
            .unwrap();
        assert!(regions.is_empty());
    }

    #[test]
    fn grouping_requires_more_than_min_neighbors() {
        let candidates = vec![
            Region::new(10, 10, 20, 20),
            Region::new(11, 10, 20, 20),
            Region::new(10, 11, 20, 20),
            Region::new(80, 80, 20, 20),
        ];
        let grouped = group_regions(&candidates, 1);
        assert_eq!(grouped, vec![Region::new(10, 10, 20, 20)]);

        let raw = group_regions(&candidates, 0);
        assert_eq!(raw.len(), 4);

        assert!(group_regions(&candidates, 3).is_empty());
    }

    #[test]
    fn rejects_rect_outside_window() {
        let mut def = brightness_cascade();
        def.stages[0].features[0].rects[0].width = 25;
        assert!(CascadeMatcher::from_definition(def).is_err());
    }

    #[test]
    fn rejects_rect_with_overflowing_offset() {
        let mut def = brightness_cascade();
        def.stages[0].features[0].rects[0].x = u32::MAX;
        assert!(CascadeMatcher::from_definition(def).is_err());

        let mut def = brightness_cascade();
        def.stages[0].features[0].rects[0].y = u32::MAX - 1;
        assert!(CascadeMatcher::from_definition(def).is_err());
    }

    #[test]
    fn loads_definition_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = r#"{"window":{"width":8,"height":8},"stages":[{"threshold":1.0,"features":[{"rects":[{"x":0,"y":0,"width":8,"height":8,"weight":1.0}],"threshold":0.9,"below":0.0,"above":1.0}]}]}"#;
        std::io::Write::write_all(&mut file, json.as_bytes()).unwrap();
        let matcher = CascadeMatcher::load(file.path()).unwrap();
        assert_eq!(matcher.window().width, 8);
    }
}
