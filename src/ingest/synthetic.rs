//! Synthetic frame source for tests and demos.

use anyhow::{anyhow, Result};

use super::{FrameSource, SourceStats};
use crate::frame::{FrameBuffer, PixelFormat, MAX_FRAME_DIMENSION};

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    /// Source URL (e.g., "stub://front_camera").
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Formats this source refuses to register.
    pub unsupported_formats: Vec<PixelFormat>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera".to_string(),
            width: 320,
            height: 240,
            unsupported_formats: Vec::new(),
        }
    }
}

/// Generates gradient frames with occasional scene changes.
pub struct SyntheticSource {
    config: SyntheticConfig,
    format: Option<PixelFormat>,
    frame_count: u64,
    /// Simulated scene state, bumped every 50 frames.
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            format: None,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn format(&self) -> Option<PixelFormat> {
        self.format
    }

    /// Byte length of one frame, rejecting sizes no frame buffer can hold.
    fn frame_byte_len(&self, format: PixelFormat) -> Result<usize> {
        let (width, height) = (self.config.width, self.config.height);
        if width > MAX_FRAME_DIMENSION || height > MAX_FRAME_DIMENSION {
            return Err(anyhow!(
                "{}: frame size {}x{} exceeds {} pixels per side",
                self.config.url,
                width,
                height,
                MAX_FRAME_DIMENSION
            ));
        }
        (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.channels()))
            .ok_or_else(|| anyhow!("{}: frame dimensions overflow", self.config.url))
    }

    fn generate_pixels(&mut self, format: PixelFormat, byte_len: usize) -> Vec<u8> {
        let channels = format.channels();

        if self.frame_count.is_multiple_of(50) {
            self.scene_state = self.scene_state.wrapping_add(1);
        }

        let mut pixels = vec![0u8; byte_len];
        for (i, px) in pixels.chunks_exact_mut(channels).enumerate() {
            let value = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
            for (c, byte) in px.iter_mut().enumerate() {
                // opaque alpha
                *byte = if c == 3 { 255 } else { value };
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn register_format(&mut self, format: PixelFormat) -> Result<()> {
        if self.config.unsupported_formats.contains(&format) {
            return Err(anyhow!(
                "{}: pixel format {:?} is not supported",
                self.config.url,
                format
            ));
        }
        self.format = Some(format);
        log::info!(
            "synthetic source {} registered {:?} at {}x{}",
            self.config.url,
            format,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<FrameBuffer>> {
        let Some(format) = self.format else {
            return Ok(None);
        };
        let byte_len = self.frame_byte_len(format)?;
        self.frame_count += 1;
        let pixels = self.generate_pixels(format, byte_len);
        let frame = FrameBuffer::new(pixels, self.config.width, self.config.height, format)?;
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}
