//! Frame sources.
//!
//! A source hands out `FrameBuffer` snapshots once its pixel format has been
//! registered. Format registration is the only synchronous setup step and its
//! failure is returned to the caller; until it succeeds the source yields no
//! frames.

pub mod synthetic;

use anyhow::{bail, Result};

use crate::frame::{FrameBuffer, PixelFormat};

pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Statistics for a frame source.
#[derive(Clone, Debug, Default)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub url: String,
}

pub trait FrameSource: Send {
    /// Register the pixel format frames should be delivered in.
    fn register_format(&mut self, format: PixelFormat) -> Result<()>;

    /// Next frame, or `None` when no frame is ready.
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>>;

    fn stats(&self) -> SourceStats;
}

/// Open a source by URL. Only `stub://` sources are built in.
pub fn open_source(config: SyntheticConfig) -> Result<Box<dyn FrameSource>> {
    if config.url.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::new(config)))
    } else {
        bail!("unsupported frame source '{}'", config.url)
    }
}
