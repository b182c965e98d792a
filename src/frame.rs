//! Captured frame snapshots.
//!
//! - `FrameBuffer`: immutable pixel snapshot handed to a detection task by value.
//! - `ImageView`: typed, borrowed view over a `FrameBuffer` for matchers.
//!
//! A `FrameBuffer` never changes after capture. The pixel bytes are private and
//! there is no mutable accessor; the background thread owns the copy it receives.

use anyhow::{anyhow, Result};
use image::{ImageBuffer, Luma, Rgb, Rgba};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_FRAME_SEQ: AtomicU64 = AtomicU64::new(1);

/// Largest accepted frame width or height.
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Pixel layouts a frame source can register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Gray8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gray8" | "gray" | "luma8" => Ok(PixelFormat::Gray8),
            "rgb8" | "rgb" => Ok(PixelFormat::Rgb8),
            "rgba8" | "rgba" => Ok(PixelFormat::Rgba8),
            other => Err(anyhow!("unknown pixel format '{}'", other)),
        }
    }
}

/// Immutable snapshot of one camera frame.
///
/// Deliberately not `Clone`: a frame is captured once and moved into exactly one
/// detection task.
pub struct FrameBuffer {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Process-wide capture order, assigned at construction.
    pub seq: u64,
}

impl FrameBuffer {
    /// Capture a frame. The byte length must match the declared dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(format.channels()))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} bytes for {}x{} {:?}, received {}",
                expected,
                width,
                height,
                format,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            seq: NEXT_FRAME_SEQ.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// SHA-256 of the pixel bytes. Used for logging and content-addressed stubs.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.data).into()
    }

    /// Short hex fingerprint for log lines.
    pub fn short_id(&self) -> String {
        hex::encode(&self.fingerprint()[..4])
    }

    /// Typed view over the frame using its declared dimensions.
    pub fn image_view(&self) -> Result<ImageView<'_>> {
        let (w, h) = (self.width, self.height);
        let bytes = self.data.as_slice();
        let view = match self.format {
            PixelFormat::Gray8 => ImageBuffer::from_raw(w, h, bytes).map(ImageView::Gray),
            PixelFormat::Rgb8 => ImageBuffer::from_raw(w, h, bytes).map(ImageView::Rgb),
            PixelFormat::Rgba8 => ImageBuffer::from_raw(w, h, bytes).map(ImageView::Rgba),
        };
        view.ok_or_else(|| {
            anyhow!(
                "frame #{} buffer does not fit {}x{} {:?}",
                self.seq,
                w,
                h,
                self.format
            )
        })
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("seq", &self.seq)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.data.len())
            .finish()
    }
}

/// Borrowed typed image over a frame's bytes.
pub enum ImageView<'a> {
    Gray(ImageBuffer<Luma<u8>, &'a [u8]>),
    Rgb(ImageBuffer<Rgb<u8>, &'a [u8]>),
    Rgba(ImageBuffer<Rgba<u8>, &'a [u8]>),
}

impl<'a> ImageView<'a> {
    pub fn width(&self) -> u32 {
        match self {
            ImageView::Gray(img) => img.width(),
            ImageView::Rgb(img) => img.width(),
            ImageView::Rgba(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            ImageView::Gray(img) => img.height(),
            ImageView::Rgb(img) => img.height(),
            ImageView::Rgba(img) => img.height(),
        }
    }

    /// Luma of a pixel (ITU-R BT.601 integer weights). Alpha is ignored.
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        match self {
            ImageView::Gray(img) => img.get_pixel(x, y).0[0],
            ImageView::Rgb(img) => {
                let [r, g, b] = img.get_pixel(x, y).0;
                rgb_to_luma(r, g, b)
            }
            ImageView::Rgba(img) => {
                let [r, g, b, _] = img.get_pixel(x, y).0;
                rgb_to_luma(r, g, b)
            }
        }
    }

    /// Raw bytes backing the view.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ImageView::Gray(img) => img.as_raw(),
            ImageView::Rgb(img) => img.as_raw(),
            ImageView::Rgba(img) => img.as_raw(),
        }
    }
}

fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_length() {
        let err = FrameBuffer::new(vec![0u8; 10], 4, 4, PixelFormat::Gray8).unwrap_err();
        assert!(err.to_string().contains("expected 16 bytes"));
    }

    #[test]
    fn sequence_numbers_increase() {
        let a = FrameBuffer::new(vec![0u8; 4], 2, 2, PixelFormat::Gray8).unwrap();
        let b = FrameBuffer::new(vec![0u8; 4], 2, 2, PixelFormat::Gray8).unwrap();
        assert!(b.seq > a.seq);
    }

    #[test]
    fn view_reports_dimensions_and_luma() {
        let mut data = vec![0u8; 3 * 2 * 3];
        // pixel (1, 0) pure white
        data[3..6].copy_from_slice(&[255, 255, 255]);
        let frame = FrameBuffer::new(data, 3, 2, PixelFormat::Rgb8).unwrap();
        let view = frame.image_view().unwrap();
        assert_eq!(view.width(), 3);
        assert_eq!(view.height(), 2);
        assert_eq!(view.luma(1, 0), 255);
        assert_eq!(view.luma(0, 0), 0);
    }

    #[test]
    fn rgba_luma_ignores_alpha() {
        let frame = FrameBuffer::new(vec![10, 10, 10, 0], 1, 1, PixelFormat::Rgba8).unwrap();
        assert_eq!(frame.image_view().unwrap().luma(0, 0), 10);
    }

    #[test]
    fn fingerprint_depends_on_content() {
        let a = FrameBuffer::new(vec![1, 2, 3, 4], 2, 2, PixelFormat::Gray8).unwrap();
        let b = FrameBuffer::new(vec![1, 2, 3, 5], 2, 2, PixelFormat::Gray8).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.short_id().len(), 8);
    }

    #[test]
    fn parses_pixel_formats() {
        assert_eq!(PixelFormat::parse("RGB8").unwrap(), PixelFormat::Rgb8);
        assert_eq!(PixelFormat::parse("gray").unwrap(), PixelFormat::Gray8);
        assert!(PixelFormat::parse("yuv420").is_err());
    }
}
