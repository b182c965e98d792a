use anyhow::Result;

use crate::detect::result::{DetectionParams, Region};
use crate::frame::ImageView;

/// Pattern-matching primitive behind a classifier.
///
/// Matchers may keep working buffers between calls, hence `&mut self`. They are
/// never invoked concurrently: the detection coordinator holds its pass lock for
/// every call.
pub trait PatternMatcher: Send {
    /// Matcher kind, for logs.
    fn kind(&self) -> &'static str;

    /// Locate regions of interest in `image`.
    ///
    /// Implementations must treat the view as read-only and must not retain it.
    fn detect(&mut self, image: &ImageView<'_>, params: &DetectionParams) -> Result<Vec<Region>>;

    /// Optional warm-up hook, run once at registration.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
