mod backend;
pub mod backends;
pub mod coordinator;
mod registry;
mod result;

pub use backend::PatternMatcher;
pub use backends::{CascadeMatcher, StubMatcher};
pub use coordinator::{CoordinatorStats, DetectionCoordinator, FramePolicy, PassReport};
pub use registry::{
    load_matcher, ClassifierHandle, ClassifierRegistry, ClassifierSet, STUB_SOURCE_PREFIX,
};
pub use result::{DetectionParams, DetectionResult, Region};
