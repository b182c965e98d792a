pub mod cascade;
pub mod stub;

pub use cascade::CascadeMatcher;
pub use stub::StubMatcher;
