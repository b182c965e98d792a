use anyhow::{anyhow, Context, Result};

use super::backend::PatternMatcher;
use super::backends::{CascadeMatcher, StubMatcher};

/// Source prefix for built-in stub matchers (`stub://<label>`).
pub const STUB_SOURCE_PREFIX: &str = "stub://";

/// Lightweight reference to a registered classifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifierHandle {
    pub name: String,
    pub kind: &'static str,
    /// Position in registration order; results are produced in this order.
    pub index: usize,
}

pub(crate) struct Classifier {
    pub(crate) name: String,
    pub(crate) matcher: Box<dyn PatternMatcher>,
}

/// Startup-time classifier registry.
///
/// Populated once, then frozen into a `ClassifierSet` before the first frame is
/// scheduled. There is no way to add classifiers to a frozen set.
pub struct ClassifierRegistry {
    entries: Vec<Classifier>,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Load a classifier definition and register it under `name`.
    ///
    /// `source` is either `stub://<label>` or a path to a cascade definition.
    pub fn register(&mut self, name: &str, source: &str) -> Result<ClassifierHandle> {
        let matcher =
            load_matcher(source).with_context(|| format!("classifier '{}' failed to load", name))?;
        self.register_boxed(name, matcher)
    }

    /// Register an already-constructed matcher.
    pub fn register_matcher<M: PatternMatcher + 'static>(
        &mut self,
        name: &str,
        matcher: M,
    ) -> Result<ClassifierHandle> {
        self.register_boxed(name, Box::new(matcher))
    }

    fn register_boxed(
        &mut self,
        name: &str,
        mut matcher: Box<dyn PatternMatcher>,
    ) -> Result<ClassifierHandle> {
        crate::validate_classifier_name(name)?;
        let name = name.to_lowercase();
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(anyhow!("classifier '{}' already registered", name));
        }
        matcher
            .warm_up()
            .with_context(|| format!("classifier '{}' warm-up failed", name))?;
        let handle = ClassifierHandle {
            name: name.clone(),
            kind: matcher.kind(),
            index: self.entries.len(),
        };
        log::info!("registered classifier '{}' ({})", name, handle.kind);
        self.entries.push(Classifier { name, matcher });
        Ok(handle)
    }

    /// Get a handle by name.
    pub fn get(&self, name: &str) -> Option<ClassifierHandle> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .position(|entry| entry.name == name)
            .map(|index| ClassifierHandle {
                name: self.entries[index].name.clone(),
                kind: self.entries[index].matcher.kind(),
                index,
            })
    }

    /// Registered names in registration order.
    pub fn list(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finish registration.
    pub fn freeze(self) -> ClassifierSet {
        ClassifierSet {
            entries: self.entries,
        }
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen, ordered classifier collection owned by a detection coordinator.
pub struct ClassifierSet {
    entries: Vec<Classifier>,
}

impl ClassifierSet {
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Classifier> {
        self.entries.iter_mut()
    }
}

/// Build a matcher from a classifier source string.
pub fn load_matcher(source: &str) -> Result<Box<dyn PatternMatcher>> {
    if let Some(label) = source.strip_prefix(STUB_SOURCE_PREFIX) {
        return Ok(Box::new(StubMatcher::new(label)));
    }
    if source.trim().is_empty() {
        return Err(anyhow!("classifier source is empty"));
    }
    Ok(Box::new(CascadeMatcher::load(source)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_registration_order() {
        let mut registry = ClassifierRegistry::new();
        let face = registry.register("face", "stub://face").unwrap();
        let hand = registry.register("hand", "stub://hand").unwrap();
        assert_eq!(face.index, 0);
        assert_eq!(hand.index, 1);
        assert_eq!(face.kind, "stub");
        assert_eq!(registry.list(), vec!["face", "hand"]);

        let set = registry.freeze();
        assert_eq!(set.names(), vec!["face", "hand"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ClassifierRegistry::new();
        registry.register("face", "stub://a").unwrap();
        let err = registry.register("FACE", "stub://b").unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn rejects_bad_names() {
        let mut registry = ClassifierRegistry::new();
        assert!(registry.register("front face", "stub://x").is_err());
        assert!(registry.register("", "stub://x").is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn missing_definition_file_is_a_setup_error() {
        let mut registry = ClassifierRegistry::new();
        let err = registry
            .register("eyes", "/nonexistent/cascade_eyes.json")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("failed to read cascade"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = ClassifierRegistry::new();
        registry.register("Hand", "stub://hand").unwrap();
        assert_eq!(registry.get("HAND").unwrap().name, "hand");
        assert!(registry.get("face").is_none());
    }
}
