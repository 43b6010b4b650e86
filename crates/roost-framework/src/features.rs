//! Runtime feature switches.
//!
//! Features are named by string; a feature nobody has configured is enabled.
//! Plugins declare the features they guard at startup, and only declared or
//! configured features can be toggled at runtime.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::info;

#[derive(Debug, Default)]
pub struct FeatureFlags {
    flags: RwLock<BTreeMap<String, bool>>,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the table, usually from the `features` config section.
    pub fn from_map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, bool)>,
        K: Into<String>,
    {
        Self {
            flags: RwLock::new(entries.into_iter().map(|(k, v)| (k.into(), v)).collect()),
        }
    }

    pub fn is_enabled(&self, feature: &str) -> bool {
        self.flags.read().get(feature).copied().unwrap_or(true)
    }

    /// Makes `feature` known, enabled unless already configured.
    pub fn declare(&self, feature: &str) {
        self.flags.write().entry(feature.to_string()).or_insert(true);
    }

    pub fn is_known(&self, feature: &str) -> bool {
        self.flags.read().contains_key(feature)
    }

    /// Names of the declared and configured features, sorted.
    pub fn available(&self) -> Vec<String> {
        self.flags.read().keys().cloned().collect()
    }

    pub fn set(&self, feature: &str, enabled: bool) {
        self.flags.write().insert(feature.to_string(), enabled);
        info!(feature, enabled, "Feature switched");
    }

    /// Flips a known feature and returns its new state.
    ///
    /// Returns `None` and changes nothing if `feature` is unknown.
    pub fn toggle(&self, feature: &str) -> Option<bool> {
        let enabled = {
            let mut flags = self.flags.write();
            let entry = flags.get_mut(feature)?;
            *entry = !*entry;
            *entry
        };
        info!(feature, enabled, "Feature switched");
        Some(enabled)
    }

    /// Every explicitly configured feature, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, bool)> {
        self.flags
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_features_are_enabled() {
        let flags = FeatureFlags::new();
        assert!(flags.is_enabled("puzzle"));
        assert!(flags.snapshot().is_empty());
    }

    #[test]
    fn toggle_and_set() {
        let flags = FeatureFlags::from_map([("puzzle", false)]);
        assert!(!flags.is_enabled("puzzle"));
        assert_eq!(flags.toggle("puzzle"), Some(true));
        flags.set("chat", false);
        assert_eq!(flags.toggle("chat"), Some(true));
        assert_eq!(
            flags.snapshot(),
            vec![("chat".to_string(), true), ("puzzle".to_string(), true)]
        );
    }

    #[test]
    fn unknown_features_cannot_be_toggled() {
        let flags = FeatureFlags::from_map([("puzzle", true)]);
        assert_eq!(flags.toggle("puzzel"), None);
        assert!(!flags.is_known("puzzel"));
        assert_eq!(flags.available(), vec!["puzzle"]);
    }

    #[test]
    fn declare_keeps_configured_state() {
        let flags = FeatureFlags::from_map([("puzzle", false)]);
        flags.declare("puzzle");
        flags.declare("roulette");
        assert!(!flags.is_enabled("puzzle"));
        assert!(flags.is_enabled("roulette"));
        assert_eq!(flags.available(), vec!["puzzle", "roulette"]);
    }
}
