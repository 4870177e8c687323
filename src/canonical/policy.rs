//! Canonical policy: the frozen set of normalization flags behind a
//! canonicalizer version.
//!
//! A policy is built once (defaults, [`PolicyBuilder`] or deserialized from
//! config) and never mutated afterwards. Publishing policies through a
//! [`PolicyRegistry`] enforces that a version string always names the same
//! flags and that versions only move forward.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Version of the default canonical policy
pub const POLICY_VERSION: &str = "1.0.0";

/// Unicode normalization form applied as the first canonicalization step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnicodeForm {
    /// Canonical composition
    Nfc,
    /// Compatibility composition (folds presentation forms and ligatures)
    Nfkc,
    /// Skip Unicode normalization
    None,
}

impl Default for UnicodeForm {
    fn default() -> Self {
        Self::Nfc
    }
}

/// Immutable normalization policy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalPolicy {
    #[serde(default = "default_version")]
    version: String,

    #[serde(default)]
    unicode_form: UnicodeForm,

    #[serde(default = "default_true")]
    strip_diacritics: bool,

    #[serde(default = "default_true")]
    normalize_hamza: bool,

    #[serde(default = "default_true")]
    fold_alef_madda: bool,

    #[serde(default = "default_true")]
    remove_tatweel: bool,

    #[serde(default)]
    normalize_alef_maqsura: bool,
}

fn default_version() -> String {
    POLICY_VERSION.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CanonicalPolicy {
    fn default() -> Self {
        Self {
            version: default_version(),
            unicode_form: UnicodeForm::default(),
            strip_diacritics: true,
            normalize_hamza: true,
            fold_alef_madda: true,
            remove_tatweel: true,
            normalize_alef_maqsura: false,
        }
    }
}

impl CanonicalPolicy {
    /// Start building a policy from the defaults
    pub fn builder() -> PolicyBuilder {
        PolicyBuilder {
            policy: Self::default(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn unicode_form(&self) -> UnicodeForm {
        self.unicode_form
    }

    pub fn strip_diacritics(&self) -> bool {
        self.strip_diacritics
    }

    pub fn normalize_hamza(&self) -> bool {
        self.normalize_hamza
    }

    pub fn fold_alef_madda(&self) -> bool {
        self.fold_alef_madda
    }

    pub fn remove_tatweel(&self) -> bool {
        self.remove_tatweel
    }

    pub fn normalize_alef_maqsura(&self) -> bool {
        self.normalize_alef_maqsura
    }

    /// Stable string covering the version and every flag
    ///
    /// Used to key caches, so two policies that share a version but differ
    /// in flags never share cached offset maps.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{:?}|{}{}{}{}{}",
            self.version,
            self.unicode_form,
            self.strip_diacritics as u8,
            self.normalize_hamza as u8,
            self.fold_alef_madda as u8,
            self.remove_tatweel as u8,
            self.normalize_alef_maqsura as u8,
        )
    }
}

/// Builder for [`CanonicalPolicy`]; consumed by [`PolicyBuilder::build`]
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    policy: CanonicalPolicy,
}

impl PolicyBuilder {
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.policy.version = version.into();
        self
    }

    pub fn unicode_form(mut self, form: UnicodeForm) -> Self {
        self.policy.unicode_form = form;
        self
    }

    pub fn strip_diacritics(mut self, enabled: bool) -> Self {
        self.policy.strip_diacritics = enabled;
        self
    }

    pub fn normalize_hamza(mut self, enabled: bool) -> Self {
        self.policy.normalize_hamza = enabled;
        self
    }

    pub fn fold_alef_madda(mut self, enabled: bool) -> Self {
        self.policy.fold_alef_madda = enabled;
        self
    }

    pub fn remove_tatweel(mut self, enabled: bool) -> Self {
        self.policy.remove_tatweel = enabled;
        self
    }

    pub fn normalize_alef_maqsura(mut self, enabled: bool) -> Self {
        self.policy.normalize_alef_maqsura = enabled;
        self
    }

    pub fn build(self) -> CanonicalPolicy {
        self.policy
    }
}

/// Compare two dotted version strings numerically, falling back to a plain
/// string comparison when either side has a non-numeric component
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |v: &str| -> Option<Vec<u64>> {
        v.split('.').map(|part| part.parse::<u64>().ok()).collect()
    };

    match (parse(a), parse(b)) {
        (Some(mut left), Some(mut right)) => {
            let width = left.len().max(right.len());
            left.resize(width, 0);
            right.resize(width, 0);
            left.cmp(&right)
        }
        _ => a.cmp(b),
    }
}

/// Published policies, keyed by version
#[derive(Debug, Clone, Default)]
pub struct PolicyRegistry {
    published: BTreeMap<String, CanonicalPolicy>,
    latest: Option<String>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a policy under its version
    ///
    /// Re-publishing an identical policy is a no-op. Publishing different
    /// flags under an existing version, or a version that does not move past
    /// the latest one, is rejected.
    pub fn publish(&mut self, policy: CanonicalPolicy) -> CoreResult<()> {
        if let Some(existing) = self.published.get(policy.version()) {
            if existing == &policy {
                return Ok(());
            }
            return Err(CoreError::ImmutableConfig(format!(
                "canonical policy {} is already published with different flags",
                policy.version()
            )));
        }

        if let Some(latest) = &self.latest {
            if compare_versions(policy.version(), latest) != Ordering::Greater {
                return Err(CoreError::ImmutableConfig(format!(
                    "canonical policy version {} does not advance past {}",
                    policy.version(),
                    latest
                )));
            }
        }

        self.latest = Some(policy.version().to_string());
        self.published.insert(policy.version().to_string(), policy);
        Ok(())
    }

    pub fn get(&self, version: &str) -> Option<&CanonicalPolicy> {
        self.published.get(version)
    }

    pub fn latest(&self) -> Option<&CanonicalPolicy> {
        self.latest.as_ref().and_then(|v| self.published.get(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = CanonicalPolicy::default();
        assert_eq!(policy.version(), "1.0.0");
        assert_eq!(policy.unicode_form(), UnicodeForm::Nfc);
        assert!(policy.strip_diacritics());
        assert!(!policy.normalize_alef_maqsura());
    }

    #[test]
    fn test_policy_from_yaml_uses_defaults() {
        let policy: CanonicalPolicy = serde_yaml::from_str("normalize_alef_maqsura: true").unwrap();
        assert!(policy.normalize_alef_maqsura());
        assert!(policy.normalize_hamza());
        assert_eq!(policy.version(), POLICY_VERSION);
    }

    #[test]
    fn test_republish_same_policy_is_idempotent() {
        let mut registry = PolicyRegistry::new();
        registry.publish(CanonicalPolicy::default()).unwrap();
        assert!(registry.publish(CanonicalPolicy::default()).is_ok());
    }

    #[test]
    fn test_mutating_published_version_fails() {
        let mut registry = PolicyRegistry::new();
        registry.publish(CanonicalPolicy::default()).unwrap();

        let altered = CanonicalPolicy::builder().remove_tatweel(false).build();
        let result = registry.publish(altered);
        assert!(matches!(result, Err(CoreError::ImmutableConfig(_))));
        assert!(registry.get("1.0.0").unwrap().remove_tatweel());
    }

    #[test]
    fn test_versions_must_advance() {
        let mut registry = PolicyRegistry::new();
        registry
            .publish(CanonicalPolicy::builder().version("1.2.0").build())
            .unwrap();

        let newer = CanonicalPolicy::builder().version("1.10.0").build();
        assert!(registry.publish(newer).is_ok());

        let stale = CanonicalPolicy::builder().version("1.3.0").build();
        assert!(matches!(
            registry.publish(stale),
            Err(CoreError::ImmutableConfig(_))
        ));
        assert_eq!(registry.latest().unwrap().version(), "1.10.0");
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.9", "1.10"), Ordering::Less);
    }

    #[test]
    fn test_fingerprint_differs_by_flags() {
        let a = CanonicalPolicy::default();
        let b = CanonicalPolicy::builder().strip_diacritics(false).build();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
