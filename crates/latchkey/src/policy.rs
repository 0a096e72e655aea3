//! Key equality policies.
//!
//! A [`KeyedLock`](crate::KeyedLock) is generic over how keys are compared.
//! The policy is fixed per instance and applied to every lookup, insert, and
//! removal: `canonical` produces the form actually stored in the table, so
//! two keys contend exactly when their canonical forms are equal.

/// Injected key validation and canonicalization rule.
pub trait KeyPolicy<K> {
    /// Whether `key` is acceptable at all. Checked synchronously before any
    /// table mutation.
    fn validate(&self, _key: &K) -> bool {
        true
    }

    /// The canonical form of `key`, used for lookup, insert, and removal.
    fn canonical(&self, key: &K) -> K;
}

/// Identity policy: keys are compared exactly as given. The default for any
/// cloneable key type.
#[derive(Debug, Default, Clone, Copy)]
pub struct Verbatim;

impl<K: Clone> KeyPolicy<K> for Verbatim {
    fn canonical(&self, key: &K) -> K {
        key.clone()
    }
}

/// String keys, compared exactly. Rejects the empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseSensitive;

impl KeyPolicy<String> for CaseSensitive {
    fn validate(&self, key: &String) -> bool {
        !key.is_empty()
    }

    fn canonical(&self, key: &String) -> String {
        key.clone()
    }
}

/// String keys, compared ASCII-case-insensitively. Rejects the empty string.
#[derive(Debug, Default, Clone, Copy)]
pub struct CaseInsensitive;

impl KeyPolicy<String> for CaseInsensitive {
    fn validate(&self, key: &String) -> bool {
        !key.is_empty()
    }

    fn canonical(&self, key: &String) -> String {
        key.to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbatim_is_identity() {
        assert_eq!(Verbatim.canonical(&7u64), 7);
        assert!(KeyPolicy::<u64>::validate(&Verbatim, &7));
    }

    #[test]
    fn case_insensitive_folds_and_rejects_empty() {
        assert_eq!(CaseInsensitive.canonical(&"MiXeD".to_owned()), "mixed");
        assert!(!CaseInsensitive.validate(&String::new()));
        assert!(CaseInsensitive.validate(&"a".to_owned()));
    }

    #[test]
    fn case_sensitive_preserves_and_rejects_empty() {
        assert_eq!(CaseSensitive.canonical(&"MiXeD".to_owned()), "MiXeD");
        assert!(!CaseSensitive.validate(&String::new()));
    }
}
