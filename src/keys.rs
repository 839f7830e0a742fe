//! Identity types: [`JobKey`], [`TriggerKey`], and group matchers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The default group name used when none is specified.
pub const DEFAULT_GROUP: &str = "DEFAULT";

/// Identifies a job by `(group, name)`.
///
/// Equality and hashing consider both components; `group` defaults to
/// [`DEFAULT_GROUP`] when constructed via [`JobKey::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    name: String,
    group: String,
}

/// Identifies a trigger by `(group, name)`. Same shape and semantics as [`JobKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TriggerKey {
    name: String,
    group: String,
}

macro_rules! impl_key {
    ($ty:ident, $kind:literal) => {
        impl $ty {
            /// Creates a key in the [`DEFAULT_GROUP`].
            pub fn new(name: impl Into<String>) -> Self {
                Self::in_group(name, DEFAULT_GROUP)
            }

            /// Creates a key in an explicit group.
            ///
            /// An empty `group` is treated as [`DEFAULT_GROUP`].
            pub fn in_group(name: impl Into<String>, group: impl Into<String>) -> Self {
                let group = group.into();
                let group = if group.is_empty() {
                    DEFAULT_GROUP.to_string()
                } else {
                    group
                };
                Self {
                    name: name.into(),
                    group,
                }
            }

            /// The name component.
            pub fn name(&self) -> &str {
                &self.name
            }

            /// The group component.
            pub fn group(&self) -> &str {
                &self.group
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}.{}.{}", $kind, self.group, self.name)
            }
        }
    };
}

impl_key!(JobKey, "job");
impl_key!(TriggerKey, "trigger");

/// The comparison operator a [`GroupMatcher`] applies to a key's group string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatcherOperator {
    /// The group equals the compare value exactly.
    Equals,
    /// The group starts with the compare value.
    StartsWith,
    /// The group ends with the compare value.
    EndsWith,
    /// The group contains the compare value as a substring.
    Contains,
    /// Matches any group.
    Anything,
}

/// A predicate over the `group` component of a [`JobKey`] or [`TriggerKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMatcher {
    operator: MatcherOperator,
    compare_to: String,
}

impl GroupMatcher {
    /// Matches keys whose group equals `group` exactly.
    pub fn group_equals(group: impl Into<String>) -> Self {
        Self {
            operator: MatcherOperator::Equals,
            compare_to: group.into(),
        }
    }

    /// Matches keys whose group starts with `prefix`.
    pub fn group_starts_with(prefix: impl Into<String>) -> Self {
        Self {
            operator: MatcherOperator::StartsWith,
            compare_to: prefix.into(),
        }
    }

    /// Matches keys whose group ends with `suffix`.
    pub fn group_ends_with(suffix: impl Into<String>) -> Self {
        Self {
            operator: MatcherOperator::EndsWith,
            compare_to: suffix.into(),
        }
    }

    /// Matches keys whose group contains `needle` as a substring.
    pub fn group_contains(needle: impl Into<String>) -> Self {
        Self {
            operator: MatcherOperator::Contains,
            compare_to: needle.into(),
        }
    }

    /// Matches any group.
    pub fn any_group() -> Self {
        Self {
            operator: MatcherOperator::Anything,
            compare_to: String::new(),
        }
    }

    /// The operator this matcher applies.
    pub fn operator(&self) -> MatcherOperator {
        self.operator
    }

    /// The value the operator compares against.
    pub fn compare_to(&self) -> &str {
        &self.compare_to
    }

    /// Evaluates the matcher against a group string.
    pub fn matches_group(&self, group: &str) -> bool {
        match self.operator {
            MatcherOperator::Equals => group == self.compare_to,
            MatcherOperator::StartsWith => group.starts_with(&self.compare_to),
            MatcherOperator::EndsWith => group.ends_with(&self.compare_to),
            MatcherOperator::Contains => group.contains(&self.compare_to),
            MatcherOperator::Anything => true,
        }
    }

    /// Evaluates the matcher against a [`JobKey`].
    pub fn matches_job(&self, key: &JobKey) -> bool {
        self.matches_group(key.group())
    }

    /// Evaluates the matcher against a [`TriggerKey`].
    pub fn matches_trigger(&self, key: &TriggerKey) -> bool {
        self.matches_group(key.group())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_group_applied() {
        let key = JobKey::new("nightly");
        assert_eq!(key.group(), DEFAULT_GROUP);
        assert_eq!(key.name(), "nightly");
    }

    #[test]
    fn empty_group_falls_back_to_default() {
        let key = TriggerKey::in_group("t1", "");
        assert_eq!(key.group(), DEFAULT_GROUP);
    }

    #[test]
    fn equality_considers_both_components() {
        let a = JobKey::in_group("x", "G1");
        let b = JobKey::in_group("x", "G2");
        assert_ne!(a, b);
        assert_eq!(a, JobKey::in_group("x", "G1"));
    }

    #[test]
    fn matcher_operators() {
        let key = JobKey::in_group("x", "reports-daily");
        assert!(GroupMatcher::group_equals("reports-daily").matches_job(&key));
        assert!(GroupMatcher::group_starts_with("reports").matches_job(&key));
        assert!(GroupMatcher::group_ends_with("daily").matches_job(&key));
        assert!(GroupMatcher::group_contains("s-d").matches_job(&key));
        assert!(GroupMatcher::any_group().matches_job(&key));
        assert!(!GroupMatcher::group_equals("reports").matches_job(&key));
    }
}
