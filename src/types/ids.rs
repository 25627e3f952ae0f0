//! Newtype wrappers for domain identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a time group, assigned by the remote source.
///
/// This is the natural key of the delivery ledger: every event with the same
/// id is the same piece of work, however many times it is delivered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeGroupId(pub String);

impl TimeGroupId {
    pub fn new(s: impl Into<String>) -> Self {
        TimeGroupId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimeGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TimeGroupId {
    fn from(s: String) -> Self {
        TimeGroupId(s)
    }
}

impl From<&str> for TimeGroupId {
    fn from(s: &str) -> Self {
        TimeGroupId(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn serializes_as_bare_string(s in "[a-zA-Z0-9-]{1,40}") {
            let id = TimeGroupId::new(&s);
            let json = serde_json::to_string(&id).unwrap();
            prop_assert_eq!(json, serde_json::to_string(&s).unwrap());
        }

        #[test]
        fn display_is_underlying(s in ".*") {
            prop_assert_eq!(TimeGroupId::new(&s).to_string(), s);
        }
    }
}
