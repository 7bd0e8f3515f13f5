//! Label matchers used by silences and queries.

use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ModelError, Result};
use crate::labels::Labels;

/// A predicate over a single label.
///
/// A matcher compares the value of one label against either a literal
/// string or a regex, optionally negated. A label set matches iff the
/// label is present and the comparison holds (negation inverts the
/// comparison, not the presence check — a matcher never matches a
/// label set that lacks its label).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Matcher {
    /// The label name to inspect.
    pub label: String,
    /// The literal value or regex pattern to compare against.
    pub value: String,
    /// Interpret `value` as a regex.
    #[serde(default)]
    pub is_regex: bool,
    /// Invert the comparison.
    #[serde(default)]
    pub is_negative: bool,
    /// Compiled pattern cache. `None` inside means the pattern failed
    /// to compile (possible after deserializing an unvalidated
    /// matcher), in which case the matcher never matches.
    #[serde(skip)]
    compiled: OnceLock<Option<Regex>>,
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
            && self.value == other.value
            && self.is_regex == other.is_regex
            && self.is_negative == other.is_negative
    }
}

impl Eq for Matcher {}

impl Matcher {
    /// Creates a literal equality matcher (`label == value`).
    #[must_use]
    pub fn equal(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
            is_regex: false,
            is_negative: false,
            compiled: OnceLock::new(),
        }
    }

    /// Creates a regex matcher, validating the pattern eagerly.
    pub fn regex(label: impl Into<String>, pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let compiled = Regex::new(&pattern)?;

        let matcher = Self {
            label: label.into(),
            value: pattern,
            is_regex: true,
            is_negative: false,
            compiled: OnceLock::new(),
        };
        let _ = matcher.compiled.set(Some(compiled));
        Ok(matcher)
    }

    /// Inverts this matcher.
    #[must_use]
    pub fn negate(mut self) -> Self {
        self.is_negative = !self.is_negative;
        self
    }

    /// Validates the matcher, recompiling the regex if needed.
    pub fn validate(&self) -> Result<()> {
        if self.label.is_empty() {
            return Err(ModelError::InvalidMatcher {
                reason: "matcher label must not be empty".to_string(),
            });
        }

        if self.is_regex {
            Regex::new(&self.value)?;
        }

        Ok(())
    }

    fn regex_for_match(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| match Regex::new(&self.value) {
                Ok(re) => Some(re),
                Err(error) => {
                    warn!(pattern = %self.value, %error, "matcher regex failed to compile; matcher will never match");
                    None
                }
            })
            .as_ref()
    }

    /// Returns true if this matcher matches the given label set.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        let Some(value) = labels.get(&self.label) else {
            return false;
        };

        let result = if self.is_regex {
            match self.regex_for_match() {
                Some(re) => re.is_match(value),
                None => return false,
            }
        } else {
            value == self.value
        };

        result != self.is_negative
    }
}

impl FromStr for Matcher {
    type Err = ModelError;

    /// Parses the text forms `k=v`, `k!=v`, `k=~v`, and `k!~v`.
    fn from_str(raw: &str) -> Result<Self> {
        let (sep, is_regex, is_negative) = if raw.contains("=~") {
            ("=~", true, false)
        } else if raw.contains("!~") {
            ("!~", true, true)
        } else if raw.contains("!=") {
            ("!=", false, true)
        } else if raw.contains('=') {
            ("=", false, false)
        } else {
            return Err(ModelError::InvalidMatcher {
                reason: format!("no operator in matcher {raw:?}"),
            });
        };

        let mut parts = raw.splitn(2, sep);
        let (Some(label), Some(value)) = (parts.next(), parts.next()) else {
            return Err(ModelError::InvalidMatcher {
                reason: format!("malformed matcher {raw:?}"),
            });
        };

        let matcher = Self {
            label: label.to_string(),
            value: value.to_string(),
            is_regex,
            is_negative,
            compiled: OnceLock::new(),
        };
        matcher.validate()?;
        Ok(matcher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Labels {
        Labels::from([("alertname", "foo"), ("instance", "node-1")])
    }

    mod equality_tests {
        use super::*;

        #[test]
        fn equal_matcher_matches() {
            let matcher = Matcher::equal("alertname", "foo");
            assert!(matcher.matches(&labels()));
        }

        #[test]
        fn equal_matcher_rejects_other_value() {
            let matcher = Matcher::equal("alertname", "bar");
            assert!(!matcher.matches(&labels()));
        }

        #[test]
        fn negated_equal_matcher() {
            let matcher = Matcher::equal("alertname", "bar").negate();
            assert!(matcher.matches(&labels()));

            let matcher = Matcher::equal("alertname", "foo").negate();
            assert!(!matcher.matches(&labels()));
        }

        #[test]
        fn missing_label_never_matches() {
            // Even negated: absence is not a match.
            assert!(!Matcher::equal("region", "us-west").matches(&labels()));
            assert!(!Matcher::equal("region", "us-west").negate().matches(&labels()));
        }
    }

    mod regex_tests {
        use super::*;

        #[test]
        fn regex_matcher_matches() {
            let matcher = Matcher::regex("instance", "node-[0-9]+").unwrap();
            assert!(matcher.matches(&labels()));
        }

        #[test]
        fn regex_matcher_rejects_non_matching() {
            let matcher = Matcher::regex("instance", "db-[0-9]+").unwrap();
            assert!(!matcher.matches(&labels()));
        }

        #[test]
        fn negated_regex_matcher() {
            let matcher = Matcher::regex("instance", "db-[0-9]+").unwrap().negate();
            assert!(matcher.matches(&labels()));
        }

        #[test]
        fn bad_regex_fails_construction() {
            assert!(Matcher::regex("instance", "[").is_err());
        }

        #[test]
        fn deserialized_bad_regex_never_matches() {
            // A matcher that skipped validation must not panic at
            // match time.
            let matcher: Matcher =
                serde_json::from_str(r#"{"label":"instance","value":"[","is_regex":true}"#)
                    .unwrap();
            assert!(!matcher.matches(&labels()));
        }
    }

    mod parse_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("alertname=foo", false, false ; "equality")]
        #[test_case("alertname!=foo", false, true ; "negated equality")]
        #[test_case("alertname=~fo.*", true, false ; "regex")]
        #[test_case("alertname!~fo.*", true, true ; "negated regex")]
        fn parse_operator(raw: &str, is_regex: bool, is_negative: bool) {
            let matcher: Matcher = raw.parse().unwrap();
            assert_eq!(matcher.label, "alertname");
            assert_eq!(matcher.is_regex, is_regex);
            assert_eq!(matcher.is_negative, is_negative);
        }

        #[test]
        fn parse_value_may_contain_equals() {
            let matcher: Matcher = "query=a=b".parse().unwrap();
            assert_eq!(matcher.label, "query");
            assert_eq!(matcher.value, "a=b");
        }

        #[test]
        fn parse_rejects_missing_operator() {
            assert!("alertname".parse::<Matcher>().is_err());
        }

        #[test]
        fn parse_rejects_bad_regex() {
            assert!("alertname=~[".parse::<Matcher>().is_err());
        }
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn empty_label_is_invalid() {
            assert!(Matcher::equal("", "foo").validate().is_err());
        }

        #[test]
        fn literal_matcher_is_valid() {
            assert!(Matcher::equal("alertname", "foo").validate().is_ok());
        }
    }

    #[test]
    fn serde_roundtrip_preserves_equality() {
        let matcher = Matcher::regex("instance", "node-.*").unwrap().negate();
        let json = serde_json::to_string(&matcher).unwrap();
        let parsed: Matcher = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, matcher);
    }
}
