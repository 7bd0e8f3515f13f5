//! Silences: time-bounded suppression rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::labels::Labels;
use crate::matcher::Matcher;

/// A time window during which alerts matching a set of matchers are
/// suppressed rather than notified.
///
/// An alert is silenced iff *every* matcher on the silence matches its
/// labels, and `now` falls inside the `[starts_at, ends_at)` window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Silence {
    /// Unique identifier, assigned at creation.
    pub id: String,
    /// Who created the silence.
    pub created_by: String,
    /// Why.
    pub comment: String,
    /// When the silence takes effect.
    pub starts_at: DateTime<Utc>,
    /// When the silence expires. `None` means open-ended.
    pub ends_at: Option<DateTime<Utc>>,
    /// The label predicates; all must match.
    pub matchers: Vec<Matcher>,
}

impl Silence {
    /// Creates a new silence with a freshly generated ID, active from
    /// now until `ends_at`.
    #[must_use]
    pub fn new(
        created_by: impl Into<String>,
        comment: impl Into<String>,
        ends_at: Option<DateTime<Utc>>,
        matchers: Vec<Matcher>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_by: created_by.into(),
            comment: comment.into(),
            starts_at: Utc::now(),
            ends_at,
            matchers,
        }
    }

    /// Validates the silence.
    ///
    /// A valid silence has at least one valid matcher and, if it has
    /// an end time, ends strictly after it starts.
    pub fn validate(&self) -> Result<()> {
        if self.matchers.is_empty() {
            return Err(ModelError::InvalidSilence {
                reason: "silence must have at least one matcher".to_string(),
            });
        }

        if let Some(ends_at) = self.ends_at
            && ends_at <= self.starts_at
        {
            return Err(ModelError::InvalidSilence {
                reason: format!(
                    "silence ends at {ends_at} which is not after its start {}",
                    self.starts_at
                ),
            });
        }

        for matcher in &self.matchers {
            matcher.validate()?;
        }

        Ok(())
    }

    /// Returns true if the silence is in effect at the given instant.
    #[must_use]
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if now < self.starts_at {
            return false;
        }
        match self.ends_at {
            Some(ends_at) => now < ends_at,
            None => true,
        }
    }

    /// Returns true if every matcher on this silence matches the
    /// given label set.
    ///
    /// Note this is a pure label test; callers decide separately
    /// whether the silence is active.
    #[must_use]
    pub fn matches(&self, labels: &Labels) -> bool {
        !self.matchers.is_empty() && self.matchers.iter().all(|m| m.matches(labels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_silence(matchers: Vec<Matcher>) -> Silence {
        Silence::new(
            "ops@example.com",
            "maintenance window",
            Some(Utc::now() + Duration::hours(1)),
            matchers,
        )
    }

    mod validate_tests {
        use super::*;

        #[test]
        fn valid_silence_passes() {
            let silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            assert!(silence.validate().is_ok());
        }

        #[test]
        fn empty_matchers_rejected() {
            let silence = test_silence(vec![]);
            assert!(silence.validate().is_err());
        }

        #[test]
        fn end_before_start_rejected() {
            let mut silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            silence.ends_at = Some(silence.starts_at - Duration::minutes(5));
            assert!(silence.validate().is_err());
        }

        #[test]
        fn end_equal_to_start_rejected() {
            let mut silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            silence.ends_at = Some(silence.starts_at);
            assert!(silence.validate().is_err());
        }

        #[test]
        fn open_ended_silence_passes() {
            let mut silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            silence.ends_at = None;
            assert!(silence.validate().is_ok());
        }

        #[test]
        fn invalid_matcher_rejected() {
            let mut bad: Matcher = "alertname=foo".parse().unwrap();
            bad.is_regex = true;
            bad.value = "[".to_string();
            let silence = test_silence(vec![bad]);
            assert!(silence.validate().is_err());
        }
    }

    mod activity_tests {
        use super::*;

        #[test]
        fn active_inside_window() {
            let silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            assert!(silence.is_active_at(Utc::now()));
        }

        #[test]
        fn inactive_before_start() {
            let mut silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            silence.starts_at = Utc::now() + Duration::hours(1);
            silence.ends_at = Some(Utc::now() + Duration::hours(2));
            assert!(!silence.is_active_at(Utc::now()));
        }

        #[test]
        fn inactive_after_end() {
            let mut silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            silence.starts_at = Utc::now() - Duration::hours(2);
            silence.ends_at = Some(Utc::now() - Duration::hours(1));
            assert!(!silence.is_active_at(Utc::now()));
        }

        #[test]
        fn open_ended_stays_active() {
            let mut silence = test_silence(vec![Matcher::equal("alertname", "foo")]);
            silence.ends_at = None;
            assert!(silence.is_active_at(Utc::now() + Duration::days(365)));
        }
    }

    mod match_tests {
        use super::*;

        #[test]
        fn all_matchers_must_match() {
            let silence = test_silence(vec![
                Matcher::equal("alertname", "foo"),
                Matcher::equal("env", "prod"),
            ]);

            assert!(silence.matches(&Labels::from([("alertname", "foo"), ("env", "prod")])));
            assert!(!silence.matches(&Labels::from([("alertname", "foo"), ("env", "dev")])));
            assert!(!silence.matches(&Labels::from([("alertname", "foo")])));
        }

        #[test]
        fn no_matchers_matches_nothing() {
            let silence = test_silence(vec![]);
            assert!(!silence.matches(&Labels::from([("alertname", "foo")])));
        }

        #[test]
        fn regex_matchers_participate() {
            let silence = test_silence(vec![Matcher::regex("instance", "node-.*").unwrap()]);
            assert!(silence.matches(&Labels::from([("instance", "node-7")])));
            assert!(!silence.matches(&Labels::from([("instance", "db-7")])));
        }
    }

    #[test]
    fn new_silences_get_distinct_ids() {
        let a = test_silence(vec![Matcher::equal("alertname", "foo")]);
        let b = test_silence(vec![Matcher::equal("alertname", "foo")]);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn serde_roundtrip() {
        let silence = test_silence(vec![
            Matcher::equal("alertname", "foo"),
            Matcher::regex("instance", "node-.*").unwrap().negate(),
        ]);
        let json = serde_json::to_string(&silence).unwrap();
        let parsed: Silence = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, silence);
    }
}
