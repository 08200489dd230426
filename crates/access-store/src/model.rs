use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

pub type RuleId = i64;
pub type TokenId = i64;

/// Persisted allow/deny grant keyed by `(service, subject)`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionRecord {
    pub service: String,
    pub subject: String,
    pub allow: bool,
}

/// Persisted quota definition.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRuleRecord {
    pub id: RuleId,
    pub service: String,
    pub subject: String,
    pub time_span_secs: u64,
    pub limit: u32,
}

impl RateLimitRuleRecord {
    pub fn time_span(&self) -> TimeDelta {
        i64::try_from(self.time_span_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX)
    }
}

/// Rule fields supplied at creation; the store assigns the id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewRateLimitRule {
    pub service: String,
    pub subject: String,
    pub time_span_secs: u64,
    pub limit: u32,
}

/// One quota consumption event.
///
/// A token counts against its rule while `now < expire_time`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenRecord {
    pub id: TokenId,
    pub rule_id: RuleId,
    pub user: String,
    pub acquire_time: DateTime<Utc>,
    pub expire_time: DateTime<Utc>,
}

impl TokenRecord {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expire_time
    }
}

/// Result of one ledger transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    /// Every rule admitted; the listed tokens were committed.
    Admitted(Vec<TokenRecord>),
    /// `rule_id` was exhausted; nothing from the transaction was kept.
    Denied { rule_id: RuleId },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(time_span_secs: u64) -> RateLimitRuleRecord {
        RateLimitRuleRecord {
            id: 1,
            service: "weather".into(),
            subject: "all".into(),
            time_span_secs,
            limit: 1,
        }
    }

    #[test]
    fn unrepresentable_spans_saturate() {
        assert_eq!(rule(60).time_span(), TimeDelta::seconds(60));
        assert_eq!(rule(10_000_000_000_000_000).time_span(), TimeDelta::MAX);
        assert_eq!(rule(u64::MAX).time_span(), TimeDelta::MAX);
    }
}
