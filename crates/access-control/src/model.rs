use std::time::Duration;

use ac_access_store::{RateLimitRuleRecord, RuleId};
use ac_service_tree::{ServiceId, ServiceTree};
use serde::{Deserialize, Serialize};

/// A resolved grant, annotated with the service that actually holds the row.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Permission {
    pub service: ServiceId,
    pub service_name: String,
    pub subject: String,
    pub allow: bool,
}

impl Permission {
    /// True when the row was found on an ancestor of `requested`.
    pub fn is_inherited(&self, requested: ServiceId) -> bool {
        self.service != requested
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitRule {
    pub id: RuleId,
    pub service: ServiceId,
    pub service_name: String,
    pub subject: String,
    #[serde(with = "duration_secs")]
    pub time_span: Duration,
    pub limit: u32,
}

impl RateLimitRule {
    /// Binds a stored row to its tree node; `None` when the service is no
    /// longer registered.
    pub(crate) fn from_record(tree: &ServiceTree, record: RateLimitRuleRecord) -> Option<Self> {
        let service = tree.by_qualified_name(&record.service)?;
        Some(Self {
            id: record.id,
            service,
            service_name: record.service,
            subject: record.subject,
            time_span: Duration::from_secs(record.time_span_secs),
            limit: record.limit,
        })
    }
}

/// Rate-limit rules serialize their window as whole seconds.
mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
