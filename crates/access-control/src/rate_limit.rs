use std::sync::Arc;
use std::time::Duration;

use ac_access_store::{AccessStore, NewRateLimitRule, RateLimitRuleRecord, RuleId};
use ac_service_tree::{ServiceId, ServiceTree};
use chrono::{TimeDelta, Utc};
use tracing::{debug, info};

use crate::errors::{AccessError, AccessResult};
use crate::model::RateLimitRule;

/// Longest window a rule may declare (100 years).
pub const MAX_TIME_SPAN: Duration = Duration::from_secs(100 * 365 * 86_400);

fn validate_time_span(span: Duration) -> AccessResult<()> {
    if span.as_secs() == 0 {
        return Err(AccessError::InvalidRuleDefinition(
            "time span must be at least one second".into(),
        ));
    }
    let representable = TimeDelta::from_std(span)
        .ok()
        .and_then(|delta| Utc::now().checked_add_signed(delta))
        .is_some();
    if span > MAX_TIME_SPAN || !representable {
        return Err(AccessError::InvalidRuleDefinition(format!(
            "time span of {}s exceeds the maximum of {}s",
            span.as_secs(),
            MAX_TIME_SPAN.as_secs()
        )));
    }
    Ok(())
}

/// Parses a rule window such as `30s`, `1m`, `1h 30m`, `1d` or bare
/// integer seconds.
pub fn parse_time_span(raw: &str) -> AccessResult<Duration> {
    let raw = raw.trim();
    let span = match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => humantime::parse_duration(raw).map_err(|err| {
            AccessError::InvalidRuleDefinition(format!("time span {raw:?}: {err}"))
        })?,
    };
    validate_time_span(span)?;
    Ok(span)
}

/// Quota definitions attached to services.
///
/// Unlike permissions, every rule found along the ancestor chain applies.
#[derive(Clone)]
pub struct RateLimitStore {
    tree: Arc<ServiceTree>,
    store: Arc<dyn AccessStore>,
}

impl RateLimitStore {
    pub fn new(tree: Arc<ServiceTree>, store: Arc<dyn AccessStore>) -> Self {
        Self { tree, store }
    }

    fn bind_all(&self, records: Vec<RateLimitRuleRecord>) -> Vec<RateLimitRule> {
        records
            .into_iter()
            .filter_map(|record| RateLimitRule::from_record(&self.tree, record))
            .collect()
    }

    /// Rules for each subject, on `service` and (with `trace`) every ancestor.
    ///
    /// Emission order is subject-major, nearest node first. A rule reachable
    /// through several subjects appears once per subject.
    pub async fn get_rate_limit_rules<S: AsRef<str>>(
        &self,
        service: ServiceId,
        subjects: &[S],
        trace: bool,
    ) -> AccessResult<Vec<RateLimitRule>> {
        let nodes: Vec<_> = if trace {
            self.tree.trace(service).collect()
        } else {
            vec![self.tree.node(service)]
        };

        let mut rules = Vec::new();
        for subject in subjects {
            for node in &nodes {
                let records = self
                    .store
                    .list_rules(Some(node.qualified_name()), Some(subject.as_ref()))
                    .await?;
                rules.extend(self.bind_all(records));
            }
        }
        Ok(rules)
    }

    /// Every rule on `service` (and with `trace`, on each ancestor) regardless of subject.
    pub async fn get_all_rate_limit_rules(
        &self,
        service: ServiceId,
        trace: bool,
    ) -> AccessResult<Vec<RateLimitRule>> {
        let nodes: Vec<_> = if trace {
            self.tree.trace(service).collect()
        } else {
            vec![self.tree.node(service)]
        };

        let mut rules = Vec::new();
        for node in nodes {
            let records = self
                .store
                .list_rules(Some(node.qualified_name()), None)
                .await?;
            rules.extend(self.bind_all(records));
        }
        Ok(rules)
    }

    /// Rules for `subjects` across the whole tree.
    pub async fn get_all_rate_limit_rules_by_subject<S: AsRef<str>>(
        &self,
        subjects: &[S],
    ) -> AccessResult<Vec<RateLimitRule>> {
        let mut rules = Vec::new();
        for subject in subjects {
            let records = self.store.list_rules(None, Some(subject.as_ref())).await?;
            rules.extend(self.bind_all(records));
        }
        Ok(rules)
    }

    /// Every stored rule whose service is still registered.
    pub async fn all_rate_limit_rules(&self) -> AccessResult<Vec<RateLimitRule>> {
        let records = self.store.list_rules(None, None).await?;
        Ok(self.bind_all(records))
    }

    pub async fn add_rate_limit_rule(
        &self,
        service: ServiceId,
        subject: &str,
        time_span: Duration,
        limit: u32,
    ) -> AccessResult<RateLimitRule> {
        if limit == 0 {
            return Err(AccessError::InvalidRuleDefinition(
                "limit must be greater than zero".into(),
            ));
        }
        validate_time_span(time_span)?;
        if subject.trim().is_empty() {
            return Err(AccessError::InvalidRuleDefinition(
                "subject must not be empty".into(),
            ));
        }

        let node = self.tree.node(service);
        let record = self
            .store
            .insert_rule(NewRateLimitRule {
                service: node.qualified_name().to_string(),
                subject: subject.to_string(),
                time_span_secs: time_span.as_secs(),
                limit,
            })
            .await?;
        info!(
            rule_id = record.id,
            service = %record.service,
            subject = %record.subject,
            limit,
            time_span_secs = record.time_span_secs,
            "rate limit rule added"
        );
        Ok(RateLimitRule {
            id: record.id,
            service,
            service_name: record.service,
            subject: record.subject,
            time_span: Duration::from_secs(record.time_span_secs),
            limit: record.limit,
        })
    }

    /// Deletes a rule and all of its tokens. Returns whether the rule existed.
    pub async fn remove_rate_limit_rule(&self, rule_id: RuleId) -> AccessResult<bool> {
        let removed = self.store.delete_rule(rule_id).await?;
        debug!(rule_id, removed, "rate limit rule removal");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_access_store::MemoryStore;
    use ac_service_tree::TreeSpec;

    fn fixture() -> (RateLimitStore, Arc<dyn AccessStore>, Arc<ServiceTree>) {
        let tree = Arc::new(
            TreeSpec::with_children(
                "nonebot",
                vec![TreeSpec::with_children("weather", vec![TreeSpec::leaf("forecast")])],
            )
            .build()
            .unwrap(),
        );
        let store: Arc<dyn AccessStore> = Arc::new(MemoryStore::new());
        (RateLimitStore::new(Arc::clone(&tree), Arc::clone(&store)), store, tree)
    }

    #[test]
    fn time_spans_accept_suffixes_and_bare_seconds() {
        assert_eq!(parse_time_span("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_time_span("1m").unwrap(), Duration::from_secs(60));
        assert_eq!(parse_time_span("1h 30m").unwrap(), Duration::from_secs(5_400));
        assert_eq!(parse_time_span("1d").unwrap(), Duration::from_secs(86_400));
        assert_eq!(parse_time_span(" 45 ").unwrap(), Duration::from_secs(45));
        assert!(matches!(
            parse_time_span("soon"),
            Err(AccessError::InvalidRuleDefinition(_))
        ));
        assert!(parse_time_span("0").is_err());
    }

    #[test]
    fn unrepresentable_time_spans_are_rejected() {
        assert_eq!(parse_time_span("36500d").unwrap(), MAX_TIME_SPAN);
        for raw in ["10000000000000", "10000000000000000", "18446744073709551615"] {
            assert!(matches!(
                parse_time_span(raw),
                Err(AccessError::InvalidRuleDefinition(_))
            ));
        }
    }

    #[tokio::test]
    async fn oversized_spans_are_never_stored() {
        let (rules, _, tree) = fixture();
        let root = tree.root();
        for secs in [
            MAX_TIME_SPAN.as_secs() + 1,
            10_000_000_000_000,
            10_000_000_000_000_000,
            u64::MAX,
        ] {
            assert!(matches!(
                rules
                    .add_rate_limit_rule(root, "all", Duration::from_secs(secs), 5)
                    .await,
                Err(AccessError::InvalidRuleDefinition(_))
            ));
        }
        assert!(rules.all_rate_limit_rules().await.unwrap().is_empty());

        let longest = rules
            .add_rate_limit_rule(root, "all", MAX_TIME_SPAN, 5)
            .await
            .unwrap();
        assert_eq!(longest.time_span, MAX_TIME_SPAN);
    }

    #[tokio::test]
    async fn zero_limit_and_span_are_rejected() {
        let (rules, _, tree) = fixture();
        let root = tree.root();
        assert!(matches!(
            rules.add_rate_limit_rule(root, "all", Duration::from_secs(60), 0).await,
            Err(AccessError::InvalidRuleDefinition(_))
        ));
        assert!(matches!(
            rules.add_rate_limit_rule(root, "all", Duration::from_millis(500), 1).await,
            Err(AccessError::InvalidRuleDefinition(_))
        ));
        assert!(rules.all_rate_limit_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tracing_collects_rules_from_every_ancestor() {
        let (rules, _, tree) = fixture();
        let weather = tree.by_qualified_name("weather").unwrap();
        let forecast = tree.by_qualified_name("weather.forecast").unwrap();
        let minute = rules
            .add_rate_limit_rule(forecast, "all", Duration::from_secs(60), 5)
            .await
            .unwrap();
        let day = rules
            .add_rate_limit_rule(weather, "all", Duration::from_secs(86_400), 100)
            .await
            .unwrap();
        let user = rules
            .add_rate_limit_rule(tree.root(), "qq:1", Duration::from_secs(60), 1)
            .await
            .unwrap();

        let traced = rules
            .get_rate_limit_rules(forecast, &["qq:1", "all"], true)
            .await
            .unwrap();
        let ids: Vec<_> = traced.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![user.id, minute.id, day.id]);

        let direct = rules
            .get_rate_limit_rules(forecast, &["qq:1", "all"], false)
            .await
            .unwrap();
        assert_eq!(direct, vec![minute.clone()]);

        let all = rules.get_all_rate_limit_rules(forecast, true).await.unwrap();
        assert_eq!(all.len(), 3);
        let by_subject = rules
            .get_all_rate_limit_rules_by_subject(&["qq:1"])
            .await
            .unwrap();
        assert_eq!(by_subject, vec![user]);
    }

    #[tokio::test]
    async fn rules_for_unregistered_services_are_skipped() {
        let (rules, store, _) = fixture();
        store
            .insert_rule(NewRateLimitRule {
                service: "retired_plugin".into(),
                subject: "all".into(),
                time_span_secs: 60,
                limit: 1,
            })
            .await
            .unwrap();
        assert!(rules.all_rate_limit_rules().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn removing_missing_rule_is_not_an_error() {
        let (rules, _, _) = fixture();
        assert!(!rules.remove_rate_limit_rule(42).await.unwrap());
    }
}
