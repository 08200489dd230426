use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use ac_access_store::{
    AccessStore, Admission, RuleId, StoreError, StoreResult, TokenLedger, TokenRecord,
};
use ac_service_tree::ServiceId;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::errors::{AccessError, AccessResult};
use crate::model::RateLimitRule;
use crate::rate_limit::RateLimitStore;

/// Source of "now" for window arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// Keeps the first occurrence of every rule id.
fn dedup_rules(rules: Vec<RateLimitRule>) -> Vec<RateLimitRule> {
    let mut seen = HashSet::with_capacity(rules.len());
    rules.into_iter().filter(|rule| seen.insert(rule.id)).collect()
}

/// Charges one token per rule, in order, or none at all.
///
/// Each rule is re-read inside the transaction so a rule deleted since
/// resolution surfaces as [`StoreError::RuleNotFound`].
fn admit(
    ledger: &mut dyn TokenLedger,
    rule_ids: &[RuleId],
    user: &str,
    now: DateTime<Utc>,
) -> StoreResult<Admission> {
    let mut acquired = Vec::with_capacity(rule_ids.len());
    for &rule_id in rule_ids {
        let rule = ledger
            .rule(rule_id)?
            .ok_or(StoreError::RuleNotFound(rule_id))?;
        let live = ledger.count_live(rule_id, user, now)?;
        if live >= u64::from(rule.limit) {
            trace!(rule_id, user, live, limit = rule.limit, "rate limit reached");
            return Ok(Admission::Denied { rule_id });
        }
        let expire_time = now.checked_add_signed(rule.time_span()).ok_or_else(|| {
            StoreError::Internal(format!("expiry of rule {rule_id} overflows"))
        })?;
        let token = ledger.insert_token(rule_id, user, now, expire_time)?;
        trace!(
            rule_id,
            user,
            token_id = token.id,
            remaining = u64::from(rule.limit) - live - 1,
            "token acquired"
        );
        acquired.push(token);
    }
    Ok(Admission::Admitted(acquired))
}

/// Multi-rule admission control over the token ledger.
#[derive(Clone)]
pub struct TokenEngine {
    store: Arc<dyn AccessStore>,
    rules: RateLimitStore,
    clock: Arc<dyn Clock>,
}

impl TokenEngine {
    pub fn new(store: Arc<dyn AccessStore>, rules: RateLimitStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            rules,
            clock,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Every distinct rule reachable from `service` for `subjects`, in
    /// first-emission order.
    pub async fn applicable_rules<S: AsRef<str>>(
        &self,
        service: ServiceId,
        subjects: &[S],
    ) -> AccessResult<Vec<RateLimitRule>> {
        let rules = self
            .rules
            .get_rate_limit_rules(service, subjects, true)
            .await?;
        Ok(dedup_rules(rules))
    }

    /// Charges `user` one token on every rule in `rules` inside a single
    /// transaction. A denial keeps nothing.
    pub async fn acquire_rule_tokens(
        &self,
        rules: &[RateLimitRule],
        user: &str,
    ) -> AccessResult<Admission> {
        let mut seen = HashSet::with_capacity(rules.len());
        let rule_ids: Vec<RuleId> = rules
            .iter()
            .map(|rule| rule.id)
            .filter(|id| seen.insert(*id))
            .collect();
        if rule_ids.is_empty() {
            return Ok(Admission::Admitted(Vec::new()));
        }

        let now = self.clock.now();
        let owner = user.to_string();
        let admission = self
            .store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                admit(ledger, &rule_ids, &owner, now)
            }))
            .await?;
        if let Admission::Denied { rule_id } = admission {
            debug!(rule_id, user, "token acquisition denied");
        }
        Ok(admission)
    }

    /// Returns whether `user` may proceed, consuming one token on every
    /// applicable rule when it may.
    ///
    /// A rule deleted between resolution and admission triggers one fresh
    /// resolution; a second miss is returned as [`AccessError::RuleNotFound`].
    pub async fn acquire_token_for_rate_limit<S: AsRef<str>>(
        &self,
        service: ServiceId,
        subjects: &[S],
        user: &str,
    ) -> AccessResult<bool> {
        let mut retried = false;
        loop {
            let rules = self.applicable_rules(service, subjects).await?;
            if rules.is_empty() {
                return Ok(true);
            }
            match self.acquire_rule_tokens(&rules, user).await {
                Ok(admission) => return Ok(admission.is_admitted()),
                Err(AccessError::RuleNotFound(rule_id)) if !retried => {
                    debug!(rule_id, user, "rule vanished during acquisition, resolving again");
                    retried = true;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Earliest instant at which every exhausted rule has a free slot again,
    /// or `None` when `user` is not currently limited.
    pub async fn next_available<S: AsRef<str>>(
        &self,
        service: ServiceId,
        subjects: &[S],
        user: &str,
    ) -> AccessResult<Option<DateTime<Utc>>> {
        let now = self.clock.now();
        let mut latest: Option<DateTime<Utc>> = None;
        for rule in self.applicable_rules(service, subjects).await? {
            let live = self.store.count_live_tokens(rule.id, user, now).await?;
            if live < u64::from(rule.limit) {
                continue;
            }
            if let Some(token) = self.first_expire_token(rule.id, user).await? {
                latest = Some(latest.map_or(token.expire_time, |at| at.max(token.expire_time)));
            }
        }
        Ok(latest)
    }

    /// Live token of `(rule_id, user)` that frees up first.
    pub async fn first_expire_token(
        &self,
        rule_id: RuleId,
        user: &str,
    ) -> AccessResult<Option<TokenRecord>> {
        let now = self.clock.now();
        Ok(self.store.first_expiring_token(rule_id, user, now).await?)
    }

    pub async fn live_tokens(&self, rule_id: RuleId, user: &str) -> AccessResult<u64> {
        let now = self.clock.now();
        Ok(self.store.count_live_tokens(rule_id, user, now).await?)
    }

    /// Deletes every token whose window has elapsed.
    pub async fn purge_expired_tokens(&self) -> AccessResult<u64> {
        let now = self.clock.now();
        Ok(self.store.purge_expired_tokens(now).await?)
    }
}
