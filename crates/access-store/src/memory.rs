use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::api::{AccessStore, LedgerWork, TokenLedger};
use crate::errors::{StoreError, StoreResult};
use crate::model::{
    Admission, NewRateLimitRule, PermissionRecord, RateLimitRuleRecord, RuleId, TokenId,
    TokenRecord,
};

#[derive(Default)]
struct Tables {
    permissions: BTreeMap<(String, String), bool>,
    rules: BTreeMap<RuleId, RateLimitRuleRecord>,
    tokens: BTreeMap<TokenId, TokenRecord>,
    last_rule_id: RuleId,
    last_token_id: TokenId,
}

impl Tables {
    fn live_tokens<'a>(
        &'a self,
        rule_id: RuleId,
        user: &'a str,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a TokenRecord> + 'a {
        self.tokens
            .values()
            .filter(move |t| t.rule_id == rule_id && t.user == user && t.is_live(now))
    }
}

/// Process-local store. All tables sit behind one lock, which also
/// serializes ledger transactions.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token_count(&self) -> usize {
        self.tables.lock().tokens.len()
    }
}

fn matches_filter(value: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |f| f == value)
}

/// Ledger view that stages inserts until the transaction commits.
struct MemoryLedger<'a> {
    tables: &'a Tables,
    next_token_id: TokenId,
    staged: Vec<TokenRecord>,
}

impl TokenLedger for MemoryLedger<'_> {
    fn rule(&mut self, rule_id: RuleId) -> StoreResult<Option<RateLimitRuleRecord>> {
        Ok(self.tables.rules.get(&rule_id).cloned())
    }

    fn count_live(
        &mut self,
        rule_id: RuleId,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let committed = self.tables.live_tokens(rule_id, user, now).count();
        let staged = self
            .staged
            .iter()
            .filter(|t| t.rule_id == rule_id && t.user == user && t.is_live(now))
            .count();
        Ok((committed + staged) as u64)
    }

    fn insert_token(
        &mut self,
        rule_id: RuleId,
        user: &str,
        acquire_time: DateTime<Utc>,
        expire_time: DateTime<Utc>,
    ) -> StoreResult<TokenRecord> {
        if !self.tables.rules.contains_key(&rule_id) {
            return Err(StoreError::RuleNotFound(rule_id));
        }
        self.next_token_id += 1;
        let token = TokenRecord {
            id: self.next_token_id,
            rule_id,
            user: user.to_string(),
            acquire_time,
            expire_time,
        };
        self.staged.push(token.clone());
        Ok(token)
    }
}

#[async_trait]
impl AccessStore for MemoryStore {
    async fn get_permission(
        &self,
        service: &str,
        subject: &str,
    ) -> StoreResult<Option<PermissionRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .permissions
            .get(&(service.to_string(), subject.to_string()))
            .map(|allow| PermissionRecord {
                service: service.to_string(),
                subject: subject.to_string(),
                allow: *allow,
            }))
    }

    async fn list_permissions(
        &self,
        service: Option<&str>,
        subject: Option<&str>,
    ) -> StoreResult<Vec<PermissionRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .permissions
            .iter()
            .filter(|((srv, sbj), _)| matches_filter(srv, service) && matches_filter(sbj, subject))
            .map(|((srv, sbj), allow)| PermissionRecord {
                service: srv.clone(),
                subject: sbj.clone(),
                allow: *allow,
            })
            .collect())
    }

    async fn upsert_permission(&self, record: PermissionRecord) -> StoreResult<Option<bool>> {
        let mut tables = self.tables.lock();
        Ok(tables
            .permissions
            .insert((record.service, record.subject), record.allow))
    }

    async fn delete_permission(&self, service: &str, subject: &str) -> StoreResult<Option<bool>> {
        let mut tables = self.tables.lock();
        Ok(tables
            .permissions
            .remove(&(service.to_string(), subject.to_string())))
    }

    async fn insert_rule(&self, rule: NewRateLimitRule) -> StoreResult<RateLimitRuleRecord> {
        let mut tables = self.tables.lock();
        tables.last_rule_id += 1;
        let record = RateLimitRuleRecord {
            id: tables.last_rule_id,
            service: rule.service,
            subject: rule.subject,
            time_span_secs: rule.time_span_secs,
            limit: rule.limit,
        };
        tables.rules.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_rule(&self, rule_id: RuleId) -> StoreResult<Option<RateLimitRuleRecord>> {
        Ok(self.tables.lock().rules.get(&rule_id).cloned())
    }

    async fn list_rules(
        &self,
        service: Option<&str>,
        subject: Option<&str>,
    ) -> StoreResult<Vec<RateLimitRuleRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .rules
            .values()
            .filter(|r| matches_filter(&r.service, service) && matches_filter(&r.subject, subject))
            .cloned()
            .collect())
    }

    async fn delete_rule(&self, rule_id: RuleId) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        tables.tokens.retain(|_, t| t.rule_id != rule_id);
        Ok(tables.rules.remove(&rule_id).is_some())
    }

    async fn run_ledger(&self, work: LedgerWork) -> StoreResult<Admission> {
        let mut tables = self.tables.lock();
        let mut ledger = MemoryLedger {
            tables: &*tables,
            next_token_id: tables.last_token_id,
            staged: Vec::new(),
        };
        let outcome = work(&mut ledger)?;
        let MemoryLedger {
            next_token_id,
            staged,
            ..
        } = ledger;

        if outcome.is_admitted() {
            tables.last_token_id = next_token_id;
            for token in staged {
                tables.tokens.insert(token.id, token);
            }
        } else {
            trace!(discarded = staged.len(), "ledger transaction rolled back");
        }
        Ok(outcome)
    }

    async fn count_live_tokens(
        &self,
        rule_id: RuleId,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let tables = self.tables.lock();
        Ok(tables.live_tokens(rule_id, user, now).count() as u64)
    }

    async fn first_expiring_token(
        &self,
        rule_id: RuleId,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<TokenRecord>> {
        let tables = self.tables.lock();
        Ok(tables
            .live_tokens(rule_id, user, now)
            .min_by_key(|t| (t.expire_time, t.id))
            .cloned())
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut tables = self.tables.lock();
        let before = tables.tokens.len();
        tables.tokens.retain(|_, t| t.is_live(now));
        Ok((before - tables.tokens.len()) as u64)
    }
}
