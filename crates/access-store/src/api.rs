use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::StoreResult;
use crate::model::{
    Admission, NewRateLimitRule, PermissionRecord, RateLimitRuleRecord, RuleId, TokenRecord,
};

/// Token operations available inside one ledger transaction.
///
/// Writes made through a ledger are only kept if the surrounding
/// [`AccessStore::run_ledger`] call ends in [`Admission::Admitted`].
pub trait TokenLedger {
    fn rule(&mut self, rule_id: RuleId) -> StoreResult<Option<RateLimitRuleRecord>>;

    /// Tokens of `(rule_id, user)` with `expire_time > now`, including ones
    /// inserted earlier in the same transaction.
    fn count_live(&mut self, rule_id: RuleId, user: &str, now: DateTime<Utc>)
        -> StoreResult<u64>;

    fn insert_token(
        &mut self,
        rule_id: RuleId,
        user: &str,
        acquire_time: DateTime<Utc>,
        expire_time: DateTime<Utc>,
    ) -> StoreResult<TokenRecord>;
}

/// Work executed against a [`TokenLedger`] inside a single transaction.
///
/// Returning `Admission::Denied` or an error discards every write the work made.
pub type LedgerWork = Box<dyn FnOnce(&mut dyn TokenLedger) -> StoreResult<Admission> + Send>;

/// Persistence contract for grants, rules and the token ledger.
///
/// Every method is a potential I/O suspension point. Row-level writes are
/// atomic; [`AccessStore::run_ledger`] is serialized against every other
/// ledger transaction and runs to completion even if the caller's future is
/// dropped.
#[async_trait]
pub trait AccessStore: Send + Sync {
    async fn get_permission(
        &self,
        service: &str,
        subject: &str,
    ) -> StoreResult<Option<PermissionRecord>>;

    /// Rows matching the optional filters, ordered by `(service, subject)`.
    async fn list_permissions(
        &self,
        service: Option<&str>,
        subject: Option<&str>,
    ) -> StoreResult<Vec<PermissionRecord>>;

    /// Inserts or overwrites a grant and returns the previous `allow` value.
    async fn upsert_permission(&self, record: PermissionRecord) -> StoreResult<Option<bool>>;

    /// Deletes a grant and returns the removed `allow` value, if any.
    async fn delete_permission(&self, service: &str, subject: &str) -> StoreResult<Option<bool>>;

    async fn insert_rule(&self, rule: NewRateLimitRule) -> StoreResult<RateLimitRuleRecord>;

    async fn get_rule(&self, rule_id: RuleId) -> StoreResult<Option<RateLimitRuleRecord>>;

    /// Rules matching the optional filters, ordered by id.
    async fn list_rules(
        &self,
        service: Option<&str>,
        subject: Option<&str>,
    ) -> StoreResult<Vec<RateLimitRuleRecord>>;

    /// Deletes a rule together with all of its tokens.
    async fn delete_rule(&self, rule_id: RuleId) -> StoreResult<bool>;

    async fn run_ledger(&self, work: LedgerWork) -> StoreResult<Admission>;

    async fn count_live_tokens(
        &self,
        rule_id: RuleId,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64>;

    /// The live token of `(rule_id, user)` that expires first.
    async fn first_expiring_token(
        &self,
        rule_id: RuleId,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<TokenRecord>>;

    /// Deletes every token with `expire_time <= now` and returns how many went.
    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64>;
}
