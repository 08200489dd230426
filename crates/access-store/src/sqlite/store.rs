use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::trace;

use crate::api::{AccessStore, LedgerWork, TokenLedger};
use crate::errors::{StoreError, StoreResult};
use crate::model::{
    Admission, NewRateLimitRule, PermissionRecord, RateLimitRuleRecord, RuleId, TokenRecord,
};
use crate::sqlite::connection::SqlitePool;

/// [`AccessStore`] backed by a SQLite database.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Rounds up so a stored expiry never ends a window before the requested instant.
fn to_millis_ceil(time: DateTime<Utc>) -> i64 {
    let millis = time.timestamp_millis();
    if time.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis.saturating_add(1)
    }
}

fn from_millis(millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, millis))
}

fn to_sql_int(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Internal(format!("value {value} exceeds i64")))
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<PermissionRecord> {
    Ok(PermissionRecord {
        service: row.get(0)?,
        subject: row.get(1)?,
        allow: row.get(2)?,
    })
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<RateLimitRuleRecord> {
    let time_span: i64 = row.get(3)?;
    let limit: i64 = row.get(4)?;
    Ok(RateLimitRuleRecord {
        id: row.get(0)?,
        service: row.get(1)?,
        subject: row.get(2)?,
        time_span_secs: u64::try_from(time_span)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(3, time_span))?,
        limit: u32::try_from(limit)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(4, limit))?,
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<TokenRecord> {
    Ok(TokenRecord {
        id: row.get(0)?,
        rule_id: row.get(1)?,
        user: row.get(2)?,
        acquire_time: from_millis(row.get(3)?)?,
        expire_time: from_millis(row.get(4)?)?,
    })
}

const RULE_COLUMNS: &str = r#"id, service, subject, time_span, "limit""#;
const TOKEN_COLUMNS: &str = "id, rule_id, user, acquire_time, expire_time";

fn select_rule(conn: &Connection, rule_id: RuleId) -> StoreResult<Option<RateLimitRuleRecord>> {
    let sql = format!("SELECT {RULE_COLUMNS} FROM rate_limit_rules WHERE id = ?1");
    Ok(conn.query_row(&sql, [rule_id], rule_from_row).optional()?)
}

fn count_live(conn: &Connection, rule_id: RuleId, user: &str, now: DateTime<Utc>) -> StoreResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM rate_limit_tokens WHERE rule_id = ?1 AND user = ?2 AND expire_time > ?3",
        params![rule_id, user, to_millis(now)],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}

/// Ledger bound to an open `BEGIN IMMEDIATE` transaction.
struct SqliteLedger<'a> {
    conn: &'a Connection,
}

impl TokenLedger for SqliteLedger<'_> {
    fn rule(&mut self, rule_id: RuleId) -> StoreResult<Option<RateLimitRuleRecord>> {
        select_rule(self.conn, rule_id)
    }

    fn count_live(&mut self, rule_id: RuleId, user: &str, now: DateTime<Utc>) -> StoreResult<u64> {
        count_live(self.conn, rule_id, user, now)
    }

    fn insert_token(
        &mut self,
        rule_id: RuleId,
        user: &str,
        acquire_time: DateTime<Utc>,
        expire_time: DateTime<Utc>,
    ) -> StoreResult<TokenRecord> {
        if select_rule(self.conn, rule_id)?.is_none() {
            return Err(StoreError::RuleNotFound(rule_id));
        }
        self.conn.execute(
            "INSERT INTO rate_limit_tokens (rule_id, user, acquire_time, expire_time) VALUES (?1, ?2, ?3, ?4)",
            params![rule_id, user, to_millis(acquire_time), to_millis_ceil(expire_time)],
        )?;
        let id = self.conn.last_insert_rowid();
        Ok(TokenRecord {
            id,
            rule_id,
            user: user.to_string(),
            acquire_time: from_millis(to_millis(acquire_time))?,
            expire_time: from_millis(to_millis_ceil(expire_time))?,
        })
    }
}

#[async_trait]
impl AccessStore for SqliteStore {
    async fn get_permission(
        &self,
        service: &str,
        subject: &str,
    ) -> StoreResult<Option<PermissionRecord>> {
        let pool = self.pool.clone();
        let (service, subject) = (service.to_string(), subject.to_string());
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                Ok(conn
                    .query_row(
                        "SELECT service, subject, allow FROM permissions WHERE service = ?1 AND subject = ?2",
                        params![service, subject],
                        permission_from_row,
                    )
                    .optional()?)
            })
        })
        .await?
    }

    async fn list_permissions(
        &self,
        service: Option<&str>,
        subject: Option<&str>,
    ) -> StoreResult<Vec<PermissionRecord>> {
        let pool = self.pool.clone();
        let (service, subject) = (service.map(str::to_string), subject.map(str::to_string));
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT service, subject, allow FROM permissions
                     WHERE (?1 IS NULL OR service = ?1) AND (?2 IS NULL OR subject = ?2)
                     ORDER BY service, subject",
                )?;
                let rows = stmt.query_map(params![service, subject], permission_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
        })
        .await?
    }

    async fn upsert_permission(&self, record: PermissionRecord) -> StoreResult<Option<bool>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            pool.with_connection_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let previous: Option<bool> = tx
                    .query_row(
                        "SELECT allow FROM permissions WHERE service = ?1 AND subject = ?2",
                        params![record.service, record.subject],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.execute(
                    "INSERT INTO permissions (service, subject, allow) VALUES (?1, ?2, ?3)
                     ON CONFLICT(service, subject) DO UPDATE SET allow = excluded.allow",
                    params![record.service, record.subject, record.allow],
                )?;
                tx.commit()?;
                Ok(previous)
            })
        })
        .await?
    }

    async fn delete_permission(&self, service: &str, subject: &str) -> StoreResult<Option<bool>> {
        let pool = self.pool.clone();
        let (service, subject) = (service.to_string(), subject.to_string());
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                Ok(conn
                    .query_row(
                        "DELETE FROM permissions WHERE service = ?1 AND subject = ?2 RETURNING allow",
                        params![service, subject],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
        })
        .await?
    }

    async fn insert_rule(&self, rule: NewRateLimitRule) -> StoreResult<RateLimitRuleRecord> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                conn.execute(
                    r#"INSERT INTO rate_limit_rules (service, subject, time_span, "limit") VALUES (?1, ?2, ?3, ?4)"#,
                    params![
                        rule.service,
                        rule.subject,
                        to_sql_int(rule.time_span_secs)?,
                        i64::from(rule.limit)
                    ],
                )?;
                Ok(RateLimitRuleRecord {
                    id: conn.last_insert_rowid(),
                    service: rule.service,
                    subject: rule.subject,
                    time_span_secs: rule.time_span_secs,
                    limit: rule.limit,
                })
            })
        })
        .await?
    }

    async fn get_rule(&self, rule_id: RuleId) -> StoreResult<Option<RateLimitRuleRecord>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || pool.with_connection(|conn| select_rule(conn, rule_id)))
            .await?
    }

    async fn list_rules(
        &self,
        service: Option<&str>,
        subject: Option<&str>,
    ) -> StoreResult<Vec<RateLimitRuleRecord>> {
        let pool = self.pool.clone();
        let (service, subject) = (service.map(str::to_string), subject.map(str::to_string));
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                let sql = format!(
                    "SELECT {RULE_COLUMNS} FROM rate_limit_rules
                     WHERE (?1 IS NULL OR service = ?1) AND (?2 IS NULL OR subject = ?2)
                     ORDER BY id"
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![service, subject], rule_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
        })
        .await?
    }

    async fn delete_rule(&self, rule_id: RuleId) -> StoreResult<bool> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            pool.with_connection_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let tokens = tx.execute("DELETE FROM rate_limit_tokens WHERE rule_id = ?1", [rule_id])?;
                let rules = tx.execute("DELETE FROM rate_limit_rules WHERE id = ?1", [rule_id])?;
                tx.commit()?;
                trace!(rule_id, tokens, "deleted rate limit rule");
                Ok(rules == 1)
            })
        })
        .await?
    }

    async fn run_ledger(&self, work: LedgerWork) -> StoreResult<Admission> {
        let pool = self.pool.clone();
        // spawn_blocking runs to completion even if this future is dropped
        tokio::task::spawn_blocking(move || {
            pool.with_connection_mut(|conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let outcome = {
                    let mut ledger = SqliteLedger { conn: &*tx };
                    work(&mut ledger)?
                };
                if outcome.is_admitted() {
                    tx.commit()?;
                } else {
                    tx.rollback()?;
                }
                Ok(outcome)
            })
        })
        .await?
    }

    async fn count_live_tokens(
        &self,
        rule_id: RuleId,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let pool = self.pool.clone();
        let user = user.to_string();
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| count_live(conn, rule_id, &user, now))
        })
        .await?
    }

    async fn first_expiring_token(
        &self,
        rule_id: RuleId,
        user: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Option<TokenRecord>> {
        let pool = self.pool.clone();
        let user = user.to_string();
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                let sql = format!(
                    "SELECT {TOKEN_COLUMNS} FROM rate_limit_tokens
                     WHERE rule_id = ?1 AND user = ?2 AND expire_time > ?3
                     ORDER BY expire_time, id LIMIT 1"
                );
                Ok(conn
                    .query_row(&sql, params![rule_id, user, to_millis(now)], token_from_row)
                    .optional()?)
            })
        })
        .await?
    }

    async fn purge_expired_tokens(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            pool.with_connection(|conn| {
                let removed = conn.execute(
                    "DELETE FROM rate_limit_tokens WHERE expire_time <= ?1",
                    [to_millis(now)],
                )?;
                Ok(removed as u64)
            })
        })
        .await?
    }
}
