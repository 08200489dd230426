use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::{StoreError, StoreResult};

const SCHEMA_VERSION: i32 = 1;

pub fn apply_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    debug!(current, target = SCHEMA_VERSION, "checking migrations");

    if current < 1 {
        info!(from = current, to = SCHEMA_VERSION, "applying schema migrations");
        conn.execute_batch(SCHEMA_V1)
            .map_err(|err| StoreError::Schema(format!("failed to apply v1 schema: {err}")))?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
    }
    Ok(())
}

// Times are unix milliseconds (UTC), expiries rounded up; spans are whole seconds.
const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS permissions (
    service TEXT NOT NULL,
    subject TEXT NOT NULL,
    allow INTEGER NOT NULL,
    PRIMARY KEY (service, subject)
);

CREATE INDEX IF NOT EXISTS idx_permissions_subject ON permissions(subject);

CREATE TABLE IF NOT EXISTS rate_limit_rules (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    service TEXT NOT NULL,
    subject TEXT NOT NULL,
    time_span INTEGER NOT NULL,
    "limit" INTEGER NOT NULL CHECK ("limit" > 0)
);

CREATE INDEX IF NOT EXISTS idx_rules_service_subject ON rate_limit_rules(service, subject);

CREATE TABLE IF NOT EXISTS rate_limit_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    rule_id INTEGER NOT NULL REFERENCES rate_limit_rules(id) ON DELETE CASCADE,
    user TEXT NOT NULL,
    acquire_time INTEGER NOT NULL,
    expire_time INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tokens_rule_user ON rate_limit_tokens(rule_id, user, expire_time);
CREATE INDEX IF NOT EXISTS idx_tokens_expire ON rate_limit_tokens(expire_time);
"#;
