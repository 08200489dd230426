use std::sync::Arc;

use ac_access_store::{
    AccessStore, Admission, MemoryStore, NewRateLimitRule, PermissionRecord, SqlitePool,
    SqliteStore, StoreError, TokenLedger,
};
use chrono::{TimeDelta, TimeZone, Utc};

fn backends() -> Vec<(&'static str, Arc<dyn AccessStore>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new()) as Arc<dyn AccessStore>),
        (
            "sqlite",
            Arc::new(SqliteStore::new(SqlitePool::memory().unwrap())) as Arc<dyn AccessStore>,
        ),
    ]
}

fn rule(service: &str, subject: &str, secs: u64, limit: u32) -> NewRateLimitRule {
    NewRateLimitRule {
        service: service.into(),
        subject: subject.into(),
        time_span_secs: secs,
        limit,
    }
}

#[tokio::test]
async fn permission_upsert_reports_previous_value() {
    for (name, store) in backends() {
        let record = PermissionRecord {
            service: "weather".into(),
            subject: "qq:g1".into(),
            allow: true,
        };
        assert_eq!(store.upsert_permission(record.clone()).await.unwrap(), None, "{name}");
        let flipped = PermissionRecord {
            allow: false,
            ..record.clone()
        };
        assert_eq!(store.upsert_permission(flipped).await.unwrap(), Some(true), "{name}");

        let fetched = store.get_permission("weather", "qq:g1").await.unwrap();
        assert_eq!(fetched.map(|p| p.allow), Some(false), "{name}");

        assert_eq!(store.delete_permission("weather", "qq:g1").await.unwrap(), Some(false), "{name}");
        assert_eq!(store.delete_permission("weather", "qq:g1").await.unwrap(), None, "{name}");
    }
}

#[tokio::test]
async fn list_filters_and_orders() {
    for (name, store) in backends() {
        for (service, subject, allow) in [
            ("weather", "all", true),
            ("music", "qq:1", false),
            ("music", "all", true),
        ] {
            store
                .upsert_permission(PermissionRecord {
                    service: service.into(),
                    subject: subject.into(),
                    allow,
                })
                .await
                .unwrap();
        }
        let all = store.list_permissions(None, None).await.unwrap();
        let keys: Vec<_> = all.iter().map(|p| (p.service.as_str(), p.subject.as_str())).collect();
        assert_eq!(
            keys,
            vec![("music", "all"), ("music", "qq:1"), ("weather", "all")],
            "{name}"
        );
        assert_eq!(store.list_permissions(None, Some("all")).await.unwrap().len(), 2, "{name}");
        assert_eq!(
            store.list_permissions(Some("music"), Some("qq:1")).await.unwrap().len(),
            1,
            "{name}"
        );

        let first = store.insert_rule(rule("music", "all", 60, 3)).await.unwrap();
        let second = store.insert_rule(rule("weather", "all", 60, 1)).await.unwrap();
        assert!(second.id > first.id, "{name}");
        let rules = store.list_rules(Some("weather"), None).await.unwrap();
        assert_eq!(rules, vec![second.clone()], "{name}");
        assert_eq!(store.get_rule(first.id).await.unwrap(), Some(first), "{name}");
    }
}

#[tokio::test]
async fn denied_ledger_transaction_keeps_nothing() {
    for (name, store) in backends() {
        let rule_a = store.insert_rule(rule("weather", "all", 60, 5)).await.unwrap();
        let now = Utc::now();
        let expire = now + TimeDelta::seconds(60);
        let id = rule_a.id;

        let outcome = store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                ledger.insert_token(id, "qq:1", now, expire)?;
                assert_eq!(ledger.count_live(id, "qq:1", now)?, 1);
                Ok(Admission::Denied { rule_id: id })
            }))
            .await
            .unwrap();
        assert!(!outcome.is_admitted(), "{name}");
        assert_eq!(store.count_live_tokens(id, "qq:1", now).await.unwrap(), 0, "{name}");

        let failed = store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                ledger.insert_token(id, "qq:1", now, expire)?;
                ledger.insert_token(id + 100, "qq:1", now, expire)?;
                Ok(Admission::Admitted(Vec::new()))
            }))
            .await;
        assert!(matches!(failed, Err(StoreError::RuleNotFound(_))), "{name}");
        assert_eq!(store.count_live_tokens(id, "qq:1", now).await.unwrap(), 0, "{name}");

        let committed = store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                let token = ledger.insert_token(id, "qq:1", now, expire)?;
                Ok(Admission::Admitted(vec![token]))
            }))
            .await
            .unwrap();
        assert!(committed.is_admitted(), "{name}");
        assert_eq!(store.count_live_tokens(id, "qq:1", now).await.unwrap(), 1, "{name}");
    }
}

#[tokio::test]
async fn deleting_rule_cascades_to_tokens() {
    for (name, store) in backends() {
        let kept = store.insert_rule(rule("weather", "all", 60, 5)).await.unwrap();
        let doomed = store.insert_rule(rule("weather", "qq:1", 60, 5)).await.unwrap();
        let now = Utc::now();
        let expire = now + TimeDelta::seconds(60);
        let (kept_id, doomed_id) = (kept.id, doomed.id);
        store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                let a = ledger.insert_token(kept_id, "qq:1", now, expire)?;
                let b = ledger.insert_token(doomed_id, "qq:1", now, expire)?;
                Ok(Admission::Admitted(vec![a, b]))
            }))
            .await
            .unwrap();

        assert!(store.delete_rule(doomed_id).await.unwrap(), "{name}");
        assert!(!store.delete_rule(doomed_id).await.unwrap(), "{name}");
        assert_eq!(store.count_live_tokens(doomed_id, "qq:1", now).await.unwrap(), 0, "{name}");
        assert_eq!(store.count_live_tokens(kept_id, "qq:1", now).await.unwrap(), 1, "{name}");
        // only the remaining rule's token is left for the sweeper
        assert_eq!(
            store.purge_expired_tokens(expire).await.unwrap(),
            1,
            "{name}"
        );
    }
}

#[tokio::test]
async fn expiry_boundary_is_shared_by_count_and_purge() {
    for (name, store) in backends() {
        let r = store.insert_rule(rule("weather", "all", 10, 5)).await.unwrap();
        let acquired = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let expire = acquired + r.time_span();
        let id = r.id;
        store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                let token = ledger.insert_token(id, "qq:1", acquired, expire)?;
                Ok(Admission::Admitted(vec![token]))
            }))
            .await
            .unwrap();

        let just_before = expire - TimeDelta::milliseconds(1);
        assert_eq!(store.count_live_tokens(id, "qq:1", just_before).await.unwrap(), 1, "{name}");
        assert_eq!(store.purge_expired_tokens(just_before).await.unwrap(), 0, "{name}");

        // exactly one window after acquisition the token no longer counts
        assert_eq!(store.count_live_tokens(id, "qq:1", expire).await.unwrap(), 0, "{name}");
        assert_eq!(store.purge_expired_tokens(expire).await.unwrap(), 1, "{name}");
    }
}

#[tokio::test]
async fn sub_millisecond_expiry_never_ends_early() {
    for (name, store) in backends() {
        let r = store.insert_rule(rule("weather", "all", 10, 5)).await.unwrap();
        let acquired = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
            + TimeDelta::microseconds(250);
        let expire = acquired + r.time_span();
        let id = r.id;
        let admitted = store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                let token = ledger.insert_token(id, "qq:1", acquired, expire)?;
                Ok(Admission::Admitted(vec![token]))
            }))
            .await
            .unwrap();
        let Admission::Admitted(tokens) = admitted else {
            panic!("{name}: token was not admitted");
        };
        assert!(tokens[0].expire_time >= expire, "{name}");

        let just_before = expire - TimeDelta::microseconds(1);
        assert_eq!(store.count_live_tokens(id, "qq:1", just_before).await.unwrap(), 1, "{name}");
        let after = expire + TimeDelta::milliseconds(1);
        assert_eq!(store.count_live_tokens(id, "qq:1", after).await.unwrap(), 0, "{name}");
    }
}

#[tokio::test]
async fn first_expiring_token_is_scoped_to_rule_and_user() {
    for (name, store) in backends() {
        let r = store.insert_rule(rule("weather", "all", 60, 5)).await.unwrap();
        let other = store.insert_rule(rule("music", "all", 60, 5)).await.unwrap();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let (id, other_id) = (r.id, other.id);
        store
            .run_ledger(Box::new(move |ledger: &mut dyn TokenLedger| {
                let early_other =
                    ledger.insert_token(other_id, "qq:1", base, base + TimeDelta::seconds(5))?;
                let late = ledger.insert_token(id, "qq:1", base, base + TimeDelta::seconds(50))?;
                let early =
                    ledger.insert_token(id, "qq:1", base, base + TimeDelta::seconds(20))?;
                let foreign = ledger.insert_token(id, "qq:2", base, base + TimeDelta::seconds(1))?;
                Ok(Admission::Admitted(vec![early_other, late, early, foreign]))
            }))
            .await
            .unwrap();

        let first = store
            .first_expiring_token(id, "qq:1", base)
            .await
            .unwrap()
            .expect("token");
        assert_eq!(first.expire_time, base + TimeDelta::seconds(20), "{name}");
        assert!(store
            .first_expiring_token(id, "qq:1", base + TimeDelta::seconds(50))
            .await
            .unwrap()
            .is_none());
    }
}
