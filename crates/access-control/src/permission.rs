use std::sync::Arc;

use ac_access_store::{AccessStore, PermissionRecord};
use ac_service_tree::{ServiceId, ServiceTree};
use tokio::sync::broadcast;
use tracing::debug;

use crate::errors::AccessResult;
use crate::events::{
    PermissionEvent, PermissionEventKind, PermissionListener, PermissionObservers,
};
use crate::model::Permission;

/// Allow/deny grants keyed by `(service, subject)`, resolved along the
/// service tree.
#[derive(Clone)]
pub struct PermissionStore {
    tree: Arc<ServiceTree>,
    store: Arc<dyn AccessStore>,
    observers: Arc<PermissionObservers>,
}

impl PermissionStore {
    pub fn new(tree: Arc<ServiceTree>, store: Arc<dyn AccessStore>) -> Self {
        Self {
            tree,
            store,
            observers: Arc::new(PermissionObservers::default()),
        }
    }

    fn bind(&self, service: ServiceId, record: PermissionRecord) -> Permission {
        Permission {
            service,
            service_name: record.service,
            subject: record.subject,
            allow: record.allow,
        }
    }

    /// Row for `subject` at `service`, or with `trace` the first row found
    /// walking from `service` up to the root.
    pub async fn get_permission(
        &self,
        service: ServiceId,
        subject: &str,
        trace: bool,
    ) -> AccessResult<Option<Permission>> {
        if !trace {
            let node = self.tree.node(service);
            let record = self
                .store
                .get_permission(node.qualified_name(), subject)
                .await?;
            return Ok(record.map(|r| self.bind(service, r)));
        }

        for node in self.tree.trace(service) {
            if let Some(record) = self
                .store
                .get_permission(node.qualified_name(), subject)
                .await?
            {
                return Ok(Some(self.bind(node.id(), record)));
            }
        }
        Ok(None)
    }

    /// Every row on `service` (and with `trace`, on each ancestor), nearest
    /// node first.
    pub async fn get_all_permissions(
        &self,
        service: ServiceId,
        trace: bool,
    ) -> AccessResult<Vec<Permission>> {
        let nodes: Vec<_> = if trace {
            self.tree.trace(service).collect()
        } else {
            vec![self.tree.node(service)]
        };

        let mut permissions = Vec::new();
        for node in nodes {
            let records = self
                .store
                .list_permissions(Some(node.qualified_name()), None)
                .await?;
            permissions.extend(records.into_iter().map(|r| self.bind(node.id(), r)));
        }
        Ok(permissions)
    }

    /// Resolves the decision for `subjects` (most specific first).
    ///
    /// The first subject with a row anywhere on the ancestor chain decides;
    /// no row for any subject means deny.
    pub async fn check_permission<S: AsRef<str>>(
        &self,
        service: ServiceId,
        subjects: &[S],
    ) -> AccessResult<bool> {
        for subject in subjects {
            let subject = subject.as_ref();
            if let Some(permission) = self.get_permission(service, subject, true).await? {
                debug!(
                    service = %self.tree.node(service).qualified_name(),
                    subject,
                    decided_by = %permission.service_name,
                    allow = permission.allow,
                    "permission resolved"
                );
                return Ok(permission.allow);
            }
        }
        Ok(false)
    }

    pub async fn set_permission(
        &self,
        service: ServiceId,
        subject: &str,
        allow: bool,
    ) -> AccessResult<()> {
        let service_name = self.tree.node(service).qualified_name().to_string();
        let previous = self
            .store
            .upsert_permission(PermissionRecord {
                service: service_name.clone(),
                subject: subject.to_string(),
                allow,
            })
            .await?;

        let event = PermissionEvent {
            kind: PermissionEventKind::Set,
            service: service_name,
            subject: subject.to_string(),
            allow: Some(allow),
            previous,
        };
        if previous != Some(allow) {
            self.observers.publish(PermissionEvent {
                kind: PermissionEventKind::Changed,
                ..event.clone()
            });
        }
        self.observers.publish(event);
        Ok(())
    }

    /// Deletes the row at exactly `service`; returns whether one existed.
    pub async fn remove_permission(&self, service: ServiceId, subject: &str) -> AccessResult<bool> {
        let service_name = self.tree.node(service).qualified_name().to_string();
        let Some(previous) = self.store.delete_permission(&service_name, subject).await? else {
            return Ok(false);
        };

        let event = PermissionEvent {
            kind: PermissionEventKind::Removed,
            service: service_name,
            subject: subject.to_string(),
            allow: None,
            previous: Some(previous),
        };
        self.observers.publish(PermissionEvent {
            kind: PermissionEventKind::Changed,
            ..event.clone()
        });
        self.observers.publish(event);
        Ok(true)
    }

    pub fn on_set_permission(&self, listener: Arc<dyn PermissionListener>) {
        self.observers.register(PermissionEventKind::Set, listener);
    }

    pub fn on_change_permission(&self, listener: Arc<dyn PermissionListener>) {
        self.observers.register(PermissionEventKind::Changed, listener);
    }

    pub fn on_remove_permission(&self, listener: Arc<dyn PermissionListener>) {
        self.observers.register(PermissionEventKind::Removed, listener);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PermissionEvent> {
        self.observers.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ac_access_store::MemoryStore;
    use ac_service_tree::TreeSpec;
    use parking_lot::Mutex;

    use crate::events::ListenerError;

    fn fixture() -> (PermissionStore, ServiceId, ServiceId, ServiceId) {
        let tree = TreeSpec::with_children(
            "nonebot",
            vec![TreeSpec::with_children(
                "weather",
                vec![TreeSpec::leaf("forecast")],
            )],
        )
        .build()
        .unwrap();
        let root = tree.root();
        let weather = tree.by_qualified_name("weather").unwrap();
        let forecast = tree.by_qualified_name("weather.forecast").unwrap();
        let store = PermissionStore::new(Arc::new(tree), Arc::new(MemoryStore::new()));
        (store, root, weather, forecast)
    }

    #[tokio::test]
    async fn default_is_deny() {
        let (store, _, _, forecast) = fixture();
        assert!(!store.check_permission(forecast, &["qq:42", "all"]).await.unwrap());
        assert!(!store.check_permission::<&str>(forecast, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn subject_priority_outranks_distance() {
        let (store, root, weather, forecast) = fixture();
        store.set_permission(root, "qq:g1", false).await.unwrap();
        store.set_permission(weather, "qq:42", true).await.unwrap();

        assert!(store
            .check_permission(forecast, &["qq:42", "qq:g1"])
            .await
            .unwrap());
        assert!(!store
            .check_permission(forecast, &["qq:7", "qq:g1"])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn nearest_row_for_a_subject_wins() {
        let (store, root, weather, forecast) = fixture();
        store.set_permission(root, "all", true).await.unwrap();
        store.set_permission(weather, "all", false).await.unwrap();

        assert!(!store.check_permission(forecast, &["all"]).await.unwrap());
        assert!(store.check_permission(root, &["all"]).await.unwrap());

        let traced = store
            .get_permission(forecast, "all", true)
            .await
            .unwrap()
            .expect("inherited row");
        assert_eq!(traced.service, weather);
        assert!(traced.is_inherited(forecast));
        assert!(store
            .get_permission(forecast, "all", false)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn get_all_walks_ancestors_when_tracing() {
        let (store, root, weather, forecast) = fixture();
        store.set_permission(root, "all", true).await.unwrap();
        store.set_permission(forecast, "qq:1", false).await.unwrap();
        store.set_permission(weather, "qq:2", true).await.unwrap();

        let traced = store.get_all_permissions(forecast, true).await.unwrap();
        let names: Vec<_> = traced.iter().map(|p| p.service_name.as_str()).collect();
        assert_eq!(names, vec!["weather.forecast", "weather", "nonebot"]);

        let direct = store.get_all_permissions(forecast, false).await.unwrap();
        assert_eq!(direct.len(), 1);
        assert_eq!(direct[0].subject, "qq:1");
    }

    #[tokio::test]
    async fn notifications_follow_effective_changes() {
        let (store, _, weather, _) = fixture();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for register in [
            PermissionStore::on_set_permission as fn(&PermissionStore, Arc<dyn PermissionListener>),
            PermissionStore::on_change_permission,
            PermissionStore::on_remove_permission,
        ] {
            let seen = Arc::clone(&seen);
            register(
                &store,
                Arc::new(move |event: &PermissionEvent| -> Result<(), ListenerError> {
                    seen.lock().push(event.kind);
                    Ok(())
                }),
            );
        }

        store.set_permission(weather, "all", true).await.unwrap();
        store.set_permission(weather, "all", true).await.unwrap();
        store.set_permission(weather, "all", false).await.unwrap();
        assert!(store.remove_permission(weather, "all").await.unwrap());
        assert!(!store.remove_permission(weather, "all").await.unwrap());

        use PermissionEventKind::*;
        assert_eq!(
            *seen.lock(),
            vec![Changed, Set, Set, Changed, Set, Changed, Removed]
        );
    }
}
