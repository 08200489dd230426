use std::sync::Arc;

use ac_access_store::{open_store, AccessStore};
use ac_service_tree::{ServiceId, ServiceTree};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::{AccessControlConfig, SweeperConfig};
use crate::errors::{AccessError, AccessResult};
use crate::permission::PermissionStore;
use crate::rate_limit::RateLimitStore;
use crate::subject::{ChatSubjectExtractor, InvocationContext, SubjectExtractor};
use crate::sweeper::TokenSweeper;
use crate::token::{Clock, SystemClock, TokenEngine};

/// Entry point tying the service tree, permission store, rate-limit rules and
/// token ledger together.
#[derive(Clone)]
pub struct AccessControl {
    tree: Arc<ServiceTree>,
    store: Arc<dyn AccessStore>,
    permissions: PermissionStore,
    rate_limits: RateLimitStore,
    tokens: TokenEngine,
    extractor: Arc<dyn SubjectExtractor>,
}

impl AccessControl {
    pub fn new(tree: ServiceTree, store: Arc<dyn AccessStore>) -> Self {
        let tree = Arc::new(tree);
        let permissions = PermissionStore::new(Arc::clone(&tree), Arc::clone(&store));
        let rate_limits = RateLimitStore::new(Arc::clone(&tree), Arc::clone(&store));
        let tokens = TokenEngine::new(
            Arc::clone(&store),
            rate_limits.clone(),
            Arc::new(SystemClock),
        );
        Self {
            tree,
            store,
            permissions,
            rate_limits,
            tokens,
            extractor: Arc::new(ChatSubjectExtractor),
        }
    }

    /// Builds the tree and opens the configured storage backend.
    pub fn from_config(config: &AccessControlConfig) -> AccessResult<Self> {
        let tree = config.services.build()?;
        let store = open_store(&config.storage)?;
        info!(
            root = %config.services.name,
            services = tree.len(),
            backend = ?config.storage.backend,
            "access control ready"
        );
        Ok(Self::new(tree, store))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.tokens = TokenEngine::new(Arc::clone(&self.store), self.rate_limits.clone(), clock);
        self
    }

    pub fn with_subject_extractor(mut self, extractor: Arc<dyn SubjectExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn tree(&self) -> &ServiceTree {
        &self.tree
    }

    pub fn store(&self) -> &Arc<dyn AccessStore> {
        &self.store
    }

    pub fn permissions(&self) -> &PermissionStore {
        &self.permissions
    }

    pub fn rate_limits(&self) -> &RateLimitStore {
        &self.rate_limits
    }

    pub fn tokens(&self) -> &TokenEngine {
        &self.tokens
    }

    /// Resolves a qualified service name such as `weather.forecast`.
    pub fn service(&self, qualified_name: &str) -> AccessResult<ServiceId> {
        self.tree
            .by_qualified_name(qualified_name)
            .ok_or_else(|| AccessError::ServiceNotFound(qualified_name.to_string()))
    }

    pub fn subjects(&self, ctx: &InvocationContext) -> Vec<String> {
        self.extractor.extract_subjects(ctx)
    }

    /// Succeeds when `ctx` may invoke `service`.
    ///
    /// With `acquire_token` the invocation is also charged against every
    /// applicable rate-limit rule.
    pub async fn check_or_throw(
        &self,
        service: ServiceId,
        ctx: &InvocationContext,
        acquire_token: bool,
    ) -> AccessResult<()> {
        let subjects = self.subjects(ctx);
        if !self.permissions.check_permission(service, &subjects).await? {
            debug!(
                service = %self.tree.node(service).qualified_name(),
                user = %ctx.user(),
                "permission denied"
            );
            return Err(AccessError::PermissionDenied);
        }
        if acquire_token
            && !self
                .tokens
                .acquire_token_for_rate_limit(service, &subjects, &ctx.user())
                .await?
        {
            debug!(
                service = %self.tree.node(service).qualified_name(),
                user = %ctx.user(),
                "rate limited"
            );
            return Err(AccessError::RateLimited);
        }
        Ok(())
    }

    /// Like [`AccessControl::check_or_throw`], but denials become `false`.
    pub async fn check(
        &self,
        service: ServiceId,
        ctx: &InvocationContext,
        acquire_token: bool,
    ) -> AccessResult<bool> {
        match self.check_or_throw(service, ctx, acquire_token).await {
            Ok(()) => Ok(true),
            Err(err) if err.is_access_denial() => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// When a rate-limited `ctx` may next succeed on `service`.
    pub async fn next_available(
        &self,
        service: ServiceId,
        ctx: &InvocationContext,
    ) -> AccessResult<Option<DateTime<Utc>>> {
        let subjects = self.subjects(ctx);
        self.tokens
            .next_available(service, &subjects, &ctx.user())
            .await
    }

    /// Starts the background sweeper, unless disabled.
    pub fn spawn_sweeper(&self, config: &SweeperConfig) -> Option<TokenSweeper> {
        if !config.enabled {
            debug!("token sweeper disabled");
            return None;
        }
        Some(TokenSweeper::start(
            &self.store,
            Arc::clone(self.tokens.clock()),
            config.interval,
        ))
    }
}
