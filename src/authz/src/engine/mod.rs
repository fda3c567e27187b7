//! Action resolution engine
//!
//! [`AuthorizationEngine`] owns the long-lived collaborators (store, action
//! registry, dynamic group definitions) and hands out one
//! [`ResolutionSession`] per request.
//!
//! # Architecture
//!
//! ```text
//! CurrentUser → ResolutionSession ─┬→ RequestCache (groups, dynamic groups)
//!                                  ├→ StoreTransaction (grants, group graph)
//!                                  └→ ActionRegistry (manage expansion)
//! ```

pub mod cache;
pub mod session;

pub use cache::{CacheStats, RequestCache};
pub use session::{ReadableResource, ResolutionSession, ResourceActions};

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::cel::Engine as CelEvaluator;
use crate::config::AuthorizationConfig;
use crate::dynamic_groups::{DynamicGroupEvaluator, ExpressionEvaluator};
use crate::error::Result;
use crate::grants::GrantService;
use crate::groups::GroupService;
use crate::reconcile::{CollectionPolicyReconciler, ReconcileReport};
use crate::registry::ActionRegistry;
use crate::store::AuthorizationStore;
use crate::types::CurrentUser;

/// Authorization engine
pub struct AuthorizationEngine {
    store: Arc<dyn AuthorizationStore>,
    registry: Arc<ActionRegistry>,
    evaluator: Arc<dyn ExpressionEvaluator>,

    /// Snapshot taken by every new session
    dynamic_groups: RwLock<Arc<DynamicGroupEvaluator>>,
    config: RwLock<AuthorizationConfig>,

    grants: GrantService,
    groups: GroupService,
    reconciler: CollectionPolicyReconciler,
}

impl AuthorizationEngine {
    /// Create an engine and reconcile collection policies against the store
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence backend
    /// * `registry` - Action catalogs of the resource classes
    /// * `config` - Resource classes and dynamic groups
    /// * `evaluator` - Expression language of dynamic groups and policies
    pub async fn new(
        store: Arc<dyn AuthorizationStore>,
        registry: Arc<ActionRegistry>,
        config: AuthorizationConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Result<Self> {
        let dynamic_groups = DynamicGroupEvaluator::from_config(&config, evaluator.clone())?;
        let reconciler = CollectionPolicyReconciler::new(store.clone());
        let report = reconciler.reconcile(&config).await?;

        info!(
            "AuthorizationEngine initialized with {} resource classes, {} dynamic groups ({} collection policy changes)",
            config.resource_classes.len(),
            config.dynamic_groups.len(),
            report.policy_grants_created + report.policy_grants_removed
        );

        Ok(Self {
            grants: GrantService::new(store.clone()),
            groups: GroupService::new(store.clone()),
            store,
            registry,
            evaluator,
            dynamic_groups: RwLock::new(Arc::new(dynamic_groups)),
            config: RwLock::new(config),
            reconciler,
        })
    }

    /// Create an engine evaluating expressions with CEL
    pub async fn with_cel(
        store: Arc<dyn AuthorizationStore>,
        registry: Arc<ActionRegistry>,
        config: AuthorizationConfig,
    ) -> Result<Self> {
        Self::new(store, registry, config, Arc::new(CelEvaluator::new())).await
    }

    /// Replace the configuration and reconcile collection policies
    ///
    /// Sessions created before the call keep the previous dynamic groups.
    /// If validation or reconciliation fails the previous configuration stays
    /// active.
    pub async fn apply_config(&self, config: AuthorizationConfig) -> Result<ReconcileReport> {
        let dynamic_groups = DynamicGroupEvaluator::from_config(&config, self.evaluator.clone())?;
        let report = self.reconciler.reconcile(&config).await?;

        *self.dynamic_groups.write().await = Arc::new(dynamic_groups);
        *self.config.write().await = config;

        info!("Applied authorization configuration: {:?}", report);
        Ok(report)
    }

    /// Start resolving for `user`
    pub async fn session(&self, user: CurrentUser) -> ResolutionSession {
        let dynamic_groups = self.dynamic_groups.read().await.clone();
        ResolutionSession::new(user, self.store.clone(), self.registry.clone(), dynamic_groups)
    }

    /// Re-run reconciliation with the active configuration
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let config = self.config.read().await.clone();
        self.reconciler.reconcile(&config).await
    }

    pub async fn config(&self) -> AuthorizationConfig {
        self.config.read().await.clone()
    }

    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Grant management without authorization checks
    pub fn grants(&self) -> &GrantService {
        &self.grants
    }

    pub fn groups(&self) -> &GroupService {
        &self.groups
    }

    pub fn store(&self) -> &Arc<dyn AuthorizationStore> {
        &self.store
    }
}

impl std::fmt::Debug for AuthorizationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationEngine")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
