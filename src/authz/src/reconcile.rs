//! Collection-policy reconciliation
//!
//! Classes configured with a `manage_resource_collection_policy` own a
//! collection resource carrying exactly one `manage` grant held by the dynamic
//! group `manage_resource_collection:<class>`. The reconciler converges the
//! store to that desired state: it creates what is missing, removes derived
//! grants of classes no longer configured, and prunes their collection
//! resources once no grants remain. Grants it does not own are never touched.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AuthorizationConfig;
use crate::error::Result;
use crate::grants::holder_filter;
use crate::store::{finish, AuthorizationStore, StoreTransaction};
use crate::types::{
    manage_collection_policy_group, GrantHolder, GrantQuery, IdentifierFilter, ResourceFilter,
    MANAGE_ACTION,
};

/// Changes applied by one reconciliation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub collection_resources_created: usize,
    pub policy_grants_created: usize,
    pub policy_grants_removed: usize,
    pub collection_resources_removed: usize,
}

impl ReconcileReport {
    /// Whether the store already matched the configuration
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }

    fn merge(&mut self, other: ReconcileReport) {
        self.collection_resources_created += other.collection_resources_created;
        self.policy_grants_created += other.policy_grants_created;
        self.policy_grants_removed += other.policy_grants_removed;
        self.collection_resources_removed += other.collection_resources_removed;
    }
}

/// Converges persisted collection-policy grants to the configuration
#[derive(Clone)]
pub struct CollectionPolicyReconciler {
    store: Arc<dyn AuthorizationStore>,
}

impl CollectionPolicyReconciler {
    pub fn new(store: Arc<dyn AuthorizationStore>) -> Self {
        Self { store }
    }

    /// Reconcile the store against `config`
    ///
    /// Each class is processed in its own transaction. The first failure is
    /// returned as is; its class is rolled back while classes processed
    /// before it stay committed. Running twice with the same configuration
    /// changes nothing the second time.
    pub async fn reconcile(&self, config: &AuthorizationConfig) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let desired: Vec<&str> = config.collection_policies().map(|(class, _)| class).collect();

        for class in &desired {
            let mut tx = self.store.begin().await?;
            let result = ensure_policy_grant(tx.as_mut(), class).await;
            report.merge(finish(tx, result).await?);
        }

        let desired: HashSet<&str> = desired.into_iter().collect();
        let mut tx = self.store.begin().await?;
        let result = tx
            .find_resources(&ResourceFilter {
                resource_identifier: IdentifierFilter::Collection,
                ..Default::default()
            })
            .await;
        let collections = finish(tx, result).await?;

        for resource in collections
            .iter()
            .filter(|r| !desired.contains(r.resource_class.as_str()))
        {
            let mut tx = self.store.begin().await?;
            let result = retire_policy_grant(tx.as_mut(), &resource.resource_class).await;
            report.merge(finish(tx, result).await?);
        }

        if report.is_noop() {
            debug!("Collection policies already reconciled");
        } else {
            info!(
                "Reconciled collection policies: {} resources created, {} grants created, {} grants removed, {} resources removed",
                report.collection_resources_created,
                report.policy_grants_created,
                report.policy_grants_removed,
                report.collection_resources_removed
            );
        }
        Ok(report)
    }
}

impl std::fmt::Debug for CollectionPolicyReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionPolicyReconciler").finish_non_exhaustive()
    }
}

fn policy_query(resource_class: &str) -> GrantQuery {
    let holder = GrantHolder::DynamicGroup(manage_collection_policy_group(resource_class));
    GrantQuery::new()
        .for_class(resource_class)
        .with_identifier(IdentifierFilter::Collection)
        .with_actions(vec![MANAGE_ACTION.to_string()])
        .held_by(holder_filter(&holder))
}

async fn ensure_policy_grant(
    tx: &mut dyn StoreTransaction,
    resource_class: &str,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();

    let resource = match tx.find_resource(resource_class, None).await? {
        Some(resource) => resource,
        None => {
            report.collection_resources_created += 1;
            tx.insert_resource(resource_class, None).await?
        }
    };

    let existing = tx.find_grants(&policy_query(resource_class)).await?;
    match existing.split_first() {
        Some((_, duplicates)) => {
            for grant in duplicates {
                tx.delete_grant(grant.id).await?;
                report.policy_grants_removed += 1;
            }
        }
        None => {
            let holder = GrantHolder::DynamicGroup(manage_collection_policy_group(resource_class));
            tx.insert_grant(resource.id, MANAGE_ACTION, &holder).await?;
            report.policy_grants_created += 1;
            debug!("Created collection policy grant for '{}'", resource_class);
        }
    }

    Ok(report)
}

async fn retire_policy_grant(
    tx: &mut dyn StoreTransaction,
    resource_class: &str,
) -> Result<ReconcileReport> {
    let mut report = ReconcileReport::default();
    let Some(resource) = tx.find_resource(resource_class, None).await? else {
        return Ok(report);
    };

    for grant in tx.find_grants(&policy_query(resource_class)).await? {
        tx.delete_grant(grant.id).await?;
        report.policy_grants_removed += 1;
    }

    if tx.count_grants(resource.id).await? == 0 {
        tx.delete_resource(resource.id).await?;
        report.collection_resources_removed += 1;
        debug!("Pruned collection resource of '{}'", resource_class);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn config() -> AuthorizationConfig {
        AuthorizationConfig::default()
            .with_resource_class("doc", Some("user.MAY_CREATE == true"))
            .with_resource_class("img", None)
    }

    #[tokio::test]
    async fn test_report_counts() {
        let store = InMemoryStore::new();
        let reconciler = CollectionPolicyReconciler::new(Arc::new(store.clone()));

        let first = reconciler.reconcile(&config()).await.unwrap();
        assert_eq!(
            first,
            ReconcileReport {
                collection_resources_created: 1,
                policy_grants_created: 1,
                ..Default::default()
            }
        );
        assert!(reconciler.reconcile(&config()).await.unwrap().is_noop());

        let removed = reconciler
            .reconcile(&AuthorizationConfig::default())
            .await
            .unwrap();
        assert_eq!(removed.policy_grants_removed, 1);
        assert_eq!(removed.collection_resources_removed, 1);
    }

    #[tokio::test]
    async fn test_duplicate_policy_grants_collapse() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let resource = tx.insert_resource("doc", None).await.unwrap();
        let holder = GrantHolder::DynamicGroup(manage_collection_policy_group("doc"));
        tx.insert_grant(resource.id, MANAGE_ACTION, &holder).await.unwrap();
        tx.insert_grant(resource.id, MANAGE_ACTION, &holder).await.unwrap();
        tx.commit().await.unwrap();

        let reconciler = CollectionPolicyReconciler::new(Arc::new(store.clone()));
        let report = reconciler.reconcile(&config()).await.unwrap();
        assert_eq!(report.policy_grants_removed, 1);

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.count_grants(resource.id).await.unwrap(), 1);
        tx.rollback().await.unwrap();
    }

    #[tokio::test]
    async fn test_unconfigured_item_resources_untouched() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let item = tx.insert_resource("img", Some("1")).await.unwrap();
        tx.commit().await.unwrap();

        let reconciler = CollectionPolicyReconciler::new(Arc::new(store.clone()));
        reconciler.reconcile(&AuthorizationConfig::default()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_resource(item.id).await.unwrap().is_some());
        tx.rollback().await.unwrap();
    }
}
