//! Collection-policy reconciliation tests

mod common;

use bastion_authz::types::manage_collection_policy_group;
use bastion_authz::{
    AuthorizationConfig, AuthorizationStore, AuthzError, CollectionPolicyReconciler, GrantHolder,
    GrantQuery, IdentifierFilter, InMemoryStore, ResourceActionGrant,
};
use std::sync::Arc;

fn reconciler() -> (InMemoryStore, CollectionPolicyReconciler) {
    common::init_tracing();
    let store = InMemoryStore::new();
    (store.clone(), CollectionPolicyReconciler::new(Arc::new(store)))
}

fn policies(classes: &[&str]) -> AuthorizationConfig {
    classes
        .iter()
        .fold(AuthorizationConfig::default(), |config, class| {
            config.with_resource_class(*class, Some("user.MAY_CREATE == true"))
        })
}

async fn all_grants(store: &InMemoryStore) -> Vec<ResourceActionGrant> {
    let mut tx = store.begin().await.unwrap();
    let grants = tx.find_grants(&GrantQuery::new()).await.unwrap();
    tx.rollback().await.unwrap();
    grants
}

// ============================================================================
// DESIRED STATE
// ============================================================================

#[tokio::test]
async fn test_policy_grant_created() {
    let (store, reconciler) = reconciler();

    reconciler.reconcile(&policies(&["doc"])).await.unwrap();

    let grants = all_grants(&store).await;
    assert_eq!(grants.len(), 1);
    let grant = &grants[0];
    assert_eq!(grant.resource.resource_class, "doc");
    assert!(grant.resource.is_collection());
    assert_eq!(grant.action, "manage");
    assert_eq!(
        grant.holder,
        GrantHolder::DynamicGroup("manage_resource_collection:doc".into())
    );
}

#[tokio::test]
async fn test_existing_collection_resource_reused() {
    let (store, reconciler) = reconciler();
    let mut tx = store.begin().await.unwrap();
    let existing = tx.insert_resource("doc", None).await.unwrap();
    tx.insert_grant(existing.id, "list", &GrantHolder::User("bob".into()))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    let report = reconciler.reconcile(&policies(&["doc"])).await.unwrap();

    assert_eq!(report.collection_resources_created, 0);
    assert_eq!(report.policy_grants_created, 1);
    assert!(all_grants(&store)
        .await
        .iter()
        .all(|g| g.resource.id == existing.id));
}

#[tokio::test]
async fn test_reconciliation_idempotent() {
    let (store, reconciler) = reconciler();
    let config = policies(&["doc", "folder"]);

    reconciler.reconcile(&config).await.unwrap();
    let first = all_grants(&store).await;

    let report = reconciler.reconcile(&config).await.unwrap();
    let second = all_grants(&store).await;

    assert!(report.is_noop());
    assert_eq!(first, second);
    assert_eq!(second.len(), 2);
}

// ============================================================================
// REMOVED CLASSES
// ============================================================================

#[tokio::test]
async fn test_removed_class_is_pruned() {
    let (store, reconciler) = reconciler();
    reconciler.reconcile(&policies(&["doc", "folder"])).await.unwrap();

    let report = reconciler.reconcile(&policies(&["folder"])).await.unwrap();
    assert_eq!(report.policy_grants_removed, 1);
    assert_eq!(report.collection_resources_removed, 1);

    let mut tx = store.begin().await.unwrap();
    assert!(tx.find_resource("doc", None).await.unwrap().is_none());
    assert!(tx.find_resource("folder", None).await.unwrap().is_some());
    tx.rollback().await.unwrap();
}

#[tokio::test]
async fn test_foreign_grant_keeps_resource() {
    let (store, reconciler) = reconciler();
    reconciler.reconcile(&policies(&["doc"])).await.unwrap();

    let mut tx = store.begin().await.unwrap();
    let collection = tx.find_resource("doc", None).await.unwrap().unwrap();
    let foreign = tx
        .insert_grant(collection.id, "create", &GrantHolder::User("bob".into()))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    // class no longer declares a policy
    let config = AuthorizationConfig::default().with_resource_class("doc", None);
    reconciler.reconcile(&config).await.unwrap();

    let grants = all_grants(&store).await;
    assert_eq!(grants, vec![foreign]);
    assert_eq!(grants[0].resource.id, collection.id);
}

#[tokio::test]
async fn test_other_dynamic_group_grants_untouched() {
    let (store, reconciler) = reconciler();
    let mut tx = store.begin().await.unwrap();
    let collection = tx.insert_resource("doc", None).await.unwrap();
    tx.insert_grant(
        collection.id,
        "manage",
        &GrantHolder::DynamicGroup("admins".into()),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    reconciler
        .reconcile(&AuthorizationConfig::default())
        .await
        .unwrap();

    let grants = all_grants(&store).await;
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].holder, GrantHolder::DynamicGroup("admins".into()));
}

// ============================================================================
// ATOMICITY
// ============================================================================

#[tokio::test]
async fn test_failure_rolls_back_failing_class() {
    let (store, reconciler) = reconciler();

    // "doc" fails on its grant insert; "folder" is never reached
    store.inject_failure("insert_grant");
    let config = policies(&["doc", "folder"]);
    let first = reconciler.reconcile(&config).await;
    assert!(matches!(first, Err(AuthzError::StoreFailure { .. })));

    let mut tx = store.begin().await.unwrap();
    assert!(tx.find_resource("doc", None).await.unwrap().is_none());
    assert!(tx.find_resource("folder", None).await.unwrap().is_none());
    tx.rollback().await.unwrap();

    // the failpoint fired once; a rerun converges
    reconciler.reconcile(&config).await.unwrap();
    let holders: Vec<GrantHolder> = all_grants(&store).await.into_iter().map(|g| g.holder).collect();
    assert_eq!(
        holders,
        vec![
            GrantHolder::DynamicGroup(manage_collection_policy_group("doc")),
            GrantHolder::DynamicGroup(manage_collection_policy_group("folder")),
        ]
    );
}

#[tokio::test]
async fn test_failure_after_first_class_commits_first() {
    let (store, reconciler) = reconciler();
    reconciler.reconcile(&policies(&["doc"])).await.unwrap();

    // doc is already reconciled and inserts nothing; folder hits the failpoint
    store.inject_failure("insert_resource");
    let result = reconciler.reconcile(&policies(&["doc", "folder"])).await;
    assert!(matches!(result, Err(AuthzError::StoreFailure { .. })));

    let mut tx = store.begin().await.unwrap();
    let collections = tx
        .find_resources(&bastion_authz::types::ResourceFilter {
            resource_identifier: IdentifierFilter::Collection,
            ..Default::default()
        })
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let classes: Vec<&str> = collections.iter().map(|r| r.resource_class.as_str()).collect();
    assert_eq!(classes, vec!["doc"]);
}
