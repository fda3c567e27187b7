//! Per-request action resolution
//!
//! A grant matches the session user if it is held by the user, by a group the
//! user belongs to (directly or through child groups) or by a dynamic group
//! whose expression accepts the user. A matching `manage` grant authorizes
//! every action and lists as the full action catalog of the resource's class.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

use super::cache::{CacheStats, RequestCache};
use crate::dynamic_groups::DynamicGroupEvaluator;
use crate::error::{AuthzError, Result};
use crate::grants::{self, describe, resource_query};
use crate::groups::graph;
use crate::registry::{ActionRegistry, ResourceClassActions};
use crate::store::{finish, AuthorizationStore, StoreTransaction};
use crate::types::{
    AuthorizationResource, CurrentUser, GrantHolder, GrantId, GrantQuery, GroupId, HolderFilter,
    Pagination, ResourceActionGrant, ResourceFilter, ResourceId, MANAGE_ACTION,
};

/// Actions the session user may perform on one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceActions {
    pub resource: AuthorizationResource,
    pub actions: Vec<String>,
}

/// A resource the session user holds at least one grant on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadableResource {
    pub resource: AuthorizationResource,
    /// The user holds `manage` on the resource
    pub writable: bool,
}

/// Resolution context bound to one user for the duration of one request
pub struct ResolutionSession {
    user: CurrentUser,
    store: Arc<dyn AuthorizationStore>,
    registry: Arc<ActionRegistry>,
    dynamic_groups: Arc<DynamicGroupEvaluator>,
    cache: RequestCache,
}

impl ResolutionSession {
    pub(crate) fn new(
        user: CurrentUser,
        store: Arc<dyn AuthorizationStore>,
        registry: Arc<ActionRegistry>,
        dynamic_groups: Arc<DynamicGroupEvaluator>,
    ) -> Self {
        Self {
            user,
            store,
            registry,
            dynamic_groups,
            cache: RequestCache::new(),
        }
    }

    pub fn user(&self) -> &CurrentUser {
        &self.user
    }

    /// Whether the user may perform `action` on the resource
    pub async fn is_authorized_for(
        &mut self,
        resource_class: &str,
        resource_identifier: Option<&str>,
        action: &str,
    ) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let result = self
            .matching_grants(tx.as_mut(), resource_query(resource_class, resource_identifier))
            .await;
        let grants = finish(tx, result).await?;
        let authorized = grants
            .iter()
            .any(|grant| grant.is_manage() || grant.action == action);

        debug!(
            "User {:?} {} '{}' on {}",
            self.user.identifier,
            if authorized { "may" } else { "may not" },
            action,
            describe(resource_class, resource_identifier)
        );
        Ok(authorized)
    }

    /// Actions the user may perform on the resource, optionally restricted to `filter`
    pub async fn actions_for_resource(
        &mut self,
        resource_class: &str,
        resource_identifier: Option<&str>,
        filter: Option<&[&str]>,
    ) -> Result<Vec<String>> {
        let mut tx = self.store.begin().await?;
        let result = self
            .matching_grants(tx.as_mut(), resource_query(resource_class, resource_identifier))
            .await;
        let grants = finish(tx, result).await?;

        Ok(self.resolve_actions(
            resource_class,
            resource_identifier.is_none(),
            &grants,
            filter,
        ))
    }

    /// Per-resource actions over every resource of `resource_class`
    ///
    /// Resources are listed in creation order; resources without any
    /// resulting action are skipped before `page` is applied.
    pub async fn actions_page_for_resource_class(
        &mut self,
        resource_class: &str,
        filter: Option<&[&str]>,
        page: Pagination,
    ) -> Result<Vec<ResourceActions>> {
        let mut tx = self.store.begin().await?;
        let result = self
            .matching_grants(tx.as_mut(), GrantQuery::new().for_class(resource_class))
            .await;
        let grants = finish(tx, result).await?;

        let rows = group_by_resource(grants).into_values().filter_map(|(resource, grants)| {
            let actions =
                self.resolve_actions(resource_class, resource.is_collection(), &grants, filter);
            (!actions.is_empty()).then_some(ResourceActions { resource, actions })
        });
        Ok(page.apply(rows))
    }

    /// Classes the user holds a grant in, plus direct inheritance targets of those grants
    pub async fn classes_current_user_may_read(&mut self) -> Result<BTreeSet<String>> {
        let mut tx = self.store.begin().await?;
        let result = self.readable_classes(tx.as_mut()).await;
        finish(tx, result).await
    }

    /// Resources the user holds a grant on, in creation order
    pub async fn resources_user_may_read(
        &mut self,
        resource_class: Option<&str>,
        page: Pagination,
    ) -> Result<Vec<ReadableResource>> {
        let query = match resource_class {
            Some(class) => GrantQuery::new().for_class(class),
            None => GrantQuery::new(),
        };
        let mut tx = self.store.begin().await?;
        let result = self.matching_grants(tx.as_mut(), query).await;
        let grants = finish(tx, result).await?;

        let rows = group_by_resource(grants)
            .into_values()
            .map(|(resource, grants)| ReadableResource {
                resource,
                writable: grants.iter().any(ResourceActionGrant::is_manage),
            });
        Ok(page.apply(rows))
    }

    /// The action catalog of `resource_class`, if the user may read the class
    pub async fn available_actions_for(
        &mut self,
        resource_class: &str,
    ) -> Result<Option<ResourceClassActions>> {
        let readable = self.classes_current_user_may_read().await?;
        Ok(readable
            .contains(resource_class)
            .then(|| self.registry.lookup(resource_class)))
    }

    /// Persisted groups the user belongs to
    pub async fn groups_current_user_is_member_of(&mut self) -> Result<BTreeSet<GroupId>> {
        let mut tx = self.store.begin().await?;
        let result = self.group_ids(tx.as_mut()).await;
        finish(tx, result).await
    }

    /// Dynamic groups the user belongs to, in declaration order
    pub fn dynamic_groups_current_user_is_member_of(&mut self) -> Vec<String> {
        self.dynamic_group_ids()
    }

    /// Grant `action` on behalf of the user, who must manage the resource
    pub async fn add_grant(
        &mut self,
        resource_class: &str,
        resource_identifier: Option<&str>,
        action: &str,
        holder: GrantHolder,
    ) -> Result<ResourceActionGrant> {
        let mut tx = self.store.begin().await?;
        let result: Result<ResourceActionGrant> = async {
            self.require_manage(tx.as_mut(), resource_class, resource_identifier)
                .await?;
            grants::add_grant(
                tx.as_mut(),
                resource_class,
                resource_identifier,
                action,
                &holder,
            )
            .await
        }
        .await;
        finish(tx, result).await
    }

    /// Revoke a grant on behalf of the user, who must manage its resource
    pub async fn remove_grant(&mut self, id: GrantId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result: Result<ResourceActionGrant> = async {
            let grant = grants::require_grant(tx.as_mut(), id).await?;
            self.require_manage(
                tx.as_mut(),
                &grant.resource.resource_class,
                grant.resource.resource_identifier.as_deref(),
            )
            .await?;
            grants::remove_grant(tx.as_mut(), id).await
        }
        .await;
        finish(tx, result).await.map(|_| ())
    }

    /// Forget memoized memberships
    pub fn clear_request_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    async fn require_manage(
        &mut self,
        tx: &mut dyn StoreTransaction,
        resource_class: &str,
        resource_identifier: Option<&str>,
    ) -> Result<()> {
        let query = resource_query(resource_class, resource_identifier)
            .with_actions(vec![MANAGE_ACTION.to_string()]);
        if self.matching_grants(tx, query).await?.is_empty() {
            return Err(AuthzError::Forbidden(format!(
                "user {:?} does not manage {}",
                self.user.identifier,
                describe(resource_class, resource_identifier)
            )));
        }
        Ok(())
    }

    async fn matching_grants(
        &mut self,
        tx: &mut dyn StoreTransaction,
        query: GrantQuery,
    ) -> Result<Vec<ResourceActionGrant>> {
        let holders = self.holder_filter(tx).await?;
        if holders.is_empty() {
            return Ok(Vec::new());
        }

        let grants = tx.find_grants(&query.held_by(holders)).await?;
        debug!("{} grants match user {:?}", grants.len(), self.user.identifier);
        Ok(grants)
    }

    async fn holder_filter(&mut self, tx: &mut dyn StoreTransaction) -> Result<HolderFilter> {
        Ok(HolderFilter {
            user_identifier: self.user.identifier.clone(),
            group_ids: self.group_ids(tx).await?.into_iter().collect(),
            dynamic_group_identifiers: self.dynamic_group_ids(),
        })
    }

    async fn group_ids(&mut self, tx: &mut dyn StoreTransaction) -> Result<BTreeSet<GroupId>> {
        if let Some(groups) = self.cache.groups() {
            return Ok(groups.clone());
        }

        let groups = match &self.user.identifier {
            Some(user) => graph::groups_user_is_member_of(tx, user).await?,
            None => BTreeSet::new(),
        };
        self.cache.store_groups(groups.clone());
        Ok(groups)
    }

    fn dynamic_group_ids(&mut self) -> Vec<String> {
        if let Some(groups) = self.cache.dynamic_groups() {
            return groups.to_vec();
        }

        let groups = self.dynamic_groups.members_of(&self.user);
        self.cache.store_dynamic_groups(groups.clone());
        groups
    }

    async fn readable_classes(&mut self, tx: &mut dyn StoreTransaction) -> Result<BTreeSet<String>> {
        let grants = self.matching_grants(tx, GrantQuery::new()).await?;

        let mut classes: BTreeSet<String> = BTreeSet::new();
        let mut sources: BTreeSet<ResourceId> = BTreeSet::new();
        for grant in grants {
            classes.insert(grant.resource.resource_class.clone());
            sources.insert(grant.resource.id);
        }

        // direct inheritance targets only
        if !sources.is_empty() {
            let sources: Vec<ResourceId> = sources.into_iter().collect();
            let targets: Vec<ResourceId> = tx
                .find_grant_inheritances(&sources)
                .await?
                .into_iter()
                .map(|edge| edge.target)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            if !targets.is_empty() {
                let resources = tx
                    .find_resources(&ResourceFilter {
                        resource_ids: Some(targets),
                        ..Default::default()
                    })
                    .await?;
                classes.extend(resources.into_iter().map(|r| r.resource_class));
            }
        }

        debug!("User {:?} may read classes {:?}", self.user.identifier, classes);
        Ok(classes)
    }

    fn resolve_actions(
        &self,
        resource_class: &str,
        collection: bool,
        grants: &[ResourceActionGrant],
        filter: Option<&[&str]>,
    ) -> Vec<String> {
        // catalog first when managed, then directly granted actions
        let mut actions: Vec<String> = if grants.iter().any(ResourceActionGrant::is_manage) {
            self.registry
                .lookup(resource_class)
                .action_names(collection)
        } else {
            Vec::new()
        };
        let mut seen: BTreeSet<String> = actions.iter().cloned().collect();
        for grant in grants {
            if seen.insert(grant.action.clone()) {
                actions.push(grant.action.clone());
            }
        }

        match filter {
            Some(filter) => actions
                .into_iter()
                .filter(|action| filter.contains(&action.as_str()))
                .collect(),
            None => actions,
        }
    }
}

impl std::fmt::Debug for ResolutionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionSession")
            .field("user", &self.user)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

/// Group grants by resource, keyed (and so ordered) by resource id
fn group_by_resource(
    grants: Vec<ResourceActionGrant>,
) -> BTreeMap<ResourceId, (AuthorizationResource, Vec<ResourceActionGrant>)> {
    let mut by_resource: BTreeMap<ResourceId, (AuthorizationResource, Vec<ResourceActionGrant>)> =
        BTreeMap::new();
    for grant in grants {
        by_resource
            .entry(grant.resource.id)
            .or_insert_with(|| (grant.resource.clone(), Vec::new()))
            .1
            .push(grant);
    }
    by_resource
}
