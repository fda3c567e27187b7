//! Grant store service
//!
//! Grants are `(resource, action, holder)` triples. Resources are created on
//! the first grant that targets them and live until deregistered explicitly
//! (or pruned by the collection-policy reconciler).

use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{AuthzError, Result};
use crate::store::{finish, AuthorizationStore, StoreTransaction};
use crate::types::{
    AuthorizationResource, GrantHolder, GrantId, GrantInheritance, GrantInheritanceId, GrantQuery,
    HolderFilter, IdentifierFilter, ResourceActionGrant, ResourceId, MANAGE_ACTION,
};

/// Add, remove and query grants and the resources they protect
#[derive(Clone)]
pub struct GrantService {
    store: Arc<dyn AuthorizationStore>,
}

impl GrantService {
    pub fn new(store: Arc<dyn AuthorizationStore>) -> Self {
        Self { store }
    }

    /// Grant `action` on a resource to `holder`
    ///
    /// The resource is created if it does not exist yet. Granting an existing
    /// `(resource, action, holder)` triple again returns the existing grant.
    pub async fn add_grant(
        &self,
        resource_class: &str,
        resource_identifier: Option<&str>,
        action: &str,
        holder: GrantHolder,
    ) -> Result<ResourceActionGrant> {
        let mut tx = self.store.begin().await?;
        let result = add_grant(
            tx.as_mut(),
            resource_class,
            resource_identifier,
            action,
            &holder,
        )
        .await;
        finish(tx, result).await
    }

    pub async fn remove_grant(&self, id: GrantId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result = remove_grant(tx.as_mut(), id).await;
        finish(tx, result).await.map(|_| ())
    }

    pub async fn get_grant(&self, id: GrantId) -> Result<ResourceActionGrant> {
        let mut tx = self.store.begin().await?;
        let result = require_grant(tx.as_mut(), id).await;
        finish(tx, result).await
    }

    /// Grants matching `query`, ordered by resource then grant id
    pub async fn find_grants(&self, query: &GrantQuery) -> Result<Vec<ResourceActionGrant>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_grants(query).await;
        finish(tx, result).await
    }

    pub async fn get_resource(
        &self,
        resource_class: &str,
        resource_identifier: Option<&str>,
    ) -> Result<Option<AuthorizationResource>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_resource(resource_class, resource_identifier).await;
        finish(tx, result).await
    }

    /// Create a resource and give its owner the `manage` action on it
    ///
    /// Fails with [`AuthzError::GrantInvalid`] if the resource already exists.
    pub async fn register_resource(
        &self,
        resource_class: &str,
        resource_identifier: Option<&str>,
        owner: &str,
    ) -> Result<ResourceActionGrant> {
        let holder = GrantHolder::User(owner.to_string());
        let mut tx = self.store.begin().await?;
        let result: Result<ResourceActionGrant> = async {
            if tx
                .find_resource(resource_class, resource_identifier)
                .await?
                .is_some()
            {
                return Err(AuthzError::GrantInvalid(format!(
                    "resource {} already registered",
                    describe(resource_class, resource_identifier)
                )));
            }
            add_grant(
                tx.as_mut(),
                resource_class,
                resource_identifier,
                MANAGE_ACTION,
                &holder,
            )
            .await
        }
        .await;
        let grant = finish(tx, result).await?;

        info!(
            "Registered resource {} owned by '{}'",
            describe(resource_class, resource_identifier),
            owner
        );
        Ok(grant)
    }

    /// Delete a resource with its grants and inheritance edges
    ///
    /// Returns whether the resource existed.
    pub async fn remove_resource(
        &self,
        resource_class: &str,
        resource_identifier: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let result: Result<bool> = async {
            match tx.find_resource(resource_class, resource_identifier).await? {
                Some(resource) => tx.delete_resource(resource.id).await,
                None => Ok(false),
            }
        }
        .await;
        let removed = finish(tx, result).await?;

        if removed {
            info!(
                "Removed resource {}",
                describe(resource_class, resource_identifier)
            );
        }
        Ok(removed)
    }

    /// Delete several item resources of one class in one transaction
    ///
    /// Returns the number of resources that existed.
    pub async fn remove_resources(&self, resource_class: &str, identifiers: &[String]) -> Result<usize> {
        let mut tx = self.store.begin().await?;
        let result: Result<usize> = async {
            let mut removed = 0;
            for identifier in identifiers {
                if let Some(resource) = tx.find_resource(resource_class, Some(identifier)).await? {
                    if tx.delete_resource(resource.id).await? {
                        removed += 1;
                    }
                }
            }
            Ok(removed)
        }
        .await;
        let removed = finish(tx, result).await?;

        info!("Removed {} '{}' resources", removed, resource_class);
        Ok(removed)
    }

    /// Let any grant on `source` reveal the catalog of `target`'s class
    pub async fn add_grant_inheritance(
        &self,
        source: ResourceId,
        target: ResourceId,
    ) -> Result<GrantInheritance> {
        let mut tx = self.store.begin().await?;
        let result: Result<GrantInheritance> = async {
            if source == target {
                return Err(AuthzError::GrantInvalid(format!(
                    "resource {} cannot inherit from itself",
                    source
                )));
            }
            for id in [source, target] {
                if tx.get_resource(id).await?.is_none() {
                    return Err(AuthzError::ResourceNotFound(format!("resource id {}", id)));
                }
            }
            let existing = tx.find_grant_inheritances(&[source]).await?;
            if let Some(edge) = existing.into_iter().find(|e| e.target == target) {
                return Ok(edge);
            }
            tx.insert_grant_inheritance(source, target).await
        }
        .await;
        let edge = finish(tx, result).await?;

        info!("Grant inheritance {}: {} -> {}", edge.id, source, target);
        Ok(edge)
    }

    /// Returns whether the edge existed
    pub async fn remove_grant_inheritance(&self, id: GrantInheritanceId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let result = tx.delete_grant_inheritance(id).await;
        finish(tx, result).await
    }

    pub async fn grant_inheritances_of(&self, source: ResourceId) -> Result<Vec<GrantInheritance>> {
        let mut tx = self.store.begin().await?;
        let result = tx.find_grant_inheritances(&[source]).await;
        finish(tx, result).await
    }
}

impl std::fmt::Debug for GrantService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantService").finish_non_exhaustive()
    }
}

pub(crate) fn describe(resource_class: &str, resource_identifier: Option<&str>) -> String {
    match resource_identifier {
        Some(identifier) => format!("{}/{}", resource_class, identifier),
        None => format!("{} (collection)", resource_class),
    }
}

async fn validate_grant(
    tx: &mut dyn StoreTransaction,
    resource_class: &str,
    action: &str,
    holder: &GrantHolder,
) -> Result<()> {
    if resource_class.is_empty() {
        return Err(AuthzError::GrantInvalid(
            "resource class cannot be empty".to_string(),
        ));
    }
    if action.is_empty() {
        return Err(AuthzError::GrantInvalid("action cannot be empty".to_string()));
    }
    holder.validate()?;
    if let GrantHolder::Group(group) = holder {
        if tx.get_group(*group).await?.is_none() {
            return Err(AuthzError::GroupNotFound(*group));
        }
    }
    Ok(())
}

/// Find or create the resource and insert the grant unless already present
pub(crate) async fn add_grant(
    tx: &mut dyn StoreTransaction,
    resource_class: &str,
    resource_identifier: Option<&str>,
    action: &str,
    holder: &GrantHolder,
) -> Result<ResourceActionGrant> {
    validate_grant(tx, resource_class, action, holder).await?;

    let resource = match tx.find_resource(resource_class, resource_identifier).await? {
        Some(resource) => resource,
        None => {
            debug!(
                "Creating resource {}",
                describe(resource_class, resource_identifier)
            );
            tx.insert_resource(resource_class, resource_identifier).await?
        }
    };

    let existing = tx
        .find_grants(
            &GrantQuery::new()
                .for_resources(vec![resource.id])
                .with_actions(vec![action.to_string()])
                .held_by(holder_filter(holder)),
        )
        .await?;
    if let Some(grant) = existing.into_iter().next() {
        debug!("Grant {} already exists", grant.id);
        return Ok(grant);
    }

    let grant = tx.insert_grant(resource.id, action, holder).await?;
    info!(
        "Granted '{}' on {} to {:?}",
        action,
        describe(resource_class, resource_identifier),
        holder
    );
    Ok(grant)
}

pub(crate) async fn require_grant(
    tx: &mut dyn StoreTransaction,
    id: GrantId,
) -> Result<ResourceActionGrant> {
    tx.get_grant(id).await?.ok_or(AuthzError::GrantNotFound(id))
}

/// Delete a grant, returning it
pub(crate) async fn remove_grant(
    tx: &mut dyn StoreTransaction,
    id: GrantId,
) -> Result<ResourceActionGrant> {
    let grant = require_grant(tx, id).await?;
    tx.delete_grant(id).await?;

    info!(
        "Revoked grant {} ('{}' on {} from {:?})",
        id,
        grant.action,
        describe(
            &grant.resource.resource_class,
            grant.resource.resource_identifier.as_deref()
        ),
        grant.holder
    );
    Ok(grant)
}

/// Holder filter matching exactly `holder`
pub(crate) fn holder_filter(holder: &GrantHolder) -> HolderFilter {
    match holder {
        GrantHolder::User(user) => HolderFilter {
            user_identifier: Some(user.clone()),
            ..Default::default()
        },
        GrantHolder::Group(group) => HolderFilter {
            group_ids: vec![*group],
            ..Default::default()
        },
        GrantHolder::DynamicGroup(id) => HolderFilter {
            dynamic_group_identifiers: vec![id.clone()],
            ..Default::default()
        },
    }
}

/// Query for grants on exactly one resource
pub(crate) fn resource_query(resource_class: &str, resource_identifier: Option<&str>) -> GrantQuery {
    GrantQuery::new()
        .for_class(resource_class)
        .with_identifier(IdentifierFilter::Exact(
            resource_identifier.map(str::to_string),
        ))
}
