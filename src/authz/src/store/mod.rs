//! Persistence seam for resources, grants, groups and grant inheritance
//!
//! Every operation runs inside a [`StoreTransaction`]. Mutations become visible
//! only on [`StoreTransaction::commit`]; dropping or rolling back a transaction
//! discards them, so a failed multi-step operation leaves no orphaned rows.
//!
//! Cascade rules enforced by every backend:
//! - deleting a resource deletes its grants and every inheritance edge touching it
//! - deleting a group deletes its memberships (as parent and as child) and the
//!   grants it holds

use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;
use crate::types::{
    AuthorizationResource, GrantHolder, GrantId, GrantInheritance, GrantInheritanceId, GrantQuery,
    Group, GroupId, GroupMember, GroupMemberId, MemberHolder, Pagination, ResourceActionGrant,
    ResourceFilter, ResourceId,
};

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresStore;

/// Authorization store backend
#[async_trait]
pub trait AuthorizationStore: Send + Sync {
    /// Start a transaction
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>>;
}

/// Unit of work against an [`AuthorizationStore`]
#[async_trait]
pub trait StoreTransaction: Send {
    // Resources

    async fn find_resource(
        &mut self,
        resource_class: &str,
        resource_identifier: Option<&str>,
    ) -> Result<Option<AuthorizationResource>>;

    async fn get_resource(&mut self, id: ResourceId) -> Result<Option<AuthorizationResource>>;

    /// Resources matching `filter`, in creation order
    async fn find_resources(&mut self, filter: &ResourceFilter) -> Result<Vec<AuthorizationResource>>;

    /// Insert a resource; `(class, identifier)` must be unique
    async fn insert_resource(
        &mut self,
        resource_class: &str,
        resource_identifier: Option<&str>,
    ) -> Result<AuthorizationResource>;

    /// Delete a resource with its grants and inheritance edges
    async fn delete_resource(&mut self, id: ResourceId) -> Result<bool>;

    // Grants

    async fn insert_grant(
        &mut self,
        resource_id: ResourceId,
        action: &str,
        holder: &GrantHolder,
    ) -> Result<ResourceActionGrant>;

    async fn get_grant(&mut self, id: GrantId) -> Result<Option<ResourceActionGrant>>;

    async fn delete_grant(&mut self, id: GrantId) -> Result<bool>;

    /// Grants matching `query`, ordered by resource then grant id
    async fn find_grants(&mut self, query: &GrantQuery) -> Result<Vec<ResourceActionGrant>>;

    async fn count_grants(&mut self, resource_id: ResourceId) -> Result<usize>;

    // Groups

    async fn insert_group(&mut self, name: &str) -> Result<Group>;

    async fn get_group(&mut self, id: GroupId) -> Result<Option<Group>>;

    async fn list_groups(&mut self, page: Pagination) -> Result<Vec<Group>>;

    async fn rename_group(&mut self, id: GroupId, name: &str) -> Result<bool>;

    /// Delete a group, its memberships on both sides and its grants
    async fn delete_group(&mut self, id: GroupId) -> Result<bool>;

    async fn insert_group_member(
        &mut self,
        group: GroupId,
        holder: &MemberHolder,
    ) -> Result<GroupMember>;

    async fn get_group_member(&mut self, id: GroupMemberId) -> Result<Option<GroupMember>>;

    async fn delete_group_member(&mut self, id: GroupMemberId) -> Result<bool>;

    async fn list_group_members(&mut self, group: GroupId) -> Result<Vec<GroupMember>>;

    /// Direct child groups of `group`
    async fn child_group_ids(&mut self, group: GroupId) -> Result<Vec<GroupId>>;

    /// Groups having `group` as a direct child
    async fn parent_group_ids(&mut self, group: GroupId) -> Result<Vec<GroupId>>;

    /// Groups having `user` as a direct member
    async fn groups_with_user(&mut self, user: &str) -> Result<Vec<GroupId>>;

    // Grant inheritance

    async fn insert_grant_inheritance(
        &mut self,
        source: ResourceId,
        target: ResourceId,
    ) -> Result<GrantInheritance>;

    async fn delete_grant_inheritance(&mut self, id: GrantInheritanceId) -> Result<bool>;

    /// Inheritance edges whose source is one of `sources`
    async fn find_grant_inheritances(&mut self, sources: &[ResourceId])
        -> Result<Vec<GrantInheritance>>;

    // Transaction control

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}

/// Commit on success, roll back on error and return the original error
pub(crate) async fn finish<T>(tx: Box<dyn StoreTransaction>, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_error) = tx.rollback().await {
                warn!("Rollback failed after '{}': {}", e, rollback_error);
            }
            Err(e)
        }
    }
}
