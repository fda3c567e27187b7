//! Group management service

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::graph;
use crate::error::{AuthzError, Result};
use crate::store::{finish, AuthorizationStore, StoreTransaction};
use crate::types::{Group, GroupId, GroupMember, GroupMemberId, MemberHolder, Pagination};

/// Create, inspect and restructure persisted groups
#[derive(Clone)]
pub struct GroupService {
    store: Arc<dyn AuthorizationStore>,
}

impl GroupService {
    pub fn new(store: Arc<dyn AuthorizationStore>) -> Self {
        Self { store }
    }

    pub async fn create_group(&self, name: &str) -> Result<Group> {
        let mut tx = self.store.begin().await?;
        let result = tx.insert_group(name).await;
        let group = finish(tx, result).await?;

        info!("Created group {} '{}'", group.id, group.name);
        Ok(group)
    }

    pub async fn get_group(&self, id: GroupId) -> Result<Group> {
        let mut tx = self.store.begin().await?;
        let result = require_group(tx.as_mut(), id).await;
        finish(tx, result).await
    }

    /// Groups in creation order
    pub async fn list_groups(&self, page: Pagination) -> Result<Vec<Group>> {
        let mut tx = self.store.begin().await?;
        let result = tx.list_groups(page).await;
        finish(tx, result).await
    }

    pub async fn rename_group(&self, id: GroupId, name: &str) -> Result<Group> {
        let mut tx = self.store.begin().await?;
        let result: Result<Group> = async {
            if !tx.rename_group(id, name).await? {
                return Err(AuthzError::GroupNotFound(id));
            }
            require_group(tx.as_mut(), id).await
        }
        .await;
        finish(tx, result).await
    }

    /// Delete a group together with its memberships and the grants it holds
    pub async fn remove_group(&self, id: GroupId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result: Result<()> = async {
            if !tx.delete_group(id).await? {
                return Err(AuthzError::GroupNotFound(id));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        info!("Removed group {}", id);
        Ok(())
    }

    /// Add a user or a child group to `group`
    ///
    /// Fails with [`AuthzError::GroupMemberInvalid`] for self-loops, cycles,
    /// duplicate edges and unknown child groups; the graph is left unchanged.
    pub async fn add_group_member(&self, group: GroupId, holder: MemberHolder) -> Result<GroupMember> {
        let mut tx = self.store.begin().await?;
        let result = add_group_member(tx.as_mut(), group, &holder).await;
        let member = finish(tx, result).await?;

        info!("Added {:?} to group {}", member.holder, group);
        Ok(member)
    }

    pub async fn remove_group_member(&self, id: GroupMemberId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let result: Result<()> = async {
            if !tx.delete_group_member(id).await? {
                return Err(AuthzError::GroupMemberInvalid(format!(
                    "group member {} does not exist",
                    id
                )));
            }
            Ok(())
        }
        .await;
        finish(tx, result).await?;

        info!("Removed group member {}", id);
        Ok(())
    }

    /// Direct members of `group`
    pub async fn group_members(&self, group: GroupId) -> Result<Vec<GroupMember>> {
        let mut tx = self.store.begin().await?;
        let result: Result<Vec<GroupMember>> = async {
            require_group(tx.as_mut(), group).await?;
            tx.list_group_members(group).await
        }
        .await;
        finish(tx, result).await
    }

    pub async fn is_user_member_of(&self, user: &str, group: GroupId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let result = graph::is_user_member_of(tx.as_mut(), user, group).await;
        finish(tx, result).await
    }

    pub async fn groups_user_is_member_of(&self, user: &str) -> Result<BTreeSet<GroupId>> {
        let mut tx = self.store.begin().await?;
        let result = graph::groups_user_is_member_of(tx.as_mut(), user).await;
        finish(tx, result).await
    }

    pub async fn disallowed_child_group_ids_for(&self, group: GroupId) -> Result<BTreeSet<GroupId>> {
        let mut tx = self.store.begin().await?;
        let result = graph::disallowed_child_group_ids_for(tx.as_mut(), group).await;
        finish(tx, result).await
    }
}

impl std::fmt::Debug for GroupService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupService").finish_non_exhaustive()
    }
}

async fn require_group(tx: &mut dyn StoreTransaction, id: GroupId) -> Result<Group> {
    tx.get_group(id).await?.ok_or(AuthzError::GroupNotFound(id))
}

async fn add_group_member(
    tx: &mut dyn StoreTransaction,
    group: GroupId,
    holder: &MemberHolder,
) -> Result<GroupMember> {
    require_group(tx, group).await?;

    match holder {
        MemberHolder::User(user) => {
            if user.is_empty() {
                return Err(AuthzError::GroupMemberInvalid(
                    "member user identifier cannot be empty".to_string(),
                ));
            }
            if tx.groups_with_user(user).await?.contains(&group) {
                return Err(AuthzError::GroupMemberInvalid(format!(
                    "user '{}' is already a member of group {}",
                    user, group
                )));
            }
        }
        MemberHolder::ChildGroup(child) => {
            if tx.get_group(*child).await?.is_none() {
                return Err(AuthzError::GroupMemberInvalid(format!(
                    "child group {} does not exist",
                    child
                )));
            }
            let disallowed = graph::disallowed_child_group_ids_for(tx, group).await?;
            if disallowed.contains(child) {
                debug!("Rejecting child {} for group {}: disallowed {:?}", child, group, disallowed);
                return Err(AuthzError::GroupMemberInvalid(format!(
                    "group {} cannot become a child of group {}",
                    child, group
                )));
            }
        }
    }

    tx.insert_group_member(group, holder).await
}
