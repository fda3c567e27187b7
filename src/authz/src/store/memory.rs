//! In-memory authorization store
//!
//! A transaction holds the store's write lock for its whole lifetime and
//! mutates a private copy of the state, which replaces the shared state on
//! commit. Transactions are therefore serializable and a rollback is a drop.

use async_trait::async_trait;
use dashmap::DashSet;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::{AuthorizationStore, StoreTransaction};
use crate::error::{AuthzError, Result};
use crate::types::{
    AuthorizationResource, GrantHolder, GrantId, GrantInheritance, GrantInheritanceId, GrantQuery,
    Group, GroupId, GroupMember, GroupMemberId, MemberHolder, Pagination, ResourceActionGrant,
    ResourceFilter, ResourceId,
};

#[derive(Debug, Clone)]
struct GrantRow {
    id: GrantId,
    resource_id: ResourceId,
    action: String,
    holder: GrantHolder,
}

#[derive(Debug, Clone, Default)]
struct State {
    last_id: i64,
    resources: BTreeMap<ResourceId, AuthorizationResource>,
    grants: BTreeMap<GrantId, GrantRow>,
    groups: BTreeMap<GroupId, Group>,
    members: BTreeMap<GroupMemberId, GroupMember>,
    inheritances: BTreeMap<GrantInheritanceId, GrantInheritance>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn materialize(&self, row: &GrantRow) -> Option<ResourceActionGrant> {
        self.resources.get(&row.resource_id).map(|resource| ResourceActionGrant {
            id: row.id,
            resource: resource.clone(),
            action: row.action.clone(),
            holder: row.holder.clone(),
        })
    }
}

/// In-memory store
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    failpoints: Arc<DashSet<String>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of `operation` (a [`StoreTransaction`] method name) fail
    /// with a store failure. Used to exercise rollback paths.
    pub fn inject_failure(&self, operation: &str) {
        self.failpoints.insert(operation.to_string());
    }
}

#[async_trait]
impl AuthorizationStore for InMemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
        let guard = self.state.clone().write_owned().await;
        Ok(Box::new(InMemoryTransaction {
            guard,
            working: None,
            failpoints: self.failpoints.clone(),
        }))
    }
}

/// Transaction over an [`InMemoryStore`]
pub struct InMemoryTransaction {
    guard: OwnedRwLockWriteGuard<State>,
    /// Copy-on-write state, `None` until the first mutation
    working: Option<State>,
    failpoints: Arc<DashSet<String>>,
}

impl InMemoryTransaction {
    fn state(&self) -> &State {
        self.working.as_ref().unwrap_or(&*self.guard)
    }

    fn state_mut(&mut self) -> &mut State {
        let guard = &self.guard;
        self.working.get_or_insert_with(|| State::clone(guard))
    }

    fn check_failpoint(&self, operation: &str) -> Result<()> {
        if self.failpoints.remove(operation).is_some() {
            return Err(AuthzError::store(format!("injected failure in {}", operation)));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTransaction for InMemoryTransaction {
    async fn find_resource(
        &mut self,
        resource_class: &str,
        resource_identifier: Option<&str>,
    ) -> Result<Option<AuthorizationResource>> {
        self.check_failpoint("find_resource")?;
        Ok(self
            .state()
            .resources
            .values()
            .find(|r| {
                r.resource_class == resource_class
                    && r.resource_identifier.as_deref() == resource_identifier
            })
            .cloned())
    }

    async fn get_resource(&mut self, id: ResourceId) -> Result<Option<AuthorizationResource>> {
        self.check_failpoint("get_resource")?;
        Ok(self.state().resources.get(&id).cloned())
    }

    async fn find_resources(&mut self, filter: &ResourceFilter) -> Result<Vec<AuthorizationResource>> {
        self.check_failpoint("find_resources")?;
        Ok(self
            .state()
            .resources
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    async fn insert_resource(
        &mut self,
        resource_class: &str,
        resource_identifier: Option<&str>,
    ) -> Result<AuthorizationResource> {
        self.check_failpoint("insert_resource")?;
        if self.find_resource(resource_class, resource_identifier).await?.is_some() {
            return Err(AuthzError::store(format!(
                "unique violation: resource ({}, {:?}) exists",
                resource_class, resource_identifier
            )));
        }

        let state = self.state_mut();
        let resource = AuthorizationResource {
            id: state.next_id(),
            resource_class: resource_class.to_string(),
            resource_identifier: resource_identifier.map(str::to_string),
        };
        state.resources.insert(resource.id, resource.clone());
        Ok(resource)
    }

    async fn delete_resource(&mut self, id: ResourceId) -> Result<bool> {
        self.check_failpoint("delete_resource")?;
        if !self.state().resources.contains_key(&id) {
            return Ok(false);
        }

        let state = self.state_mut();
        state.resources.remove(&id);
        state.grants.retain(|_, g| g.resource_id != id);
        state.inheritances.retain(|_, e| e.source != id && e.target != id);
        Ok(true)
    }

    async fn insert_grant(
        &mut self,
        resource_id: ResourceId,
        action: &str,
        holder: &GrantHolder,
    ) -> Result<ResourceActionGrant> {
        self.check_failpoint("insert_grant")?;
        if !self.state().resources.contains_key(&resource_id) {
            return Err(AuthzError::store(format!(
                "foreign key violation: resource {} does not exist",
                resource_id
            )));
        }
        if let GrantHolder::Group(group) = holder {
            if !self.state().groups.contains_key(group) {
                return Err(AuthzError::store(format!(
                    "foreign key violation: group {} does not exist",
                    group
                )));
            }
        }

        let state = self.state_mut();
        let row = GrantRow {
            id: state.next_id(),
            resource_id,
            action: action.to_string(),
            holder: holder.clone(),
        };
        state.grants.insert(row.id, row.clone());
        state
            .materialize(&row)
            .ok_or_else(|| AuthzError::store("grant resource vanished"))
    }

    async fn get_grant(&mut self, id: GrantId) -> Result<Option<ResourceActionGrant>> {
        self.check_failpoint("get_grant")?;
        let state = self.state();
        Ok(state.grants.get(&id).and_then(|row| state.materialize(row)))
    }

    async fn delete_grant(&mut self, id: GrantId) -> Result<bool> {
        self.check_failpoint("delete_grant")?;
        if !self.state().grants.contains_key(&id) {
            return Ok(false);
        }
        Ok(self.state_mut().grants.remove(&id).is_some())
    }

    async fn find_grants(&mut self, query: &GrantQuery) -> Result<Vec<ResourceActionGrant>> {
        self.check_failpoint("find_grants")?;
        let state = self.state();
        let mut grants: Vec<ResourceActionGrant> = state
            .grants
            .values()
            .filter_map(|row| state.materialize(row))
            .filter(|grant| query.matches(grant))
            .collect();
        grants.sort_by_key(|g| (g.resource.id, g.id));

        Ok(query.page.apply(grants))
    }

    async fn count_grants(&mut self, resource_id: ResourceId) -> Result<usize> {
        self.check_failpoint("count_grants")?;
        Ok(self
            .state()
            .grants
            .values()
            .filter(|g| g.resource_id == resource_id)
            .count())
    }

    async fn insert_group(&mut self, name: &str) -> Result<Group> {
        self.check_failpoint("insert_group")?;
        let state = self.state_mut();
        let group = Group {
            id: state.next_id(),
            name: name.to_string(),
        };
        state.groups.insert(group.id, group.clone());
        Ok(group)
    }

    async fn get_group(&mut self, id: GroupId) -> Result<Option<Group>> {
        self.check_failpoint("get_group")?;
        Ok(self.state().groups.get(&id).cloned())
    }

    async fn list_groups(&mut self, page: Pagination) -> Result<Vec<Group>> {
        self.check_failpoint("list_groups")?;
        Ok(page.apply(self.state().groups.values().cloned()))
    }

    async fn rename_group(&mut self, id: GroupId, name: &str) -> Result<bool> {
        self.check_failpoint("rename_group")?;
        if !self.state().groups.contains_key(&id) {
            return Ok(false);
        }
        if let Some(group) = self.state_mut().groups.get_mut(&id) {
            group.name = name.to_string();
        }
        Ok(true)
    }

    async fn delete_group(&mut self, id: GroupId) -> Result<bool> {
        self.check_failpoint("delete_group")?;
        if !self.state().groups.contains_key(&id) {
            return Ok(false);
        }

        let state = self.state_mut();
        state.groups.remove(&id);
        state
            .members
            .retain(|_, m| m.group != id && m.holder != MemberHolder::ChildGroup(id));
        state.grants.retain(|_, g| g.holder != GrantHolder::Group(id));
        Ok(true)
    }

    async fn insert_group_member(
        &mut self,
        group: GroupId,
        holder: &MemberHolder,
    ) -> Result<GroupMember> {
        self.check_failpoint("insert_group_member")?;
        let mut referenced = vec![group];
        if let MemberHolder::ChildGroup(child) = holder {
            referenced.push(*child);
        }
        if let Some(missing) = referenced
            .iter()
            .find(|id| !self.state().groups.contains_key(*id))
        {
            return Err(AuthzError::store(format!(
                "foreign key violation: group {} does not exist",
                missing
            )));
        }
        if self
            .state()
            .members
            .values()
            .any(|m| m.group == group && &m.holder == holder)
        {
            return Err(AuthzError::store(format!(
                "unique violation: member {:?} already in group {}",
                holder, group
            )));
        }

        let state = self.state_mut();
        let member = GroupMember {
            id: state.next_id(),
            group,
            holder: holder.clone(),
        };
        state.members.insert(member.id, member.clone());
        Ok(member)
    }

    async fn get_group_member(&mut self, id: GroupMemberId) -> Result<Option<GroupMember>> {
        self.check_failpoint("get_group_member")?;
        Ok(self.state().members.get(&id).cloned())
    }

    async fn delete_group_member(&mut self, id: GroupMemberId) -> Result<bool> {
        self.check_failpoint("delete_group_member")?;
        if !self.state().members.contains_key(&id) {
            return Ok(false);
        }
        Ok(self.state_mut().members.remove(&id).is_some())
    }

    async fn list_group_members(&mut self, group: GroupId) -> Result<Vec<GroupMember>> {
        self.check_failpoint("list_group_members")?;
        Ok(self
            .state()
            .members
            .values()
            .filter(|m| m.group == group)
            .cloned()
            .collect())
    }

    async fn child_group_ids(&mut self, group: GroupId) -> Result<Vec<GroupId>> {
        self.check_failpoint("child_group_ids")?;
        Ok(self
            .state()
            .members
            .values()
            .filter(|m| m.group == group)
            .filter_map(|m| match m.holder {
                MemberHolder::ChildGroup(child) => Some(child),
                MemberHolder::User(_) => None,
            })
            .collect())
    }

    async fn parent_group_ids(&mut self, group: GroupId) -> Result<Vec<GroupId>> {
        self.check_failpoint("parent_group_ids")?;
        Ok(self
            .state()
            .members
            .values()
            .filter(|m| m.holder == MemberHolder::ChildGroup(group))
            .map(|m| m.group)
            .collect())
    }

    async fn groups_with_user(&mut self, user: &str) -> Result<Vec<GroupId>> {
        self.check_failpoint("groups_with_user")?;
        Ok(self
            .state()
            .members
            .values()
            .filter(|m| matches!(&m.holder, MemberHolder::User(u) if u == user))
            .map(|m| m.group)
            .collect())
    }

    async fn insert_grant_inheritance(
        &mut self,
        source: ResourceId,
        target: ResourceId,
    ) -> Result<GrantInheritance> {
        self.check_failpoint("insert_grant_inheritance")?;
        for id in [source, target] {
            if !self.state().resources.contains_key(&id) {
                return Err(AuthzError::store(format!(
                    "foreign key violation: resource {} does not exist",
                    id
                )));
            }
        }
        if source == target
            || self
                .state()
                .inheritances
                .values()
                .any(|e| e.source == source && e.target == target)
        {
            return Err(AuthzError::store(format!(
                "constraint violation: inheritance {} -> {}",
                source, target
            )));
        }

        let state = self.state_mut();
        let edge = GrantInheritance {
            id: state.next_id(),
            source,
            target,
        };
        state.inheritances.insert(edge.id, edge.clone());
        Ok(edge)
    }

    async fn delete_grant_inheritance(&mut self, id: GrantInheritanceId) -> Result<bool> {
        self.check_failpoint("delete_grant_inheritance")?;
        if !self.state().inheritances.contains_key(&id) {
            return Ok(false);
        }
        Ok(self.state_mut().inheritances.remove(&id).is_some())
    }

    async fn find_grant_inheritances(
        &mut self,
        sources: &[ResourceId],
    ) -> Result<Vec<GrantInheritance>> {
        self.check_failpoint("find_grant_inheritances")?;
        Ok(self
            .state()
            .inheritances
            .values()
            .filter(|e| sources.contains(&e.source))
            .cloned()
            .collect())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.check_failpoint("commit")?;
        let InMemoryTransaction {
            mut guard, working, ..
        } = *self;
        if let Some(state) = working {
            *guard = state;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = InMemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        let resource = tx.insert_resource("doc", Some("1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_resource(resource.id).await.unwrap(), Some(resource));
    }

    #[tokio::test]
    async fn test_rollback_discards_changes() {
        let store = InMemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_resource("doc", Some("1")).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.find_resource("doc", Some("1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_resource() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        tx.insert_resource("doc", None).await.unwrap();
        let result = tx.insert_resource("doc", None).await;
        assert!(matches!(result, Err(AuthzError::StoreFailure { .. })));
    }

    #[tokio::test]
    async fn test_resource_cascade() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let doc = tx.insert_resource("doc", Some("1")).await.unwrap();
        let folder = tx.insert_resource("folder", Some("1")).await.unwrap();
        tx.insert_grant(doc.id, "read", &GrantHolder::User("alice".into()))
            .await
            .unwrap();
        tx.insert_grant_inheritance(folder.id, doc.id).await.unwrap();

        assert!(tx.delete_resource(doc.id).await.unwrap());
        assert_eq!(tx.count_grants(doc.id).await.unwrap(), 0);
        assert!(tx.find_grant_inheritances(&[folder.id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_group_cascade() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let parent = tx.insert_group("parent").await.unwrap();
        let group = tx.insert_group("group").await.unwrap();
        let child = tx.insert_group("child").await.unwrap();
        tx.insert_group_member(parent.id, &MemberHolder::ChildGroup(group.id))
            .await
            .unwrap();
        tx.insert_group_member(group.id, &MemberHolder::ChildGroup(child.id))
            .await
            .unwrap();
        tx.insert_group_member(group.id, &MemberHolder::User("alice".into()))
            .await
            .unwrap();
        let doc = tx.insert_resource("doc", Some("1")).await.unwrap();
        tx.insert_grant(doc.id, "read", &GrantHolder::Group(group.id))
            .await
            .unwrap();

        assert!(tx.delete_group(group.id).await.unwrap());
        assert!(tx.child_group_ids(parent.id).await.unwrap().is_empty());
        assert!(tx.parent_group_ids(child.id).await.unwrap().is_empty());
        assert!(tx.groups_with_user("alice").await.unwrap().is_empty());
        assert_eq!(tx.count_grants(doc.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_injected_failure_fires_once() {
        let store = InMemoryStore::new();
        store.inject_failure("insert_group");

        let mut tx = store.begin().await.unwrap();
        assert!(tx.insert_group("first").await.is_err());
        assert!(tx.insert_group("second").await.is_ok());
    }

    #[tokio::test]
    async fn test_find_grants_ordering_and_paging() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let first = tx.insert_resource("doc", Some("1")).await.unwrap();
        let second = tx.insert_resource("doc", Some("2")).await.unwrap();
        tx.insert_grant(second.id, "read", &GrantHolder::User("alice".into()))
            .await
            .unwrap();
        tx.insert_grant(first.id, "write", &GrantHolder::User("alice".into()))
            .await
            .unwrap();

        let all = tx.find_grants(&GrantQuery::new().for_class("doc")).await.unwrap();
        assert_eq!(all[0].resource.id, first.id);
        assert_eq!(all[1].resource.id, second.id);

        let paged = tx
            .find_grants(&GrantQuery::new().with_page(Pagination::new(1, 1)))
            .await
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged[0].action, "read");
    }

    #[tokio::test]
    async fn test_duplicate_edges_rejected() {
        let store = InMemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let group = tx.insert_group("group").await.unwrap();
        let alice = MemberHolder::User("alice".into());
        tx.insert_group_member(group.id, &alice).await.unwrap();
        assert!(tx.insert_group_member(group.id, &alice).await.is_err());

        let doc = tx.insert_resource("doc", Some("1")).await.unwrap();
        let folder = tx.insert_resource("folder", None).await.unwrap();
        tx.insert_grant_inheritance(doc.id, folder.id).await.unwrap();
        assert!(tx.insert_grant_inheritance(doc.id, folder.id).await.is_err());
        assert!(tx.insert_grant_inheritance(doc.id, doc.id).await.is_err());
    }
}
