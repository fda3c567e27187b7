//! Core authorization types

use crate::error::{AuthzError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Authorization resource identifier (creation ordered)
pub type ResourceId = i64;

/// Resource action grant identifier
pub type GrantId = i64;

/// Group identifier
pub type GroupId = i64;

/// Group member (edge) identifier
pub type GroupMemberId = i64;

/// Grant inheritance edge identifier
pub type GrantInheritanceId = i64;

/// Attribute map of the current user, as supplied by the authentication layer
pub type UserAttributes = HashMap<String, Value>;

/// The action implying every action available for a resource
pub const MANAGE_ACTION: &str = "manage";

/// Prefix of the dynamic groups derived from manage-resource-collection policies
pub const MANAGE_COLLECTION_POLICY_PREFIX: &str = "manage_resource_collection:";

/// Dynamic group identifier holding the collection policy grant of `resource_class`
pub fn manage_collection_policy_group(resource_class: &str) -> String {
    format!("{}{}", MANAGE_COLLECTION_POLICY_PREFIX, resource_class)
}

/// A protected resource
///
/// `resource_identifier == None` denotes the collection resource of the class,
/// which carries create/list-type actions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AuthorizationResource {
    pub id: ResourceId,
    pub resource_class: String,
    #[serde(default)]
    pub resource_identifier: Option<String>,
}

impl AuthorizationResource {
    /// Whether this is the collection resource of its class
    pub fn is_collection(&self) -> bool {
        self.resource_identifier.is_none()
    }
}

/// Holder of a grant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum GrantHolder {
    /// A single user
    User(String),
    /// A persisted group (and transitively its members)
    Group(GroupId),
    /// A configuration-declared dynamic group
    DynamicGroup(String),
}

impl GrantHolder {
    /// Build a holder from nullable sibling fields, requiring exactly one
    pub fn from_parts(
        user_identifier: Option<String>,
        group: Option<GroupId>,
        dynamic_group_identifier: Option<String>,
    ) -> Result<Self> {
        let holder = match (user_identifier, group, dynamic_group_identifier) {
            (Some(user), None, None) => GrantHolder::User(user),
            (None, Some(group), None) => GrantHolder::Group(group),
            (None, None, Some(dynamic)) => GrantHolder::DynamicGroup(dynamic),
            _ => {
                return Err(AuthzError::GrantInvalid(
                    "exactly one of user identifier, group or dynamic group identifier must be set"
                        .to_string(),
                ))
            }
        };
        holder.validate()?;
        Ok(holder)
    }

    /// Reject empty identifiers
    pub fn validate(&self) -> Result<()> {
        match self {
            GrantHolder::User(user) if user.is_empty() => Err(AuthzError::GrantInvalid(
                "holder user identifier cannot be empty".to_string(),
            )),
            GrantHolder::DynamicGroup(id) if id.is_empty() => Err(AuthzError::GrantInvalid(
                "holder dynamic group identifier cannot be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A `(resource, action, holder)` triple
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceActionGrant {
    pub id: GrantId,
    pub resource: AuthorizationResource,
    pub action: String,
    pub holder: GrantHolder,
}

impl ResourceActionGrant {
    /// Whether this grant carries the manage action
    pub fn is_manage(&self) -> bool {
        self.action == MANAGE_ACTION
    }
}

/// A persisted group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// Member side of a group membership edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum MemberHolder {
    User(String),
    ChildGroup(GroupId),
}

impl MemberHolder {
    /// Build a member holder from nullable sibling fields, requiring exactly one
    pub fn from_parts(user_identifier: Option<String>, child_group: Option<GroupId>) -> Result<Self> {
        match (user_identifier, child_group) {
            (Some(user), None) if !user.is_empty() => Ok(MemberHolder::User(user)),
            (Some(_), None) => Err(AuthzError::GroupMemberInvalid(
                "member user identifier cannot be empty".to_string(),
            )),
            (None, Some(group)) => Ok(MemberHolder::ChildGroup(group)),
            _ => Err(AuthzError::GroupMemberInvalid(
                "exactly one of user identifier or child group must be set".to_string(),
            )),
        }
    }
}

/// Membership edge `group -> holder`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMember {
    pub id: GroupMemberId,
    pub group: GroupId,
    pub holder: MemberHolder,
}

/// Directed visibility edge: any grant on `source` reveals `target`'s class catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantInheritance {
    pub id: GrantInheritanceId,
    pub source: ResourceId,
    pub target: ResourceId,
}

/// Filter over the resource identifier column
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum IdentifierFilter {
    /// No restriction
    #[default]
    Any,
    /// Collection resources only (`IS NULL`)
    Collection,
    /// Item resources only (`IS NOT NULL`)
    Items,
    /// Exactly this identifier, `None` meaning the collection resource
    Exact(Option<String>),
}

impl IdentifierFilter {
    /// Check a resource identifier against this filter
    pub fn matches(&self, identifier: Option<&str>) -> bool {
        match self {
            IdentifierFilter::Any => true,
            IdentifierFilter::Collection => identifier.is_none(),
            IdentifierFilter::Items => identifier.is_some(),
            IdentifierFilter::Exact(expected) => expected.as_deref() == identifier,
        }
    }
}

/// Holder filter: a grant matches if ANY of the listed holders holds it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolderFilter {
    pub user_identifier: Option<String>,
    pub group_ids: Vec<GroupId>,
    pub dynamic_group_identifiers: Vec<String>,
}

impl HolderFilter {
    /// Check a holder against this filter
    pub fn matches(&self, holder: &GrantHolder) -> bool {
        match holder {
            GrantHolder::User(user) => self.user_identifier.as_deref() == Some(user.as_str()),
            GrantHolder::Group(group) => self.group_ids.contains(group),
            GrantHolder::DynamicGroup(id) => self.dynamic_group_identifiers.contains(id),
        }
    }

    /// A filter no grant can match
    pub fn is_empty(&self) -> bool {
        self.user_identifier.is_none()
            && self.group_ids.is_empty()
            && self.dynamic_group_identifiers.is_empty()
    }
}

/// Offset/limit pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
}

impl Pagination {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit }
    }

    /// Everything in a single page
    pub fn all() -> Self {
        Self {
            offset: 0,
            limit: usize::MAX,
        }
    }

    /// Build a pagination from a 1-based page number and page size
    pub fn page(page: usize, per_page: usize) -> Self {
        Self {
            offset: page.saturating_sub(1).saturating_mul(per_page),
            limit: per_page,
        }
    }

    /// Apply this pagination to an ordered iterator
    pub fn apply<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit).collect()
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::all()
    }
}

/// Grant lookup parameters
#[derive(Debug, Clone, Default)]
pub struct GrantQuery {
    pub resource_class: Option<String>,
    pub resource_identifier: IdentifierFilter,
    pub resource_ids: Option<Vec<ResourceId>>,
    pub actions: Option<Vec<String>>,
    pub holders: Option<HolderFilter>,
    pub page: Pagination,
}

impl GrantQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_class(mut self, resource_class: impl Into<String>) -> Self {
        self.resource_class = Some(resource_class.into());
        self
    }

    pub fn with_identifier(mut self, filter: IdentifierFilter) -> Self {
        self.resource_identifier = filter;
        self
    }

    pub fn for_resources(mut self, resource_ids: Vec<ResourceId>) -> Self {
        self.resource_ids = Some(resource_ids);
        self
    }

    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.actions = Some(actions);
        self
    }

    pub fn held_by(mut self, holders: HolderFilter) -> Self {
        self.holders = Some(holders);
        self
    }

    pub fn with_page(mut self, page: Pagination) -> Self {
        self.page = page;
        self
    }

    /// Check a grant against everything but the pagination
    pub fn matches(&self, grant: &ResourceActionGrant) -> bool {
        self.resource_class
            .as_deref()
            .map_or(true, |class| grant.resource.resource_class == class)
            && self
                .resource_identifier
                .matches(grant.resource.resource_identifier.as_deref())
            && self
                .resource_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&grant.resource.id))
            && self
                .actions
                .as_ref()
                .map_or(true, |actions| actions.contains(&grant.action))
            && self
                .holders
                .as_ref()
                .map_or(true, |holders| holders.matches(&grant.holder))
    }
}

/// Resource lookup parameters
#[derive(Debug, Clone, Default)]
pub struct ResourceFilter {
    pub resource_class: Option<String>,
    pub resource_identifier: IdentifierFilter,
    pub resource_ids: Option<Vec<ResourceId>>,
}

impl ResourceFilter {
    pub fn matches(&self, resource: &AuthorizationResource) -> bool {
        self.resource_class
            .as_deref()
            .map_or(true, |class| resource.resource_class == class)
            && self
                .resource_identifier
                .matches(resource.resource_identifier.as_deref())
            && self
                .resource_ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&resource.id))
    }
}

/// The user a resolution session acts for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// `None` for anonymous or system callers
    #[serde(default)]
    pub identifier: Option<String>,

    /// Attributes consumed by dynamic group expressions
    #[serde(default)]
    pub attributes: UserAttributes,
}

impl CurrentUser {
    /// Create a user from an identifier
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            attributes: HashMap::new(),
        }
    }

    /// A user without identifier; only dynamic groups can match
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Add an attribute to the user
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grant_holder_exactly_one() {
        assert_eq!(
            GrantHolder::from_parts(Some("alice".into()), None, None).unwrap(),
            GrantHolder::User("alice".into())
        );
        assert_eq!(
            GrantHolder::from_parts(None, Some(7), None).unwrap(),
            GrantHolder::Group(7)
        );

        assert!(matches!(
            GrantHolder::from_parts(None, None, None),
            Err(AuthzError::GrantInvalid(_))
        ));
        assert!(matches!(
            GrantHolder::from_parts(Some("alice".into()), Some(7), None),
            Err(AuthzError::GrantInvalid(_))
        ));
        assert!(matches!(
            GrantHolder::from_parts(None, None, Some(String::new())),
            Err(AuthzError::GrantInvalid(_))
        ));
    }

    #[test]
    fn test_member_holder_exactly_one() {
        assert_eq!(
            MemberHolder::from_parts(None, Some(3)).unwrap(),
            MemberHolder::ChildGroup(3)
        );
        assert!(matches!(
            MemberHolder::from_parts(Some("bob".into()), Some(3)),
            Err(AuthzError::GroupMemberInvalid(_))
        ));
        assert!(matches!(
            MemberHolder::from_parts(None, None),
            Err(AuthzError::GroupMemberInvalid(_))
        ));
    }

    #[test]
    fn test_identifier_filter() {
        assert!(IdentifierFilter::Any.matches(None));
        assert!(IdentifierFilter::Collection.matches(None));
        assert!(!IdentifierFilter::Collection.matches(Some("1")));
        assert!(IdentifierFilter::Items.matches(Some("1")));
        assert!(IdentifierFilter::Exact(Some("1".into())).matches(Some("1")));
        assert!(!IdentifierFilter::Exact(None).matches(Some("1")));
    }

    #[test]
    fn test_pagination() {
        let items = vec![1, 2, 3, 4, 5];
        assert_eq!(Pagination::new(1, 2).apply(items.clone()), vec![2, 3]);
        assert_eq!(Pagination::page(3, 2).apply(items.clone()), vec![5]);
        assert_eq!(Pagination::all().apply(items), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_holder_serialization() {
        let json = serde_json::to_value(GrantHolder::DynamicGroup("students".into())).unwrap();
        assert_eq!(json, serde_json::json!({"type": "dynamic_group", "id": "students"}));
    }

    #[test]
    fn test_collection_policy_group_name() {
        assert_eq!(
            manage_collection_policy_group("doc"),
            "manage_resource_collection:doc"
        );
    }
}
