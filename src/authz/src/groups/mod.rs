//! Persisted groups and the group membership graph
//!
//! Groups hold users directly and other groups as children. Child edges form
//! a directed acyclic graph: a group may have several parents, but never
//! reaches itself. A user is a member of a group if a path of child edges
//! leads from that group to a group listing the user directly.
//!
//! # Example
//!
//! ```rust
//! use bastion_authz::groups::GroupService;
//! use bastion_authz::store::InMemoryStore;
//! use bastion_authz::types::MemberHolder;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let groups = GroupService::new(Arc::new(InMemoryStore::new()));
//!
//! let staff = groups.create_group("staff").await?;
//! let editors = groups.create_group("editors").await?;
//! groups.add_group_member(staff.id, MemberHolder::ChildGroup(editors.id)).await?;
//! groups.add_group_member(editors.id, MemberHolder::User("carol".into())).await?;
//!
//! assert!(groups.is_user_member_of("carol", staff.id).await?);
//! # Ok(())
//! # }
//! ```

pub mod graph;
pub mod service;

pub use service::GroupService;
