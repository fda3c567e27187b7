//! # Bastion Authorization
//!
//! Resource-level authorization: who may perform which action on which
//! resource, resolved from direct grants, nested groups, dynamic groups and
//! configuration-declared collection policies.
//!
//! ## Features
//!
//! - **Grant store** over pluggable backends (in-memory, PostgreSQL)
//! - **Group graph** with transitive membership and cycle-safe edges
//! - **Dynamic groups** evaluated per request with CEL expressions
//! - **Manage expansion** to the registered action catalog of a class
//! - **Collection-policy reconciliation** at startup and on reconfiguration
//! - **Request-scoped caching** of the current user's memberships
//!
//! ## Example
//!
//! ```rust
//! use bastion_authz::{
//!     ActionRegistry, AuthorizationConfig, AuthorizationEngine, AvailableAction, CurrentUser,
//!     GrantHolder, InMemoryStore,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Arc::new(ActionRegistry::new());
//!     registry.register("doc", vec![AvailableAction::new("read")], vec![]);
//!
//!     let config = AuthorizationConfig::default()
//!         .with_resource_class("doc", Some("user.MAY_CREATE == true"));
//!     let engine =
//!         AuthorizationEngine::with_cel(Arc::new(InMemoryStore::new()), registry, config).await?;
//!
//!     engine
//!         .grants()
//!         .add_grant("doc", Some("42"), "read", GrantHolder::User("bob".into()))
//!         .await?;
//!
//!     let mut session = engine.session(CurrentUser::new("bob")).await;
//!     assert!(session.is_authorized_for("doc", Some("42"), "read").await?);
//!
//!     Ok(())
//! }
//! ```

pub mod cel;
pub mod config;
pub mod dynamic_groups;
pub mod engine;
pub mod error;
pub mod grants;
pub mod groups;
pub mod reconcile;
pub mod registry;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::{AuthorizationConfig, DynamicGroupConfig, ResourceClassConfig};
pub use dynamic_groups::{DynamicGroupEvaluator, ExpressionEvaluator};
pub use engine::{AuthorizationEngine, ReadableResource, ResolutionSession, ResourceActions};
pub use error::{AuthzError, Result};
pub use grants::GrantService;
pub use groups::GroupService;
pub use reconcile::{CollectionPolicyReconciler, ReconcileReport};
pub use registry::{ActionRegistry, AvailableAction, ResourceClassActions};
pub use store::{AuthorizationStore, InMemoryStore, StoreTransaction};
#[cfg(feature = "postgres")]
pub use store::PostgresStore;
pub use types::{
    AuthorizationResource, CurrentUser, GrantHolder, GrantQuery, Group, GroupMember,
    IdentifierFilter, MemberHolder, Pagination, ResourceActionGrant,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
