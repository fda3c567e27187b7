//! Authorization configuration loading and validation
//!
//! ```toml
//! [[resource_classes]]
//! identifier = "doc"
//! manage_resource_collection_policy = "user.MAY_CREATE == true"
//!
//! [[dynamic_groups]]
//! identifier = "students"
//! is_current_user_group_member_expression = "user.IS_STUDENT == true"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::dynamic_groups::ExpressionEvaluator;
use crate::error::{AuthzError, Result};
use crate::types::MANAGE_COLLECTION_POLICY_PREFIX;

/// Complete authorization configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthorizationConfig {
    #[serde(default)]
    pub resource_classes: Vec<ResourceClassConfig>,

    #[serde(default)]
    pub dynamic_groups: Vec<DynamicGroupConfig>,
}

/// A resource class and its optional collection policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResourceClassConfig {
    pub identifier: String,

    /// Anyone satisfying this expression manages the class's collection resource
    #[serde(default)]
    pub manage_resource_collection_policy: Option<String>,
}

/// A dynamic group evaluated per request
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DynamicGroupConfig {
    pub identifier: String,
    pub is_current_user_group_member_expression: String,
}

impl AuthorizationConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthzError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Add a resource class
    pub fn with_resource_class(
        mut self,
        identifier: impl Into<String>,
        manage_resource_collection_policy: Option<&str>,
    ) -> Self {
        self.resource_classes.push(ResourceClassConfig {
            identifier: identifier.into(),
            manage_resource_collection_policy: manage_resource_collection_policy.map(str::to_string),
        });
        self
    }

    /// Add a dynamic group
    pub fn with_dynamic_group(
        mut self,
        identifier: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        self.dynamic_groups.push(DynamicGroupConfig {
            identifier: identifier.into(),
            is_current_user_group_member_expression: expression.into(),
        });
        self
    }

    /// Resource classes that declare a collection policy, with their expression
    pub fn collection_policies(&self) -> impl Iterator<Item = (&str, &str)> {
        self.resource_classes.iter().filter_map(|class| {
            class
                .manage_resource_collection_policy
                .as_deref()
                .map(|policy| (class.identifier.as_str(), policy))
        })
    }

    /// Validate identifiers and compile every expression
    pub fn validate(&self, evaluator: &dyn ExpressionEvaluator) -> Result<()> {
        let mut classes = HashSet::new();
        for class in &self.resource_classes {
            if class.identifier.is_empty() {
                return Err(AuthzError::InvalidConfig(
                    "resource class identifier cannot be empty".to_string(),
                ));
            }
            if !classes.insert(class.identifier.as_str()) {
                return Err(AuthzError::InvalidConfig(format!(
                    "duplicate resource class '{}'",
                    class.identifier
                )));
            }
            if let Some(policy) = &class.manage_resource_collection_policy {
                evaluator.validate(policy).map_err(|e| {
                    AuthzError::InvalidConfig(format!(
                        "manage_resource_collection_policy of '{}': {}",
                        class.identifier, e
                    ))
                })?;
            }
        }

        let mut groups = HashSet::new();
        for group in &self.dynamic_groups {
            if group.identifier.is_empty() {
                return Err(AuthzError::InvalidConfig(
                    "dynamic group identifier cannot be empty".to_string(),
                ));
            }
            if group.identifier.starts_with(MANAGE_COLLECTION_POLICY_PREFIX) {
                return Err(AuthzError::InvalidConfig(format!(
                    "dynamic group '{}' uses the reserved prefix '{}'",
                    group.identifier, MANAGE_COLLECTION_POLICY_PREFIX
                )));
            }
            if !groups.insert(group.identifier.as_str()) {
                return Err(AuthzError::InvalidConfig(format!(
                    "duplicate dynamic group '{}'",
                    group.identifier
                )));
            }
            evaluator
                .validate(&group.is_current_user_group_member_expression)
                .map_err(|e| {
                    AuthzError::InvalidConfig(format!(
                        "is_current_user_group_member_expression of '{}': {}",
                        group.identifier, e
                    ))
                })?;
        }

        Ok(())
    }
}
