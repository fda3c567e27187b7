//! Dynamic group evaluation
//!
//! Dynamic groups are declared in configuration and never persisted. Membership
//! is computed per request by evaluating a boolean expression against the
//! current user's attributes. Every configured collection policy contributes one
//! more dynamic group, `manage_resource_collection:<class>`, which holds the
//! derived manage grant on the class's collection resource.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AuthorizationConfig;
use crate::error::Result;
use crate::types::{manage_collection_policy_group, CurrentUser, UserAttributes};

/// Boolean predicate contract for membership expressions
///
/// The expression syntax belongs to the implementation; the default is the CEL
/// [`Engine`](crate::cel::Engine).
pub trait ExpressionEvaluator: Send + Sync {
    /// Evaluate `expression` for a user
    fn evaluate(
        &self,
        expression: &str,
        user_identifier: Option<&str>,
        attributes: &UserAttributes,
    ) -> Result<bool>;

    /// Check that `expression` compiles
    fn validate(&self, expression: &str) -> Result<()>;
}

/// A configured dynamic group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicGroup {
    pub identifier: String,
    pub expression: String,
}

/// Evaluates dynamic group membership in declaration order
pub struct DynamicGroupEvaluator {
    groups: Vec<DynamicGroup>,
    evaluator: Arc<dyn ExpressionEvaluator>,
}

impl DynamicGroupEvaluator {
    /// Create an evaluator over explicit groups
    pub fn new(groups: Vec<DynamicGroup>, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self { groups, evaluator }
    }

    /// Build from configuration: declared groups first, then collection policies
    pub fn from_config(
        config: &AuthorizationConfig,
        evaluator: Arc<dyn ExpressionEvaluator>,
    ) -> Result<Self> {
        config.validate(evaluator.as_ref())?;

        let declared = config.dynamic_groups.iter().map(|group| DynamicGroup {
            identifier: group.identifier.clone(),
            expression: group.is_current_user_group_member_expression.clone(),
        });
        let policies = config
            .collection_policies()
            .map(|(class, policy)| DynamicGroup {
                identifier: manage_collection_policy_group(class),
                expression: policy.to_string(),
            });

        Ok(Self::new(declared.chain(policies).collect(), evaluator))
    }

    /// Identifiers of all known dynamic groups, in declaration order
    pub fn identifiers(&self) -> Vec<String> {
        self.groups.iter().map(|g| g.identifier.clone()).collect()
    }

    /// Whether `user` belongs to the dynamic group `identifier`
    ///
    /// Unknown groups and failing expressions yield `false`.
    pub fn is_member_of_dynamic_group(&self, identifier: &str, user: &CurrentUser) -> bool {
        self.groups
            .iter()
            .find(|g| g.identifier == identifier)
            .map_or(false, |group| self.evaluate(group, user))
    }

    /// All dynamic groups `user` belongs to, in declaration order
    pub fn members_of(&self, user: &CurrentUser) -> Vec<String> {
        let groups: Vec<String> = self
            .groups
            .iter()
            .filter(|group| self.evaluate(group, user))
            .map(|group| group.identifier.clone())
            .collect();

        debug!(
            "User {:?} is member of dynamic groups {:?}",
            user.identifier, groups
        );
        groups
    }

    fn evaluate(&self, group: &DynamicGroup, user: &CurrentUser) -> bool {
        match self
            .evaluator
            .evaluate(&group.expression, user.identifier.as_deref(), &user.attributes)
        {
            Ok(result) => result,
            Err(e) => {
                warn!(
                    "Dynamic group '{}' expression failed, treating as non-member: {}",
                    group.identifier, e
                );
                false
            }
        }
    }
}

impl std::fmt::Debug for DynamicGroupEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicGroupEvaluator")
            .field("groups", &self.groups)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cel::Engine;

    fn evaluator() -> DynamicGroupEvaluator {
        let config = AuthorizationConfig::default()
            .with_resource_class("doc", Some("user.MAY_CREATE == true"))
            .with_dynamic_group("students", "user.IS_STUDENT == true")
            .with_dynamic_group("everyone", "true")
            .with_dynamic_group("employees", "user.IS_EMPLOYEE == true");

        DynamicGroupEvaluator::from_config(&config, Arc::new(Engine::new())).unwrap()
    }

    #[test]
    fn test_declaration_order() {
        assert_eq!(
            evaluator().identifiers(),
            vec![
                "students".to_string(),
                "everyone".to_string(),
                "employees".to_string(),
                "manage_resource_collection:doc".to_string(),
            ]
        );
    }

    #[test]
    fn test_members_of() {
        let user = CurrentUser::new("alice")
            .with_attribute("IS_STUDENT", true)
            .with_attribute("IS_EMPLOYEE", false)
            .with_attribute("MAY_CREATE", true);

        assert_eq!(
            evaluator().members_of(&user),
            vec![
                "students".to_string(),
                "everyone".to_string(),
                "manage_resource_collection:doc".to_string(),
            ]
        );
    }

    #[test]
    fn test_failing_expression_is_not_membership() {
        // IS_EMPLOYEE and MAY_CREATE are missing: evaluation errors, not panics
        let user = CurrentUser::new("bob").with_attribute("IS_STUDENT", false);
        let groups = evaluator();

        assert_eq!(groups.members_of(&user), vec!["everyone".to_string()]);
        assert!(!groups.is_member_of_dynamic_group("employees", &user));
    }

    #[test]
    fn test_unknown_group() {
        assert!(!evaluator().is_member_of_dynamic_group("nope", &CurrentUser::new("alice")));
    }
}
