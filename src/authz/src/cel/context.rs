//! Evaluation context for CEL expressions

use serde_json::Value;
use std::collections::HashMap;

use crate::types::{CurrentUser, UserAttributes};

/// Variables visible to a membership expression
///
/// Expressions see the user's attributes as the `user` map and the identifier as
/// `user_identifier` (`null` for anonymous callers), e.g.
/// `user.IS_STUDENT == true && user_identifier != null`.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// User attributes
    pub user: UserAttributes,

    /// User identifier, if any
    pub user_identifier: Option<String>,
}

impl EvalContext {
    /// Create a new evaluation context
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the context for a session user
    pub fn for_user(user: &CurrentUser) -> Self {
        Self {
            user: user.attributes.clone(),
            user_identifier: user.identifier.clone(),
        }
    }

    /// Create context with user attributes
    pub fn with_attributes(mut self, attributes: UserAttributes) -> Self {
        self.user = attributes;
        self
    }

    /// Create context with a user identifier
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.user_identifier = Some(identifier.into());
        self
    }

    /// Get all variables as a flat map for CEL evaluation
    pub fn to_variables(&self) -> HashMap<String, Value> {
        let mut vars = HashMap::new();

        vars.insert(
            "user".to_string(),
            Value::Object(self.user.clone().into_iter().collect()),
        );
        vars.insert(
            "user_identifier".to_string(),
            self.user_identifier
                .clone()
                .map(Value::String)
                .unwrap_or(Value::Null),
        );

        vars
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eval_context_creation() {
        let ctx = EvalContext::new();
        assert!(ctx.user.is_empty());
        assert!(ctx.user_identifier.is_none());
    }

    #[test]
    fn test_to_variables() {
        let user = CurrentUser::new("alice").with_attribute("IS_STUDENT", true);
        let vars = EvalContext::for_user(&user).to_variables();

        assert_eq!(vars.get("user"), Some(&json!({"IS_STUDENT": true})));
        assert_eq!(vars.get("user_identifier"), Some(&json!("alice")));
    }

    #[test]
    fn test_anonymous_identifier_is_null() {
        let vars = EvalContext::new().to_variables();
        assert_eq!(vars.get("user_identifier"), Some(&Value::Null));
    }
}
