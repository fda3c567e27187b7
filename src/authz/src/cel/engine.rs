//! CEL expression engine with compiled program caching

use cel_interpreter::objects::Value as CelValue;
use cel_interpreter::{Context, Program};
use dashmap::DashMap;
use std::sync::Arc;

use crate::cel::{
    context::EvalContext,
    convert::json_to_cel,
    error::{CelError, Result},
};
use crate::dynamic_groups::ExpressionEvaluator;
use crate::types::UserAttributes;

/// CEL engine for compiling and evaluating expressions
pub struct Engine {
    /// Compiled program cache (thread-safe)
    program_cache: Arc<DashMap<String, Arc<Program>>>,
}

impl Engine {
    /// Create a new CEL engine
    pub fn new() -> Self {
        Self {
            program_cache: Arc::new(DashMap::new()),
        }
    }

    /// Compile a CEL expression and cache the result
    ///
    /// # Errors
    /// Returns error if expression cannot be compiled
    pub fn compile(&self, expr: &str) -> Result<Arc<Program>> {
        if let Some(prog) = self.program_cache.get(expr) {
            return Ok(prog.clone());
        }

        let program = Program::compile(expr)
            .map_err(|e| CelError::CompilationError(format!("{:?}", e)))?;

        let arc_program = Arc::new(program);
        self.program_cache.insert(expr.to_string(), arc_program.clone());

        Ok(arc_program)
    }

    /// Evaluate a compiled program with the given context
    ///
    /// # Errors
    /// Returns error if evaluation fails or result is not boolean
    pub fn evaluate(&self, program: &Program, ctx: &EvalContext) -> Result<bool> {
        let mut cel_context = Context::default();

        for (key, value) in ctx.to_variables() {
            cel_context.add_variable_from_value(key, json_to_cel(&value));
        }

        let result = program
            .execute(&cel_context)
            .map_err(|e| CelError::EvaluationError(format!("{:?}", e)))?;

        Self::to_bool(&result)
    }

    /// Compile and evaluate an expression in one call
    pub fn evaluate_expression(&self, expr: &str, ctx: &EvalContext) -> Result<bool> {
        let program = self.compile(expr)?;
        self.evaluate(&program, ctx)
    }

    /// Clear the compiled program cache
    pub fn clear_cache(&self) {
        self.program_cache.clear();
    }

    /// Get cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            size: self.program_cache.len(),
        }
    }

    fn to_bool(value: &CelValue) -> Result<bool> {
        match value {
            CelValue::Bool(b) => Ok(*b),
            _ => Err(CelError::NonBooleanResult),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionEvaluator for Engine {
    fn evaluate(
        &self,
        expression: &str,
        user_identifier: Option<&str>,
        attributes: &UserAttributes,
    ) -> crate::error::Result<bool> {
        let mut ctx = EvalContext::new().with_attributes(attributes.clone());
        if let Some(identifier) = user_identifier {
            ctx = ctx.with_identifier(identifier);
        }
        Ok(self.evaluate_expression(expression, &ctx)?)
    }

    fn validate(&self, expression: &str) -> crate::error::Result<()> {
        self.compile(expression)?;
        Ok(())
    }
}

/// Cache statistics
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Number of cached programs
    pub size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CurrentUser;

    fn student() -> EvalContext {
        EvalContext::for_user(
            &CurrentUser::new("alice")
                .with_attribute("IS_STUDENT", true)
                .with_attribute("MAY_CREATE", false)
                .with_attribute("faculty", "physics"),
        )
    }

    #[test]
    fn test_engine_creation() {
        let engine = Engine::new();
        assert_eq!(engine.cache_stats().size, 0);
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Engine>();
    }

    #[test]
    fn test_simple_expression() {
        let engine = Engine::new();
        let ctx = student();

        assert!(engine.evaluate_expression("true", &ctx).unwrap());
        assert!(!engine.evaluate_expression("false", &ctx).unwrap());
    }

    #[test]
    fn test_user_attribute_access() {
        let engine = Engine::new();
        let ctx = student();

        assert!(engine.evaluate_expression("user.IS_STUDENT", &ctx).unwrap());
        assert!(!engine.evaluate_expression("user.MAY_CREATE == true", &ctx).unwrap());
        assert!(engine
            .evaluate_expression("user.faculty == 'physics' && user_identifier == 'alice'", &ctx)
            .unwrap());
    }

    #[test]
    fn test_missing_attribute_is_error() {
        let engine = Engine::new();
        let result = engine.evaluate_expression("user.IS_EMPLOYEE", &student());
        assert!(matches!(result, Err(CelError::EvaluationError(_))));
    }

    #[test]
    fn test_program_caching() {
        let engine = Engine::new();
        let ctx = student();

        let _ = engine.evaluate_expression("true", &ctx).unwrap();
        assert_eq!(engine.cache_stats().size, 1);

        let _ = engine.evaluate_expression("true", &ctx).unwrap();
        assert_eq!(engine.cache_stats().size, 1);

        let _ = engine.evaluate_expression("false", &ctx).unwrap();
        assert_eq!(engine.cache_stats().size, 2);

        engine.clear_cache();
        assert_eq!(engine.cache_stats().size, 0);
    }

    #[test]
    fn test_compilation_error() {
        let engine = Engine::new();

        let result = engine.compile("invalid syntax @#$");
        assert!(matches!(result, Err(CelError::CompilationError(_))));
    }

    #[test]
    fn test_non_boolean_result() {
        let engine = Engine::new();

        let result = engine.evaluate_expression("'hello'", &student());
        assert!(matches!(result, Err(CelError::NonBooleanResult)));
    }

    #[test]
    fn test_expression_evaluator_contract() {
        let engine = Engine::new();
        let user = CurrentUser::new("bob").with_attribute("IS_STUDENT", true);

        assert!(ExpressionEvaluator::evaluate(
            &engine,
            "user.IS_STUDENT",
            user.identifier.as_deref(),
            &user.attributes
        )
        .unwrap());
        assert!(engine.validate("user.IS_STUDENT == true").is_ok());
        assert!(engine.validate("user.").is_err());
    }
}
