//! Job run condition model

use crate::core::expression::{ExpressionError, ExpressionScope, Expr};

/// A job's `if:` predicate, kept with its source for reporting
#[derive(Debug, Clone)]
pub struct Condition {
    pub source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            source: source.trim().to_string(),
            expr: Expr::parse(source)?,
        })
    }

    pub fn holds(&self, scope: &dyn ExpressionScope) -> bool {
        self.expr.evaluate(scope).truthy()
    }
}
