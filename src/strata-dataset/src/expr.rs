//! Predicate expression tree.
//!
//! Filters arrive from callers as a small tagged-variant tree (literal,
//! column reference, comparison, boolean combinator) and are interpreted by
//! [`crate::eval::ExprEvaluator`] against Arrow batches. Three-valued logic
//! applies throughout: a comparison involving null is null, and null is never
//! treated as true by a filter.

use std::collections::BTreeSet;
use std::fmt;

use arrow::datatypes::Schema;
use serde::{Deserialize, Serialize};

use common_error::{StrataError, StrataResult};

// ============================================================================
// Values
// ============================================================================

/// A literal scalar in an expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// SQL-style null.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// 64-bit integer literal; compared against narrower integer columns via
    /// implicit cast.
    Int64(i64),
    /// 64-bit float literal.
    Float64(f64),
    /// String literal.
    Utf8(String),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "'{v}'"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Utf8(v)
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Binary operators for predicate expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    /// Equality (=)
    Eq,
    /// Inequality (<>)
    NotEq,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    LtEq,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    GtEq,
    /// Logical AND (Kleene)
    And,
    /// Logical OR (Kleene)
    Or,
}

impl BinaryOp {
    /// Check if this is a comparison operator.
    pub const fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::NotEq | Self::Lt | Self::LtEq | Self::Gt | Self::GtEq
        )
    }

    /// Check if this is a logical combinator.
    pub const fn is_logical(&self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::LtEq => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::GtEq => write!(f, ">="),
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// Unary operators for predicate expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Logical NOT.
    Not,
    /// Is null check.
    IsNull,
    /// Is not null check.
    IsNotNull,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not => write!(f, "NOT"),
            Self::IsNull => write!(f, "IS NULL"),
            Self::IsNotNull => write!(f, "IS NOT NULL"),
        }
    }
}

// ============================================================================
// Expression
// ============================================================================

/// A predicate expression over dataset columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Column reference by name.
    Column(String),
    /// Literal value.
    Literal(Value),
    /// Binary operation.
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    /// Unary operation.
    Unary { op: UnaryOp, expr: Box<Expr> },
}

/// Create a column reference expression.
pub fn col(name: impl Into<String>) -> Expr {
    Expr::Column(name.into())
}

/// Create a literal expression.
pub fn lit(value: impl Into<Value>) -> Expr {
    Expr::Literal(value.into())
}

impl Expr {
    fn binary(self, op: BinaryOp, right: Self) -> Self {
        Self::Binary {
            left: Box::new(self),
            op,
            right: Box::new(right),
        }
    }

    /// `self = other`
    pub fn eq(self, other: Self) -> Self {
        self.binary(BinaryOp::Eq, other)
    }

    /// `self <> other`
    pub fn not_eq(self, other: Self) -> Self {
        self.binary(BinaryOp::NotEq, other)
    }

    /// `self < other`
    pub fn lt(self, other: Self) -> Self {
        self.binary(BinaryOp::Lt, other)
    }

    /// `self <= other`
    pub fn lt_eq(self, other: Self) -> Self {
        self.binary(BinaryOp::LtEq, other)
    }

    /// `self > other`
    pub fn gt(self, other: Self) -> Self {
        self.binary(BinaryOp::Gt, other)
    }

    /// `self >= other`
    pub fn gt_eq(self, other: Self) -> Self {
        self.binary(BinaryOp::GtEq, other)
    }

    /// `self AND other`
    pub fn and(self, other: Self) -> Self {
        self.binary(BinaryOp::And, other)
    }

    /// `self OR other`
    pub fn or(self, other: Self) -> Self {
        self.binary(BinaryOp::Or, other)
    }

    /// `NOT self`
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            expr: Box::new(self),
        }
    }

    /// `self IS NULL`
    pub fn is_null(self) -> Self {
        Self::Unary {
            op: UnaryOp::IsNull,
            expr: Box::new(self),
        }
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> Self {
        Self::Unary {
            op: UnaryOp::IsNotNull,
            expr: Box::new(self),
        }
    }

    /// All column names referenced anywhere in the expression.
    pub fn referenced_columns(&self) -> BTreeSet<&str> {
        let mut columns = BTreeSet::new();
        self.collect_columns(&mut columns);
        columns
    }

    fn collect_columns<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Self::Column(name) => {
                out.insert(name.as_str());
            }
            Self::Literal(_) => {}
            Self::Binary { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Self::Unary { expr, .. } => expr.collect_columns(out),
        }
    }

    /// Check that every referenced column exists in `schema`.
    pub fn validate(&self, schema: &Schema) -> StrataResult<()> {
        for name in self.referenced_columns() {
            if schema.index_of(name).is_err() {
                return Err(StrataError::invalid_filter_column(format!(
                    "filter references column '{name}' which is not in the schema"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Column(name) => write!(f, "{name}"),
            Self::Literal(value) => write!(f, "{value}"),
            Self::Binary { left, op, right } => write!(f, "({left} {op} {right})"),
            Self::Unary {
                op: UnaryOp::Not,
                expr,
            } => write!(f, "(NOT {expr})"),
            Self::Unary { op, expr } => write!(f, "({expr} {op})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{DataType, Field};

    #[test]
    fn test_builder_and_display() {
        let expr = col("id").gt(lit(2)).and(col("name").is_not_null());
        assert_eq!(expr.to_string(), "((id > 2) AND (name IS NOT NULL))");
    }

    #[test]
    fn test_referenced_columns() {
        let expr = col("a").eq(lit(1)).or(col("b").lt(col("a")));
        let columns = expr.referenced_columns();
        assert_eq!(columns.into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_validate() {
        let schema = Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]);

        assert!(col("id").gt(lit(0)).validate(&schema).is_ok());

        let err = col("missing").eq(lit(1)).validate(&schema).unwrap_err();
        assert!(matches!(err, StrataError::InvalidFilterColumn(_)));
    }

    #[test]
    fn test_serde_roundtrip() {
        let expr = col("id").gt_eq(lit(10)).and(col("flag").eq(lit(true)));
        let json = serde_json::to_string(&expr).unwrap();
        let back: Expr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
    }
}
