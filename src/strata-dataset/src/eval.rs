//! Predicate evaluation against Arrow batches.

use std::sync::Arc;

use arrow::array::{new_null_array, ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::compute::kernels::{boolean, cmp};
use arrow::compute::{cast, is_not_null, is_null};
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;

use common_error::{StrataError, StrataResult};

use crate::expr::{BinaryOp, Expr, UnaryOp, Value};

/// Interprets an [`Expr`] tree over a `RecordBatch` using Arrow compute
/// kernels.
///
/// Three-valued logic is preserved: comparisons involving null evaluate to
/// null, AND/OR use the Kleene kernels, and the filter kernel downstream
/// never selects a row whose mask slot is null.
#[derive(Debug, Default)]
pub struct ExprEvaluator;

impl ExprEvaluator {
    /// Create a new expression evaluator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Evaluate an expression against a batch, returning an Arrow array.
    pub fn evaluate(&self, expr: &Expr, batch: &RecordBatch) -> StrataResult<ArrayRef> {
        match expr {
            Expr::Literal(value) => Ok(Self::eval_literal(value, batch.num_rows())),
            Expr::Column(name) => Self::eval_column(name, batch),
            Expr::Binary { left, op, right } => self.eval_binary(left, *op, right, batch),
            Expr::Unary { op, expr } => self.eval_unary(*op, expr, batch),
        }
    }

    /// Evaluate a predicate expression, returning a `BooleanArray` mask.
    pub fn evaluate_predicate(
        &self,
        expr: &Expr,
        batch: &RecordBatch,
    ) -> StrataResult<BooleanArray> {
        let result = self.evaluate(expr, batch)?;

        // A bare NULL literal predicate selects nothing.
        if result.data_type() == &DataType::Null {
            return Ok(BooleanArray::from(vec![None; batch.num_rows()]));
        }

        result
            .as_any()
            .downcast_ref::<BooleanArray>()
            .cloned()
            .ok_or_else(|| {
                StrataError::internal(format!(
                    "predicate must evaluate to boolean, got {}",
                    result.data_type()
                ))
            })
    }

    fn eval_literal(value: &Value, num_rows: usize) -> ArrayRef {
        match value {
            Value::Null => new_null_array(&DataType::Null, num_rows),
            Value::Bool(v) => Arc::new(BooleanArray::from(vec![*v; num_rows])),
            Value::Int64(v) => Arc::new(Int64Array::from(vec![*v; num_rows])),
            Value::Float64(v) => Arc::new(Float64Array::from(vec![*v; num_rows])),
            Value::Utf8(v) => Arc::new(StringArray::from(vec![v.as_str(); num_rows])),
        }
    }

    fn eval_column(name: &str, batch: &RecordBatch) -> StrataResult<ArrayRef> {
        batch.column_by_name(name).cloned().ok_or_else(|| {
            StrataError::invalid_filter_column(format!(
                "filter references column '{name}' which is not in the schema"
            ))
        })
    }

    fn eval_binary(
        &self,
        left: &Expr,
        op: BinaryOp,
        right: &Expr,
        batch: &RecordBatch,
    ) -> StrataResult<ArrayRef> {
        let left_arr = self.evaluate(left, batch)?;
        let right_arr = self.evaluate(right, batch)?;

        if op.is_comparison() {
            let (left_arr, right_arr) = coerce(left_arr, right_arr)?;
            let result = match op {
                BinaryOp::Eq => cmp::eq(&left_arr, &right_arr),
                BinaryOp::NotEq => cmp::neq(&left_arr, &right_arr),
                BinaryOp::Lt => cmp::lt(&left_arr, &right_arr),
                BinaryOp::LtEq => cmp::lt_eq(&left_arr, &right_arr),
                BinaryOp::Gt => cmp::gt(&left_arr, &right_arr),
                BinaryOp::GtEq => cmp::gt_eq(&left_arr, &right_arr),
                BinaryOp::And | BinaryOp::Or => unreachable!("handled below"),
            }?;
            return Ok(Arc::new(result));
        }

        let left_bool = as_boolean(&left_arr)?;
        let right_bool = as_boolean(&right_arr)?;
        let result = match op {
            BinaryOp::And => boolean::and_kleene(&left_bool, &right_bool)?,
            BinaryOp::Or => boolean::or_kleene(&left_bool, &right_bool)?,
            other => {
                return Err(StrataError::internal(format!(
                    "operator {other} is neither comparison nor logical"
                )));
            }
        };
        Ok(Arc::new(result))
    }

    fn eval_unary(&self, op: UnaryOp, expr: &Expr, batch: &RecordBatch) -> StrataResult<ArrayRef> {
        let arr = self.evaluate(expr, batch)?;
        match op {
            UnaryOp::Not => {
                let arr = as_boolean(&arr)?;
                Ok(Arc::new(boolean::not(&arr)?))
            }
            UnaryOp::IsNull => Ok(Arc::new(is_null(&arr)?)),
            UnaryOp::IsNotNull => Ok(Arc::new(is_not_null(&arr)?)),
        }
    }
}

/// Bring both comparison operands to a common type.
///
/// Literal sides arrive as `Int64`/`Float64`/`Utf8`/`Null` regardless of the
/// column type. Mismatched numerics widen to the larger type so a literal
/// outside the column type's range still compares correctly; a null literal
/// casts to the other side's type, producing an all-null comparison.
fn coerce(left: ArrayRef, right: ArrayRef) -> StrataResult<(ArrayRef, ArrayRef)> {
    if left.data_type() == right.data_type() {
        return Ok((left, right));
    }
    if left.data_type() == &DataType::Null {
        let casted = cast(&left, right.data_type())?;
        return Ok((casted, right));
    }
    if right.data_type() == &DataType::Null {
        let casted = cast(&right, left.data_type())?;
        return Ok((left, casted));
    }

    let target = match (is_float(left.data_type()), is_float(right.data_type())) {
        _ if !is_numeric(left.data_type()) || !is_numeric(right.data_type()) => {
            // Non-numeric mismatch: cast the right side over.
            left.data_type().clone()
        }
        (false, false) => DataType::Int64,
        _ => DataType::Float64,
    };
    let left = if left.data_type() == &target {
        left
    } else {
        cast(&left, &target)?
    };
    let right = if right.data_type() == &target {
        right
    } else {
        cast(&right, &target)?
    };
    Ok((left, right))
}

fn is_numeric(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32 | DataType::Int64 | DataType::Float32 | DataType::Float64
    )
}

fn is_float(data_type: &DataType) -> bool {
    matches!(data_type, DataType::Float32 | DataType::Float64)
}

/// View an array as booleans, treating a `Null`-typed array as all-null
/// booleans.
fn as_boolean(arr: &ArrayRef) -> StrataResult<BooleanArray> {
    if arr.data_type() == &DataType::Null {
        let casted = cast(arr, &DataType::Boolean)?;
        return as_boolean(&casted);
    }
    arr.as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| {
            StrataError::internal(format!(
                "logical operand must be boolean, got {}",
                arr.data_type()
            ))
        })
}
