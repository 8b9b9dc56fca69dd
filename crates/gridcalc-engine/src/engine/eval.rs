//! Tree-walking evaluation of an [`Expr`] against a grid snapshot.
//!
//! Every cell or range reference encountered is reported to a
//! [`DependencySink`] (normally the [`DependencyGraph`]) as a side effect.

use std::cmp::Ordering;

use thiserror::Error;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::cell::{Grid, read_cell};
use super::cell_ref::CellRef;
use super::graph::DependencyGraph;
use super::value::{ErrorValue, Value};
use crate::registry::{FunctionContext, FunctionRegistry, RegistryError};

/// Largest range the evaluator will materialize.
pub const MAX_RANGE_CELLS: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("operand is an error value: {0}")]
    ErrorOperand(ErrorValue),

    #[error("cannot apply '{op}' to non-numeric operands")]
    NonNumeric { op: BinaryOp },

    #[error("range {start}:{end} is too large")]
    RangeTooLarge { start: CellRef, end: CellRef },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Receives `cell depends-on reference` edges discovered during evaluation.
pub trait DependencySink {
    fn register(&mut self, cell: CellRef, depends_on: CellRef);
}

impl DependencySink for DependencyGraph {
    fn register(&mut self, cell: CellRef, depends_on: CellRef) {
        self.add_dependency(cell, depends_on);
    }
}

/// Discards edges; used for one-off evaluations that belong to no cell.
impl DependencySink for () {
    fn register(&mut self, _cell: CellRef, _depends_on: CellRef) {}
}

pub struct Evaluator<'a, S: DependencySink + ?Sized> {
    registry: &'a FunctionRegistry,
    grid: &'a Grid,
    sink: &'a mut S,
    current: Option<CellRef>,
}

impl<'a, S: DependencySink + ?Sized> Evaluator<'a, S> {
    pub fn new(registry: &'a FunctionRegistry, grid: &'a Grid, sink: &'a mut S) -> Self {
        Evaluator {
            registry,
            grid,
            sink,
            current: None,
        }
    }

    /// Evaluate on behalf of `cell`; references register edges from it.
    pub fn for_cell(mut self, cell: CellRef) -> Self {
        self.current = Some(cell);
        self
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::CellRef(cell_ref) => {
                self.register(*cell_ref);
                Ok(read_cell(self.grid, cell_ref))
            }
            Expr::Range { start, end } => {
                self.register(*start);
                self.register(*end);
                self.read_range(*start, *end)
            }
            Expr::FunctionCall { name, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.evaluate(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                let ctx = FunctionContext { cell: self.current };
                Ok(self.registry.execute(name, &values, &ctx)?)
            }
            Expr::BinaryOp { op, left, right } => {
                let left = operand(self.evaluate(left)?)?;
                let right = operand(self.evaluate(right)?)?;
                binary_op(*op, left, right)
            }
            Expr::UnaryOp { op, operand: inner } => {
                let value = operand(self.evaluate(inner)?)?;
                match op {
                    UnaryOp::Neg => Ok(Value::Number(-value.as_number().unwrap_or(0.0))),
                }
            }
        }
    }

    fn register(&mut self, depends_on: CellRef) {
        if let Some(cell) = self.current {
            self.sink.register(cell, depends_on);
        }
    }

    fn read_range(&self, start: CellRef, end: CellRef) -> Result<Value, EvalError> {
        match CellRef::rect_len(start, end) {
            Some(len) if len <= MAX_RANGE_CELLS => {}
            _ => return Err(EvalError::RangeTooLarge { start, end }),
        }
        let values = CellRef::rect(start, end)
            .map(|cell_ref| {
                self.grid
                    .get(&cell_ref)
                    .map(|cell| cell.value())
                    .unwrap_or(Value::Empty)
            })
            .collect();
        Ok(Value::Array(values))
    }
}

/// Arrays collapse to their first element; error values abort the operation.
fn operand(value: Value) -> Result<Value, EvalError> {
    match value.first() {
        Value::Error(e) => Err(EvalError::ErrorOperand(e)),
        other => Ok(other),
    }
}

fn binary_op(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    if op == BinaryOp::Concat {
        return Ok(Value::Text(format!("{}{}", left, right)));
    }

    let numbers = left.as_number().zip(right.as_number());

    if op.is_comparison() {
        let ordering = match numbers {
            Some((l, r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
            None => left
                .to_string()
                .to_lowercase()
                .cmp(&right.to_string().to_lowercase()),
        };
        let result = match op {
            BinaryOp::Eq => ordering == Ordering::Equal,
            BinaryOp::Ne => ordering != Ordering::Equal,
            BinaryOp::Lt => ordering == Ordering::Less,
            BinaryOp::Gt => ordering == Ordering::Greater,
            BinaryOp::Le => ordering != Ordering::Greater,
            BinaryOp::Ge => ordering != Ordering::Less,
            _ => unreachable!("non-comparison operator"),
        };
        return Ok(Value::Bool(result));
    }

    let Some((l, r)) = numbers else {
        if op == BinaryOp::Add {
            return Ok(Value::Text(format!("{}{}", left, right)));
        }
        return Err(EvalError::NonNumeric { op });
    };

    let result = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => {
            if r == 0.0 {
                return Ok(Value::Error(ErrorValue::DivZero));
            }
            l / r
        }
        BinaryOp::Pow => l.powf(r),
        _ => unreachable!("comparison and concatenation handled above"),
    };
    if result.is_finite() {
        Ok(Value::Number(result))
    } else {
        Ok(Value::Error(ErrorValue::Num))
    }
}
