//! Expression tree produced by the parser.
//!
//! Trees are built once per evaluation and thrown away afterwards; only the
//! dependency set extracted from them outlives the evaluation.

use std::collections::BTreeSet;
use std::fmt;

use super::cell_ref::CellRef;
use super::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Number, string or boolean literal.
    Literal(Value),
    CellRef(CellRef),
    /// `start:end`, corners as written.
    Range { start: CellRef, end: CellRef },
    /// Function name is stored upper-cased.
    FunctionCall { name: String, args: Vec<Expr> },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
}

impl Expr {
    /// Names of every function called anywhere in the tree.
    pub fn function_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(expr) = stack.pop() {
            match expr {
                Expr::Literal(_) | Expr::CellRef(_) | Expr::Range { .. } => {}
                Expr::FunctionCall { name, args } => {
                    names.insert(name.as_str());
                    stack.extend(args.iter());
                }
                Expr::BinaryOp { left, right, .. } => {
                    stack.push(left);
                    stack.push(right);
                }
                Expr::UnaryOp { operand, .. } => stack.push(operand),
            }
        }
        names
    }
}
