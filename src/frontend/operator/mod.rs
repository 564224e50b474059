//! Field operators: syntax tree and type deduction

pub mod ast;
pub mod type_deduction;

#[cfg(test)]
mod tests;

pub use ast::{
    BinOp, Expr, ExprKind, FieldOperator, Literal, OffsetRef, OpClass, Param, TypedExpr,
    TypedFieldOperator, UnOp,
};
pub use type_deduction::{deduce_operator, OperatorTypeDeduction};
