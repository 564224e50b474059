//! Field operator syntax tree
//!
//! `T` is the per-node annotation: `()` for raw trees handed over by the
//! parser, [`Type`] after type deduction.

use crate::frontend::builtins::ReduceOp;
use crate::frontend::types::{ScalarKind, Type};
use crate::util::span::SourceLocation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 字面量（保留源文本）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Literal {
    pub value: String,
    pub kind: ScalarKind,
}

impl Literal {
    pub fn new(
        value: impl Into<String>,
        kind: ScalarKind,
    ) -> Self {
        Self {
            value: value.into(),
            kind,
        }
    }

    pub fn bool(value: bool) -> Self {
        Self::new(value.to_string(), ScalarKind::Bool)
    }

    pub fn int32(value: i32) -> Self {
        Self::new(value.to_string(), ScalarKind::Int32)
    }

    pub fn float64(value: f64) -> Self {
        Self::new(format!("{:?}", value), ScalarKind::Float64)
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOp {
    Plus,
    Neg,
    Not,
}

impl UnOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnOp::Plus => "+",
            UnOp::Neg => "-",
            UnOp::Not => "not ",
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Xor,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
}

/// 运算符类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Arithmetic,
    Logical,
    Comparison,
}

impl BinOp {
    pub fn class(&self) -> OpClass {
        match self {
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div => OpClass::Arithmetic,
            BinOp::And | BinOp::Or | BinOp::Xor => OpClass::Logical,
            BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                OpClass::Comparison
            }
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::And => "&",
            BinOp::Or => "|",
            BinOp::Xor => "^",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

/// Offset application `field(Offset)` or `field(Offset[i])`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetRef {
    pub name: String,
    pub index: Option<i64>,
    /// Location of the offset token itself
    pub location: SourceLocation,
}

/// Expression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr<T = ()> {
    pub kind: ExprKind<T>,
    pub ty: T,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind<T = ()> {
    Literal(Literal),
    Name(String),
    Unary {
        op: UnOp,
        operand: Box<Expr<T>>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr<T>>,
        right: Box<Expr<T>>,
    },
    Call {
        func: String,
        func_location: SourceLocation,
        args: Vec<Expr<T>>,
    },
    Shift {
        field: Box<Expr<T>>,
        offset: OffsetRef,
    },
    /// `then_branch if condition else else_branch`
    Conditional {
        condition: Box<Expr<T>>,
        then_branch: Box<Expr<T>>,
        else_branch: Box<Expr<T>>,
    },
    /// `name: annotation = value` scoped over `body`
    Let {
        name: String,
        annotation: Option<Type>,
        value: Box<Expr<T>>,
        body: Box<Expr<T>>,
    },
    Tuple(Vec<Expr<T>>),
    Subscript {
        value: Box<Expr<T>>,
        index: usize,
    },
    /// 沿局部维度的邻居规约
    Reduce {
        op: ReduceOp,
        operand: Box<Expr<T>>,
        axis: String,
        axis_location: SourceLocation,
    },
}

/// Typed expression
pub type TypedExpr = Expr<Type>;

/// 形参
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub location: SourceLocation,
}

impl Param {
    pub fn new(
        name: impl Into<String>,
        ty: Type,
        location: SourceLocation,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            location,
        }
    }
}

/// Field operator definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldOperator<T = ()> {
    pub name: String,
    pub params: Vec<Param>,
    pub returns: Type,
    pub body: Expr<T>,
    pub location: SourceLocation,
}

pub type TypedFieldOperator = FieldOperator<Type>;

impl<T> Expr<T> {
    pub fn ty(&self) -> &T {
        &self.ty
    }
}

/// Constructors for raw trees
impl Expr {
    pub fn new(
        kind: ExprKind,
        location: SourceLocation,
    ) -> Self {
        Self {
            kind,
            ty: (),
            location,
        }
    }

    pub fn literal(
        literal: Literal,
        location: SourceLocation,
    ) -> Self {
        Self::new(ExprKind::Literal(literal), location)
    }

    pub fn name(
        name: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self::new(ExprKind::Name(name.into()), location)
    }

    pub fn unary(
        op: UnOp,
        operand: Expr,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            location,
        )
    }

    pub fn binary(
        op: BinOp,
        left: Expr,
        right: Expr,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            location,
        )
    }

    /// Call whose callee token shares the call's location
    pub fn call(
        func: impl Into<String>,
        args: Vec<Expr>,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Call {
                func: func.into(),
                func_location: location.clone(),
                args,
            },
            location,
        )
    }

    pub fn shift(
        field: Expr,
        offset: OffsetRef,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Shift {
                field: Box::new(field),
                offset,
            },
            location,
        )
    }

    pub fn conditional(
        condition: Expr,
        then_branch: Expr,
        else_branch: Expr,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Conditional {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            location,
        )
    }

    pub fn let_in(
        name: impl Into<String>,
        annotation: Option<Type>,
        value: Expr,
        body: Expr,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Let {
                name: name.into(),
                annotation,
                value: Box::new(value),
                body: Box::new(body),
            },
            location,
        )
    }

    pub fn tuple(
        elements: Vec<Expr>,
        location: SourceLocation,
    ) -> Self {
        Self::new(ExprKind::Tuple(elements), location)
    }

    pub fn subscript(
        value: Expr,
        index: usize,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Subscript {
                value: Box::new(value),
                index,
            },
            location,
        )
    }

    pub fn reduce(
        op: ReduceOp,
        operand: Expr,
        axis: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            ExprKind::Reduce {
                op,
                operand: Box::new(operand),
                axis: axis.into(),
                axis_location: location.clone(),
            },
            location,
        )
    }
}

impl<T> fmt::Display for Expr<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => write!(f, "{}", lit.value),
            ExprKind::Name(name) => write!(f, "{}", name),
            ExprKind::Unary { op, operand } => write!(f, "{}{}", op.symbol(), operand),
            ExprKind::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            ExprKind::Call { func, args, .. } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            ExprKind::Shift { field, offset } => match offset.index {
                Some(index) => write!(f, "{}({}[{}])", field, offset.name, index),
                None => write!(f, "{}({})", field, offset.name),
            },
            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "({} if {} else {})", then_branch, condition, else_branch),
            ExprKind::Let {
                name, value, body, ..
            } => write!(f, "(let {} = {} in {})", name, value, body),
            ExprKind::Tuple(elements) => {
                write!(f, "(")?;
                for (i, e) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                if elements.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            ExprKind::Subscript { value, index } => write!(f, "{}[{}]", value, index),
            ExprKind::Reduce { op, operand, axis, .. } => {
                write!(f, "{}({}, axis={})", op, operand, axis)
            }
        }
    }
}
