//! 内置函数
//!
//! Math functions, type-constructor casts and neighbor reductions. These are
//! resolved before the registry, so an operator cannot be named `sqrt`.

use crate::frontend::types::ScalarKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 数学函数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathFunction {
    Abs,
    Sqrt,
    Exp,
    Log,
    Sin,
    Cos,
    Tan,
    Floor,
    Ceil,
    Trunc,
    Minimum,
    Maximum,
    Power,
}

impl MathFunction {
    pub fn name(&self) -> &'static str {
        match self {
            MathFunction::Abs => "abs",
            MathFunction::Sqrt => "sqrt",
            MathFunction::Exp => "exp",
            MathFunction::Log => "log",
            MathFunction::Sin => "sin",
            MathFunction::Cos => "cos",
            MathFunction::Tan => "tan",
            MathFunction::Floor => "floor",
            MathFunction::Ceil => "ceil",
            MathFunction::Trunc => "trunc",
            MathFunction::Minimum => "minimum",
            MathFunction::Maximum => "maximum",
            MathFunction::Power => "power",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            MathFunction::Minimum | MathFunction::Maximum | MathFunction::Power => 2,
            _ => 1,
        }
    }

    /// 仅接受浮点操作数
    pub fn requires_floating(&self) -> bool {
        !matches!(
            self,
            MathFunction::Abs | MathFunction::Minimum | MathFunction::Maximum
        )
    }

    const ALL: [MathFunction; 13] = [
        MathFunction::Abs,
        MathFunction::Sqrt,
        MathFunction::Exp,
        MathFunction::Log,
        MathFunction::Sin,
        MathFunction::Cos,
        MathFunction::Tan,
        MathFunction::Floor,
        MathFunction::Ceil,
        MathFunction::Trunc,
        MathFunction::Minimum,
        MathFunction::Maximum,
        MathFunction::Power,
    ];
}

/// 邻居规约
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

impl ReduceOp {
    pub fn name(&self) -> &'static str {
        match self {
            ReduceOp::Sum => "neighbor_sum",
            ReduceOp::Max => "max_over",
            ReduceOp::Min => "min_over",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "neighbor_sum" => Some(ReduceOp::Sum),
            "max_over" => Some(ReduceOp::Max),
            "min_over" => Some(ReduceOp::Min),
            _ => None,
        }
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A name that resolves to a builtin callable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Builtin {
    Math(MathFunction),
    /// `float64(x)` and friends
    Cast(ScalarKind),
}

impl Builtin {
    pub fn lookup(name: &str) -> Option<Self> {
        if let Some(kind) = ScalarKind::from_name(name) {
            return Some(Builtin::Cast(kind));
        }
        MathFunction::ALL
            .iter()
            .find(|f| f.name() == name)
            .map(|f| Builtin::Math(*f))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Math(f) => f.name(),
            Builtin::Cast(kind) => kind.name(),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Builtin::Math(f) => f.arity(),
            Builtin::Cast(_) => 1,
        }
    }
}

/// Whether `name` is reserved by a builtin or reduction
pub fn is_builtin_name(name: &str) -> bool {
    Builtin::lookup(name).is_some() || ReduceOp::from_name(name).is_some()
}
