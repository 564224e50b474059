//! Iterator IR
//!
//! Backend-agnostic intermediate representation. Operator bodies become
//! expressions over iterators (`deref`, `shift`, `lift`); a program becomes a
//! [`ProgramUnit`] of apply statements over concrete domains. Every node
//! carries its concrete [`Type`]: for iterator-valued nodes that is the type
//! of the field they iterate.

use crate::frontend::builtins::{MathFunction, ReduceOp};
use crate::frontend::operator::ast::Literal;
use crate::frontend::program::ast::DomainRange;
use crate::frontend::types::{Dimension, ScalarKind, Type};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// 逐点原语
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Plus,
    Minus,
    Multiplies,
    Divides,
    Negate,
    Not,
    And,
    Or,
    Xor,
    Eq,
    NotEq,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Math(MathFunction),
    Cast(ScalarKind),
    /// Opaque external function from the registry
    External(String),
}

impl Primitive {
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Primitive::Eq
                | Primitive::NotEq
                | Primitive::Less
                | Primitive::LessEqual
                | Primitive::Greater
                | Primitive::GreaterEqual
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            Primitive::Plus => "plus",
            Primitive::Minus => "minus",
            Primitive::Multiplies => "multiplies",
            Primitive::Divides => "divides",
            Primitive::Negate => "negate",
            Primitive::Not => "not_",
            Primitive::And => "and_",
            Primitive::Or => "or_",
            Primitive::Xor => "xor_",
            Primitive::Eq => "eq",
            Primitive::NotEq => "not_eq",
            Primitive::Less => "less",
            Primitive::LessEqual => "less_equal",
            Primitive::Greater => "greater",
            Primitive::GreaterEqual => "greater_equal",
            Primitive::Math(function) => function.name(),
            Primitive::Cast(kind) => return write!(f, "cast_{}", kind),
            Primitive::External(name) => name.as_str(),
        };
        write!(f, "{}", name)
    }
}

/// IR 形参
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Type,
}

impl Param {
    pub fn new(
        name: impl Into<String>,
        ty: Type,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// IR 表达式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExprKind {
    Literal(Literal),
    SymRef(String),
    /// Iterator moved along an offset
    Shift {
        iterator: Box<Expr>,
        offset: String,
        index: Option<i64>,
    },
    /// Value at the current position of an iterator
    Deref(Box<Expr>),
    /// Lifted pointwise primitive
    Apply {
        primitive: Primitive,
        args: Vec<Expr>,
    },
    /// Lambda over iterators applied to `args`, yielding an iterator
    Lift {
        params: Vec<Param>,
        body: Box<Expr>,
        args: Vec<Expr>,
    },
    Let {
        name: String,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    /// Eager select
    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },
    MakeTuple(Vec<Expr>),
    TupleGet {
        tuple: Box<Expr>,
        index: usize,
    },
    Reduce {
        op: ReduceOp,
        axis: Dimension,
        iterator: Box<Expr>,
    },
}

impl Expr {
    pub fn new(
        kind: ExprKind,
        ty: Type,
    ) -> Self {
        Self { kind, ty }
    }

    pub fn sym_ref(
        name: impl Into<String>,
        ty: Type,
    ) -> Self {
        Self::new(ExprKind::SymRef(name.into()), ty)
    }

    /// Children in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::SymRef(_) => Vec::new(),
            ExprKind::Shift { iterator, .. } => vec![&**iterator],
            ExprKind::Deref(inner) => vec![&**inner],
            ExprKind::Apply { args, .. } | ExprKind::MakeTuple(args) => args.iter().collect(),
            ExprKind::Lift { body, args, .. } => {
                let mut children: Vec<&Expr> = args.iter().collect();
                children.push(body);
                children
            }
            ExprKind::Let { value, body, .. } => vec![&**value, &**body],
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => vec![&**condition, &**then_branch, &**else_branch],
            ExprKind::TupleGet { tuple, .. } => vec![&**tuple],
            ExprKind::Reduce { iterator, .. } => vec![&**iterator],
        }
    }

    /// Number of nodes in this tree
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(|c| c.size()).sum::<usize>()
    }

    /// 自由符号（首次出现顺序，去重）
    pub fn free_symbols(&self) -> Vec<Param> {
        let mut found = Vec::new();
        let mut seen = HashSet::new();
        collect_free(self, &mut Vec::new(), &mut seen, &mut found);
        found
    }
}

fn collect_free(
    expr: &Expr,
    bound: &mut Vec<String>,
    seen: &mut HashSet<String>,
    found: &mut Vec<Param>,
) {
    match &expr.kind {
        ExprKind::SymRef(name) => {
            if !bound.contains(name) && seen.insert(name.clone()) {
                found.push(Param::new(name.clone(), expr.ty.clone()));
            }
        }
        ExprKind::Let { name, value, body } => {
            collect_free(value, bound, seen, found);
            bound.push(name.clone());
            collect_free(body, bound, seen, found);
            bound.pop();
        }
        ExprKind::Lift { params, body, args } => {
            for arg in args {
                collect_free(arg, bound, seen, found);
            }
            let depth = bound.len();
            bound.extend(params.iter().map(|p| p.name.clone()));
            collect_free(body, bound, seen, found);
            bound.truncate(depth);
        }
        _ => {
            for child in expr.children() {
                collect_free(child, bound, seen, found);
            }
        }
    }
}

fn write_list(
    f: &mut fmt::Formatter<'_>,
    items: &[Expr],
) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

impl fmt::Display for Expr {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.kind {
            ExprKind::Literal(lit) => write!(f, "{}", lit.value),
            ExprKind::SymRef(name) => write!(f, "{}", name),
            ExprKind::Shift {
                iterator,
                offset,
                index,
            } => match index {
                Some(index) => write!(f, "shift({}, {}, {})", iterator, offset, index),
                None => write!(f, "shift({}, {})", iterator, offset),
            },
            ExprKind::Deref(inner) => write!(f, "deref({})", inner),
            ExprKind::Apply { primitive, args } => {
                write!(f, "apply({}", primitive)?;
                for arg in args {
                    write!(f, ", {}", arg)?;
                }
                write!(f, ")")
            }
            ExprKind::Lift { params, body, args } => {
                let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
                write!(f, "lift(λ({}) → {})(", names.join(", "), body)?;
                write_list(f, args)?;
                write!(f, ")")
            }
            ExprKind::Let { name, value, body } => {
                write!(f, "let {} = {} in {}", name, value, body)
            }
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "if({}, {}, {})", condition, then_branch, else_branch),
            ExprKind::MakeTuple(elements) => {
                write!(f, "make_tuple(")?;
                write_list(f, elements)?;
                write!(f, ")")
            }
            ExprKind::TupleGet { tuple, index } => write!(f, "tuple_get({}, {})", index, tuple),
            ExprKind::Reduce { op, axis, iterator } => {
                write!(f, "reduce({}, {}, {})", op, axis, iterator)
            }
        }
    }
}

/// 函数定义（降级后的算子）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Expr,
}

impl FunctionDefinition {
    pub fn returns(&self) -> &Type {
        &self.body.ty
    }
}

impl fmt::Display for FunctionDefinition {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        write!(
            f,
            "{}({}) -> {} := {}",
            self.name,
            params.join(", "),
            self.body.ty,
            self.body
        )
    }
}

/// Iteration domain of one statement
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Domain {
    pub ranges: Vec<DomainRange>,
}

impl Domain {
    pub fn dims(&self) -> impl Iterator<Item = &Dimension> {
        self.ranges.iter().map(|r| &r.dim)
    }
}

impl fmt::Display for Domain {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let ranges: Vec<String> = self.ranges.iter().map(|r| r.to_string()).collect();
        write!(f, "{{{}}}", ranges.join(", "))
    }
}

/// `outputs ← operator(args)` over `domain`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyStmt {
    pub operator: String,
    pub args: Vec<Expr>,
    pub outputs: Vec<String>,
    pub domain: Domain,
}

impl fmt::Display for ApplyStmt {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{} ← {}(", self.outputs.join(", "), self.operator)?;
        write_list(f, &self.args)?;
        write!(f, ") @ {}", self.domain)
    }
}

/// 程序单元：降级的最终产物
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramUnit {
    pub name: String,
    pub params: Vec<Param>,
    /// Fields declared inside the program body
    pub temporaries: Vec<Param>,
    /// Lowered operator bodies, first-reference order
    pub functions: IndexMap<String, FunctionDefinition>,
    pub statements: Vec<ApplyStmt>,
}

impl ProgramUnit {
    /// Parameter or temporary named `name`
    pub fn symbol(
        &self,
        name: &str,
    ) -> Option<&Param> {
        self.params
            .iter()
            .chain(&self.temporaries)
            .find(|p| p.name == name)
    }
}

impl fmt::Display for ProgramUnit {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        for function in self.functions.values() {
            writeln!(f, "{}", function)?;
        }
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty))
            .collect();
        writeln!(f, "program {}({}) {{", self.name, params.join(", "))?;
        for temporary in &self.temporaries {
            writeln!(f, "  temporary {}: {}", temporary.name, temporary.ty)?;
        }
        for stmt in &self.statements {
            writeln!(f, "  {};", stmt)?;
        }
        write!(f, "}}")
    }
}
