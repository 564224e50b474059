//! Program syntax tree
//!
//! A program is a sequence of operator invocations over concrete inputs and
//! outputs. Like the operator tree, `T` is `()` before deduction and [`Type`]
//! afterwards.

use crate::frontend::operator::ast::Literal;
use crate::frontend::types::{Dimension, Type};
use crate::util::span::SourceLocation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Extent of one axis of a declared field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Extent {
    /// 编译期已知大小
    Fixed(usize),
    /// 运行时大小（生成隐式参数）
    Runtime,
}

/// Domain bound: a constant or a scalar integer symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bound {
    Const(i64),
    Symbol(String),
}

impl fmt::Display for Bound {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Bound::Const(value) => write!(f, "{}", value),
            Bound::Symbol(name) => write!(f, "{}", name),
        }
    }
}

/// Half-open range `[start, stop)` along one dimension
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DomainRange {
    pub dim: Dimension,
    pub start: Bound,
    pub stop: Bound,
}

impl DomainRange {
    pub fn new(
        dim: Dimension,
        start: Bound,
        stop: Bound,
    ) -> Self {
        Self { dim, start, stop }
    }
}

impl fmt::Display for DomainRange {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}: [{}, {})", self.dim, self.start, self.stop)
    }
}

/// Explicit statement domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Domain {
    pub ranges: Vec<DomainRange>,
    pub location: SourceLocation,
}

/// 程序形参
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramParam {
    pub name: String,
    pub ty: Type,
    /// Declared shape of a field parameter, one extent per dimension
    pub shape: Option<Vec<Extent>>,
    pub location: SourceLocation,
}

impl ProgramParam {
    pub fn new(
        name: impl Into<String>,
        ty: Type,
        location: SourceLocation,
    ) -> Self {
        Self {
            name: name.into(),
            ty,
            shape: None,
            location,
        }
    }

    pub fn with_shape(
        mut self,
        shape: Vec<Extent>,
    ) -> Self {
        self.shape = Some(shape);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgKind {
    Name(String),
    Literal(Literal),
}

/// Argument of a call statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arg<T = ()> {
    pub kind: ArgKind,
    pub ty: T,
    pub location: SourceLocation,
}

impl Arg {
    pub fn name(
        name: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            kind: ArgKind::Name(name.into()),
            ty: (),
            location,
        }
    }

    pub fn literal(
        literal: Literal,
        location: SourceLocation,
    ) -> Self {
        Self {
            kind: ArgKind::Literal(literal),
            ty: (),
            location,
        }
    }
}

impl<T> fmt::Display for Arg<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.kind {
            ArgKind::Name(name) => write!(f, "{}", name),
            ArgKind::Literal(lit) => write!(f, "{}", lit.value),
        }
    }
}

/// Output symbol of a call statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target<T = ()> {
    pub name: String,
    pub ty: T,
    pub location: SourceLocation,
}

impl Target {
    pub fn new(
        name: impl Into<String>,
        location: SourceLocation,
    ) -> Self {
        Self {
            name: name.into(),
            ty: (),
            location,
        }
    }
}

/// `outs = operator(args)` optionally restricted to `domain`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStmt<T = ()> {
    pub operator: String,
    pub operator_location: SourceLocation,
    pub args: Vec<Arg<T>>,
    /// One target, or one per element of a tuple-returning operator
    pub outs: Vec<Target<T>>,
    pub domain: Option<Domain>,
    pub location: SourceLocation,
}

/// Local field declaration (a temporary of the program)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub name: String,
    pub ty: Type,
    pub shape: Option<Vec<Extent>>,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stmt<T = ()> {
    Call(CallStmt<T>),
    Declare(Declaration),
}

impl<T> Stmt<T> {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Stmt::Call(call) => &call.location,
            Stmt::Declare(decl) => &decl.location,
        }
    }
}

/// 程序
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program<T = ()> {
    pub name: String,
    pub params: Vec<ProgramParam>,
    pub body: Vec<Stmt<T>>,
    pub location: SourceLocation,
}

pub type TypedProgram = Program<Type>;

impl<T> Program<T> {
    pub fn calls(&self) -> impl Iterator<Item = &CallStmt<T>> {
        self.body.iter().filter_map(|stmt| match stmt {
            Stmt::Call(call) => Some(call),
            Stmt::Declare(_) => None,
        })
    }

    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.body.iter().filter_map(|stmt| match stmt {
            Stmt::Declare(decl) => Some(decl),
            Stmt::Call(_) => None,
        })
    }
}
