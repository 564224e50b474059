//! 诊断数据结构
//!
//! 每个失败都是一条结构化记录：`{stage, location, kind, message, offending}`。
//! 格式化输出与退出码映射由宿主工具负责。

use crate::util::span::SourceLocation;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Pipeline stage that produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Building the batch registry (offsets, signatures)
    Registry,
    /// Operator- or program-level type deduction
    TypeDeduction,
    /// Operator- or program-level lowering into iterator IR
    Lowering,
    /// Post-lowering IR validation
    Validation,
}

impl fmt::Display for Stage {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Stage::Registry => write!(f, "registry"),
            Stage::TypeDeduction => write!(f, "type deduction"),
            Stage::Lowering => write!(f, "lowering"),
            Stage::Validation => write!(f, "validation"),
        }
    }
}

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Identifier, operator or offset that resolves to nothing
    UndefinedSymbol,
    /// Incompatible scalar kinds, tuple arities or signatures
    TypeMismatch,
    /// Incompatible dimension sets
    DimensionMismatch,
    /// Operator not defined for the operand types
    UnsupportedOperation,
    /// Program statement without an explicit or inferable domain
    MissingDomain,
    /// Output symbol written by more than one statement
    MultipleAssignment,
    /// Name defined twice in the same scope
    DuplicateDefinition,
    /// A pass produced ill-formed output; always a compiler defect
    InternalInvariant,
}

impl ErrorKind {
    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::UndefinedSymbol => "E1001",
            ErrorKind::TypeMismatch => "E1002",
            ErrorKind::DimensionMismatch => "E1003",
            ErrorKind::UnsupportedOperation => "E1004",
            ErrorKind::DuplicateDefinition => "E1005",
            ErrorKind::MissingDomain => "E2001",
            ErrorKind::MultipleAssignment => "E2002",
            ErrorKind::InternalInvariant => "E8001",
        }
    }

    /// 是否为编译器内部缺陷
    pub fn is_internal(&self) -> bool {
        matches!(self, ErrorKind::InternalInvariant)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            ErrorKind::UndefinedSymbol => "UndefinedSymbolError",
            ErrorKind::TypeMismatch => "TypeMismatchError",
            ErrorKind::DimensionMismatch => "DimensionMismatchError",
            ErrorKind::UnsupportedOperation => "UnsupportedOperationError",
            ErrorKind::MissingDomain => "MissingDomainError",
            ErrorKind::MultipleAssignment => "MultipleAssignmentError",
            ErrorKind::DuplicateDefinition => "DuplicateDefinitionError",
            ErrorKind::InternalInvariant => "InternalInvariantError",
        };
        write!(f, "{}", name)
    }
}

/// 诊断信息
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}[{code}] during {stage} at {location}: {message}", code = .kind.code())]
pub struct Diagnostic {
    /// 失败阶段
    pub stage: Stage,
    /// 位置信息
    pub location: SourceLocation,
    /// 错误分类
    pub kind: ErrorKind,
    /// 完整消息
    pub message: String,
    /// Offending symbol or expression, rendered as text
    pub offending: String,
    /// Secondary locations (e.g. the earlier statement of a double write)
    pub related: Vec<SourceLocation>,
}

impl Diagnostic {
    pub fn new(
        stage: Stage,
        kind: ErrorKind,
        location: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            location,
            kind,
            message: message.into(),
            offending: String::new(),
            related: Vec::new(),
        }
    }

    /// 设置出错的符号或表达式
    pub fn with_offending(
        mut self,
        offending: impl Into<String>,
    ) -> Self {
        self.offending = offending.into();
        self
    }

    /// 添加相关位置
    pub fn with_related(
        mut self,
        location: SourceLocation,
    ) -> Self {
        self.related.push(location);
        self
    }

    pub fn undefined_symbol(
        stage: Stage,
        name: &str,
        location: SourceLocation,
    ) -> Self {
        Self::new(
            stage,
            ErrorKind::UndefinedSymbol,
            location,
            format!("undefined symbol `{}`", name),
        )
        .with_offending(name)
    }

    pub fn unsupported(
        stage: Stage,
        location: SourceLocation,
        message: impl Into<String>,
        offending: impl Into<String>,
    ) -> Self {
        Self::new(stage, ErrorKind::UnsupportedOperation, location, message)
            .with_offending(offending)
    }

    pub fn internal(
        stage: Stage,
        location: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(stage, ErrorKind::InternalInvariant, location, message)
    }

    /// 是否为编译器内部缺陷
    pub fn is_internal(&self) -> bool {
        self.kind.is_internal()
    }
}
