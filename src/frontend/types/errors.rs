//! 类型构造与统一的错误
//!
//! 这些错误不带位置；推断阶段通过 [`TypeResultExt::located`] 附加阶段与位置。

use super::{Dimension, DimensionKind, Type};
use crate::util::diagnostic::{Diagnostic, ErrorKind, Result, Stage};
use crate::util::span::SourceLocation;
use thiserror::Error;

fn dim_list(dims: &[Dimension]) -> String {
    dims.iter()
        .map(|d| d.name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 类型错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// 类型不匹配错误
    #[error("type mismatch: expected {expected}, found {found}")]
    Mismatch { expected: Type, found: Type },

    /// 元组或参数数量不匹配
    #[error("arity mismatch: expected {expected} elements, found {found}")]
    ArityMismatch { expected: usize, found: usize },

    /// 同名维度种类不同
    #[error("dimension `{name}` used as both {left:?} and {right:?}")]
    DimensionConflict {
        name: String,
        left: DimensionKind,
        right: DimensionKind,
    },

    /// 缺少期望的维度（不做隐式广播）
    #[error("expected {expected}, found {found}: missing dimension(s) {}", dim_list(.missing))]
    MissingDimensions {
        expected: Type,
        found: Type,
        missing: Vec<Dimension>,
    },

    /// 偏移的目标维度已在操作数中
    #[error("offset `{offset}` introduces dimension `{name}`, which the operand already has")]
    DimensionOverlap { offset: String, name: String },

    /// 多出期望之外的维度
    #[error("expected {expected}, found {found}: unexpected dimension(s) {}", dim_list(.extra))]
    UnexpectedDimensions {
        expected: Type,
        found: Type,
        extra: Vec<Dimension>,
    },
}

impl TypeError {
    /// Diagnostic category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            TypeError::Mismatch { .. } | TypeError::ArityMismatch { .. } => {
                ErrorKind::TypeMismatch
            }
            TypeError::DimensionConflict { .. }
            | TypeError::DimensionOverlap { .. }
            | TypeError::MissingDimensions { .. }
            | TypeError::UnexpectedDimensions { .. } => ErrorKind::DimensionMismatch,
        }
    }

    pub fn into_diagnostic(
        self,
        stage: Stage,
        location: &SourceLocation,
        offending: &str,
    ) -> Diagnostic {
        Diagnostic::new(stage, self.kind(), location.clone(), self.to_string())
            .with_offending(offending)
    }
}

/// Attach stage and location to a bare type-builder result
pub trait TypeResultExt<T> {
    fn located(
        self,
        stage: Stage,
        location: &SourceLocation,
        offending: &str,
    ) -> Result<T>;
}

impl<T> TypeResultExt<T> for std::result::Result<T, TypeError> {
    fn located(
        self,
        stage: Stage,
        location: &SourceLocation,
        offending: &str,
    ) -> Result<T> {
        self.map_err(|err| err.into_diagnostic(stage, location, offending))
    }
}
