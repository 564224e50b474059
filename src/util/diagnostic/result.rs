//! 统一 Result 类型
//!
//! 所有编译阶段都返回 `Result<T, Diagnostic>`

use super::error::Diagnostic;

/// 统一结果类型
pub type Result<T, E = Diagnostic> = std::result::Result<T, E>;
