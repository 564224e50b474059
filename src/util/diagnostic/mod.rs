//! 统一诊断系统
//!
//! # 模块结构
//!
//! - [`error`] - 诊断数据结构 (Diagnostic, Stage, ErrorKind)
//! - [`result`] - 统一 Result 类型

pub mod error;
pub mod result;


// 重新导出
pub use error::{Diagnostic, ErrorKind, Stage};
pub use result::Result;
