//! Iterator IR and the lowering passes that produce it
//!
//! 类型推断之后的编译阶段：算子降级 → 程序降级 → IR 校验

pub mod ir;
pub mod operator_lowering;
pub mod program_lowering;
pub mod validate;


pub use ir::{ApplyStmt, Domain, Expr, ExprKind, FunctionDefinition, Param, Primitive, ProgramUnit};
pub use operator_lowering::{lower_operator, FreshNames, OperatorLowering};
pub use program_lowering::{lower_program, ProgramLowering};
pub use validate::{validate_function, validate_program};
