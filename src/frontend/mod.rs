//! 前端：符号表、注册表与两级类型推导
//!
//! - `types`: 类型描述、unify、符号表
//! - `registry`: 偏移量与算子签名的只读注册表
//! - `builtins`: 数学函数、类型转换与归约
//! - `operator`: 算子 AST 及其类型推导
//! - `program`: 程序 AST 及其类型推导
//! - `pipeline`: 批量编译与单元状态机

pub mod builtins;
pub mod operator;
pub mod pipeline;
pub mod program;
pub mod registry;
pub mod types;

pub use operator::{deduce_operator, FieldOperator, TypedFieldOperator};
pub use pipeline::{load_batch, save_batch, Batch, BatchResult, CancellationToken, UnitReport, UnitState};
pub use program::{deduce_program, program_from_operator, Program, TypedProgram};
pub use registry::{Connectivity, OffsetKind, OperatorSignature, Registry, RegistryBuilder};
