//! Programs: syntax tree and type deduction

pub mod ast;
pub mod type_deduction;

#[cfg(test)]
mod tests;

pub use ast::{
    Arg, ArgKind, Bound, CallStmt, Declaration, Domain, DomainRange, Extent, Program,
    ProgramParam, Stmt, Target, TypedProgram,
};
pub use type_deduction::{
    deduce_program, output_dims, program_from_operator, ProgramTypeDeduction, OUT_PARAM,
};
