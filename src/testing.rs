//! 单元测试共用的构造工具

use crate::frontend::operator::ast::{BinOp, Expr, FieldOperator, OffsetRef, Param};
use crate::frontend::operator::{deduce_operator, TypedFieldOperator};
use crate::frontend::program::ast::{Arg, CallStmt, Program, ProgramParam, Stmt, Target};
use crate::frontend::registry::{Connectivity, Registry};
use crate::frontend::types::{make_field, Dimension, ScalarKind, Type};
use crate::util::span::SourceLocation;
use indexmap::IndexMap;
use std::sync::Arc;

pub fn loc(
    line: usize,
    column: usize,
) -> SourceLocation {
    SourceLocation::at("test.py", line, column)
}

pub fn dim_i() -> Dimension {
    Dimension::horizontal("I")
}

pub fn dim_j() -> Dimension {
    Dimension::horizontal("J")
}

pub fn dim_k() -> Dimension {
    Dimension::vertical("K")
}

pub fn vertex() -> Dimension {
    Dimension::horizontal("Vertex")
}

pub fn edge() -> Dimension {
    Dimension::horizontal("Edge")
}

pub fn e2v_dim() -> Dimension {
    Dimension::local("E2VDim")
}

pub fn field(
    dtype: ScalarKind,
    dims: &[Dimension],
) -> Type {
    make_field(dtype, dims.iter().cloned()).unwrap()
}

pub fn f64_field(dims: &[Dimension]) -> Type {
    field(ScalarKind::Float64, dims)
}

pub fn param(
    name: &str,
    ty: Type,
) -> Param {
    Param::new(name, ty, loc(1, 1))
}

pub fn offset(
    name: &str,
    line: usize,
    column: usize,
) -> OffsetRef {
    OffsetRef {
        name: name.to_string(),
        index: None,
        location: loc(line, column),
    }
}

/// `Ioff`, `Joff`, `Koff` plus the unstructured `E2V: Vertex -> [Edge, E2VDim]`
pub fn connectivities() -> Vec<Connectivity> {
    vec![
        Connectivity::cartesian("Ioff", dim_i()),
        Connectivity::cartesian("Joff", dim_j()),
        Connectivity::cartesian("Koff", dim_k()),
        Connectivity::unstructured("E2V", vertex(), edge(), e2v_dim(), 2),
    ]
}

pub fn registry_with(operators: &[&FieldOperator]) -> Arc<Registry> {
    let mut builder = Registry::builder();
    for connectivity in connectivities() {
        builder.add_offset(connectivity);
    }
    for op in operators {
        builder.add_operator(*op);
    }
    builder.build().unwrap()
}

/// `add(a: Field[I], b: Field[I]) -> Field[I] = a + b`
pub fn add_operator() -> FieldOperator {
    let fi = f64_field(&[dim_i()]);
    FieldOperator {
        name: "add".to_string(),
        params: vec![param("a", fi.clone()), param("b", fi.clone())],
        returns: fi,
        body: Expr::binary(
            BinOp::Add,
            Expr::name("a", loc(2, 12)),
            Expr::name("b", loc(2, 16)),
            loc(2, 12),
        ),
        location: loc(1, 1),
    }
}

/// `shift_i(a: Field[I]) -> Field[I] = a(Ioff[1])`
pub fn shift_operator() -> FieldOperator {
    let fi = f64_field(&[dim_i()]);
    FieldOperator {
        name: "shift_i".to_string(),
        params: vec![param("a", fi.clone())],
        returns: fi,
        body: Expr::shift(
            Expr::name("a", loc(2, 12)),
            OffsetRef {
                name: "Ioff".to_string(),
                index: Some(1),
                location: loc(2, 14),
            },
            loc(2, 12),
        ),
        location: loc(1, 1),
    }
}

pub fn operator(
    name: &str,
    params: Vec<Param>,
    returns: Type,
    body: Expr,
) -> FieldOperator {
    FieldOperator {
        name: name.to_string(),
        params,
        returns,
        body,
        location: loc(1, 1),
    }
}

/// Deduce every operator against `registry`, keyed by name
pub fn typed_operators(
    registry: &Registry,
    operators: &[&FieldOperator],
) -> IndexMap<String, TypedFieldOperator> {
    operators
        .iter()
        .map(|op| (op.name.clone(), deduce_operator(registry, op).unwrap()))
        .collect()
}

/// `out = operator(args...)` on `line`; the operator token sits at column 11
pub fn call(
    operator: &str,
    args: &[&str],
    out: &str,
    line: usize,
) -> Stmt {
    Stmt::Call(CallStmt {
        operator: operator.to_string(),
        operator_location: loc(line, 11),
        args: args
            .iter()
            .enumerate()
            .map(|(i, a)| Arg::name(*a, loc(line, 15 + 3 * i)))
            .collect(),
        outs: vec![Target::new(out, loc(line, 5))],
        domain: None,
        location: loc(line, 5),
    })
}

pub fn program(
    params: Vec<ProgramParam>,
    body: Vec<Stmt>,
) -> Program {
    Program {
        name: "prog".to_string(),
        params,
        body,
        location: loc(1, 1),
    }
}

pub fn pparam(
    name: &str,
    ty: Type,
) -> ProgramParam {
    ProgramParam::new(name, ty, loc(1, 1))
}
