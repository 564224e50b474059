//! Builders shared by the integration tests

use fieldview::frontend::operator::{BinOp, Expr, FieldOperator, Literal, OffsetRef, Param};
use fieldview::frontend::program::{Arg, CallStmt, Extent, Program, ProgramParam, Stmt, Target};
use fieldview::frontend::registry::Connectivity;
use fieldview::frontend::types::{make_field, Dimension, ScalarKind, Type};
use fieldview::util::span::SourceLocation;
use fieldview::Batch;

pub fn loc(
    line: usize,
    column: usize,
) -> SourceLocation {
    SourceLocation::at("stencil.py", line, column)
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

pub fn f64_field(dims: &[Dimension]) -> Type {
    make_field(ScalarKind::Float64, dims.iter().cloned()).unwrap()
}

pub fn binary_operator(
    name: &str,
    op: BinOp,
    dims: &[Dimension],
) -> FieldOperator {
    let ty = f64_field(dims);
    FieldOperator {
        name: name.to_string(),
        params: vec![
            Param::new("a", ty.clone(), loc(1, 10)),
            Param::new("b", ty.clone(), loc(1, 25)),
        ],
        returns: ty,
        body: Expr::binary(
            op,
            Expr::name("a", loc(2, 12)),
            Expr::name("b", loc(2, 16)),
            loc(2, 12),
        ),
        location: loc(1, 1),
    }
}

/// `laplace(f) = f(Ioff[1]) + f(Ioff[-1]) - 2 * f` over `I, K`
pub fn laplace_operator() -> FieldOperator {
    let ty = f64_field(&[dim_i(), dim_k()]);
    let shifted = |index: i64, column: usize| {
        Expr::shift(
            Expr::name("f", loc(2, column)),
            OffsetRef {
                name: "Ioff".to_string(),
                index: Some(index),
                location: loc(2, column + 2),
            },
            loc(2, column),
        )
    };
    FieldOperator {
        name: "laplace".to_string(),
        params: vec![Param::new("f", ty.clone(), loc(1, 12))],
        returns: ty,
        body: Expr::binary(
            BinOp::Sub,
            Expr::binary(BinOp::Add, shifted(1, 12), shifted(-1, 24), loc(2, 12)),
            Expr::binary(
                BinOp::Mul,
                Expr::literal(Literal::float64(2.0), loc(2, 38)),
                Expr::name("f", loc(2, 42)),
                loc(2, 38),
            ),
            loc(2, 12),
        ),
        location: loc(1, 1),
    }
}

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

pub fn shaped(
    name: &str,
    ty: Type,
) -> ProgramParam {
    let rank = ty.dims().map_or(0, |dims| dims.len());
    let param = ProgramParam::new(name, ty, loc(1, 1));
    if rank == 0 {
        param
    } else {
        param.with_shape(vec![Extent::Runtime; rank])
    }
}

pub fn program(
    name: &str,
    params: Vec<ProgramParam>,
    body: Vec<Stmt>,
) -> Program {
    Program {
        name: name.to_string(),
        params,
        body,
        location: loc(1, 1),
    }
}

/// Cartesian offsets `Ioff`, `Joff`, `Koff`
pub fn cartesian_batch() -> Batch {
    Batch::new()
        .with_offset(Connectivity::cartesian("Ioff", dim_i()))
        .with_offset(Connectivity::cartesian("Joff", dim_j()))
        .with_offset(Connectivity::cartesian("Koff", dim_k()))
}
