//! 程序类型推断测试

use crate::frontend::operator::ast::{FieldOperator, Literal};
use crate::frontend::program::*;
use crate::frontend::types::*;
use crate::testing::*;
use crate::util::diagnostic::{ErrorKind, Stage};

#[test]
fn test_simple_program() {
    let add = add_operator();
    let registry = registry_with(&[&add]);
    let fi = f64_field(&[dim_i()]);
    let prog = program(
        vec![
            pparam("x", fi.clone()),
            pparam("y", fi.clone()),
            pparam("out", fi.clone()),
        ],
        vec![call("add", &["x", "y"], "out", 2)],
    );
    let typed = deduce_program(&registry, &prog).unwrap();
    let stmt = typed.calls().next().unwrap();
    assert_eq!(stmt.outs[0].ty, fi);
    assert!(stmt.args.iter().all(|a| a.ty == fi));
}

/// 输出维度多于算子返回值时报 DimensionMismatch，并指明 out 与 op
#[test]
fn test_output_dimension_mismatch_names_out_and_op() {
    let mut op = add_operator();
    op.name = "op".to_string();
    let registry = registry_with(&[&op]);
    let fi = f64_field(&[dim_i()]);
    let prog = program(
        vec![
            pparam("x", fi.clone()),
            pparam("y", fi.clone()),
            pparam("out", f64_field(&[dim_i(), dim_j()])),
        ],
        vec![call("op", &["x", "y"], "out", 4)],
    );
    let err = deduce_program(&registry, &prog).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DimensionMismatch);
    assert_eq!(err.stage, Stage::TypeDeduction);
    assert!(err.message.contains("`out`"));
    assert!(err.message.contains("`op`"));
}

/// 两条语句写同一输出
#[test]
fn test_double_write_is_rejected() {
    let add = add_operator();
    let registry = registry_with(&[&add]);
    let fi = f64_field(&[dim_i()]);
    let prog = program(
        vec![
            pparam("x", fi.clone()),
            pparam("y", fi.clone()),
            pparam("out", fi.clone()),
        ],
        vec![
            call("add", &["x", "y"], "out", 2),
            call("add", &["y", "x"], "out", 3),
        ],
    );
    let err = deduce_program(&registry, &prog).unwrap_err();
    assert_eq!(err.kind, ErrorKind::MultipleAssignment);
    assert_eq!(err.offending, "out");
    assert_eq!(err.related, vec![loc(2, 5), loc(3, 5)]);
}

#[test]
fn test_declaration_is_visible_to_later_statements_only() {
    let add = add_operator();
    let registry = registry_with(&[&add]);
    let fi = f64_field(&[dim_i()]);
    let tmp = Stmt::Declare(Declaration {
        name: "tmp".to_string(),
        ty: fi.clone(),
        shape: Some(vec![Extent::Fixed(8)]),
        location: loc(2, 1),
    });

    let ok = program(
        vec![pparam("x", fi.clone()), pparam("out", fi.clone())],
        vec![
            tmp.clone(),
            call("add", &["x", "x"], "tmp", 3),
            call("add", &["tmp", "x"], "out", 4),
        ],
    );
    assert!(deduce_program(&registry, &ok).is_ok());

    let early = program(
        vec![pparam("x", fi.clone()), pparam("out", fi.clone())],
        vec![call("add", &["x", "x"], "tmp", 2), tmp],
    );
    let err = deduce_program(&registry, &early).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedSymbol);
    assert_eq!(err.offending, "tmp");
}

#[test]
fn test_unknown_operator_and_arity() {
    let add = add_operator();
    let registry = registry_with(&[&add]);
    let fi = f64_field(&[dim_i()]);
    let params = vec![pparam("x", fi.clone()), pparam("out", fi.clone())];

    let err = deduce_program(
        &registry,
        &program(params.clone(), vec![call("sub", &["x", "x"], "out", 2)]),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedSymbol);
    assert_eq!(err.location, loc(2, 11));

    let err = deduce_program(
        &registry,
        &program(params, vec![call("add", &["x"], "out", 2)]),
    )
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch);
}

#[test]
fn test_scalar_output_is_rejected() {
    let mut op = add_operator();
    let s = make_scalar(ScalarKind::Float64);
    op.params = vec![param("a", s.clone()), param("b", s.clone())];
    op.returns = s.clone();
    let registry = registry_with(&[&op]);
    let prog = program(
        vec![pparam("x", s.clone()), pparam("out", s)],
        vec![call("add", &["x", "x"], "out", 2)],
    );
    let err = deduce_program(&registry, &prog).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedOperation);
}

#[test]
fn test_literal_argument_and_explicit_domain() {
    let mut op = add_operator();
    op.params[1].ty = make_scalar(ScalarKind::Float64);
    let registry = registry_with(&[&op]);
    let fi = f64_field(&[dim_i()]);
    let mut stmt = CallStmt {
        operator: "add".to_string(),
        operator_location: loc(2, 11),
        args: vec![
            Arg::name("x", loc(2, 15)),
            Arg::literal(Literal::float64(1.0), loc(2, 18)),
        ],
        outs: vec![Target::new("out", loc(2, 5))],
        domain: Some(Domain {
            ranges: vec![DomainRange::new(
                dim_i(),
                Bound::Const(0),
                Bound::Symbol("n".to_string()),
            )],
            location: loc(2, 30),
        }),
        location: loc(2, 5),
    };
    let params = vec![
        pparam("x", fi.clone()),
        pparam("out", fi.clone()),
        pparam("n", make_scalar(ScalarKind::Int32)),
    ];
    let ok = program(params.clone(), vec![Stmt::Call(stmt.clone())]);
    assert!(deduce_program(&registry, &ok).is_ok());

    // 域的维度与输出不一致
    stmt.domain = Some(Domain {
        ranges: vec![DomainRange::new(dim_k(), Bound::Const(0), Bound::Const(4))],
        location: loc(2, 30),
    });
    let bad = program(params, vec![Stmt::Call(stmt)]);
    let err = deduce_program(&registry, &bad).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DimensionMismatch);
    assert_eq!(err.location, loc(2, 30));
}

#[test]
fn test_shape_rank_must_match() {
    let registry = registry_with(&[]);
    let prog = program(
        vec![pparam("out", f64_field(&[dim_i()])).with_shape(vec![Extent::Fixed(3), Extent::Runtime])],
        vec![],
    );
    let err = deduce_program(&registry, &prog).unwrap_err();
    assert_eq!(err.kind, ErrorKind::DimensionMismatch);
}

/// 测试把算子包装为程序
#[test]
fn test_program_from_operator() {
    let add = add_operator();
    let registry = registry_with(&[&add]);
    let prog = program_from_operator(&add).unwrap();
    let names: Vec<&str> = prog.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", OUT_PARAM]);
    assert_eq!(prog.params[2].shape, Some(vec![Extent::Runtime]));
    assert!(deduce_program(&registry, &prog).is_ok());
}

#[test]
fn test_program_from_operator_rejects_out_param() {
    let mut op: FieldOperator = add_operator();
    op.params[1].name = OUT_PARAM.to_string();
    let err = program_from_operator(&op).unwrap_err();
    assert_eq!(err.kind, ErrorKind::UnsupportedOperation);
    assert_eq!(err.offending, OUT_PARAM);
}

#[test]
fn test_tuple_outputs() {
    let fi = f64_field(&[dim_i()]);
    let fk = f64_field(&[dim_k()]);
    let pair = FieldOperator {
        name: "pair".to_string(),
        params: vec![param("a", fi.clone()), param("b", fk.clone())],
        returns: make_tuple(vec![fi.clone(), fk.clone()]),
        body: crate::frontend::operator::ast::Expr::tuple(
            vec![
                crate::frontend::operator::ast::Expr::name("a", loc(2, 2)),
                crate::frontend::operator::ast::Expr::name("b", loc(2, 5)),
            ],
            loc(2, 1),
        ),
        location: loc(1, 1),
    };
    let registry = registry_with(&[&pair]);
    let stmt = Stmt::Call(CallStmt {
        operator: "pair".to_string(),
        operator_location: loc(3, 11),
        args: vec![Arg::name("x", loc(3, 16)), Arg::name("z", loc(3, 19))],
        outs: vec![Target::new("o1", loc(3, 1)), Target::new("o2", loc(3, 5))],
        domain: None,
        location: loc(3, 1),
    });
    let prog = program(
        vec![
            pparam("x", fi.clone()),
            pparam("z", fk.clone()),
            pparam("o1", fi.clone()),
            pparam("o2", fk.clone()),
        ],
        vec![stmt],
    );
    let typed = deduce_program(&registry, &prog).unwrap();
    let outs: Vec<Type> = typed.calls().next().unwrap().outs.iter().map(|t| t.ty.clone()).collect();
    assert_eq!(outs, vec![fi, fk]);
}
