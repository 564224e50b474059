//! End-to-end behaviour of the four reference scenarios

use crate::common::*;
use fieldview::frontend::operator::{BinOp, Expr, FieldOperator, OffsetRef, Param};
use fieldview::frontend::program_from_operator;
use fieldview::middle::ExprKind;
use fieldview::util::config::CompileConfig;
use fieldview::{ErrorKind, Stage, UnitState};

/// `add(a, b) = a + b` 完整编译到程序单元
#[test]
fn test_scenario_add_end_to_end() {
    let add = binary_operator("add", BinOp::Add, &[dim_i()]);
    let batch = cartesian_batch()
        .with_program(program_from_operator(&add).unwrap())
        .with_operator(add);
    let result = batch.compile(&CompileConfig::default()).unwrap();
    assert!(result.is_success());

    let op = result.operator("add").unwrap();
    assert_eq!(op.state, UnitState::Validated);
    let function = op.output.as_ref().unwrap();
    assert_eq!(function.body.to_string(), "apply(plus, deref(a), deref(b))");
    assert!(matches!(function.body.kind, ExprKind::Apply { .. }));

    let unit = result.programs[0].output.as_ref().unwrap();
    assert_eq!(
        unit.statements[0].to_string(),
        "out ← add(a, b) @ {I: [0, out_size_0)}"
    );
    assert!(unit.symbol("out_size_0").is_some());
}

/// 未声明的偏移：UndefinedSymbol 指向偏移记号
#[test]
fn test_scenario_undeclared_offset() {
    let ty = f64_field(&[dim_i()]);
    let op = FieldOperator {
        name: "shifted".to_string(),
        params: vec![Param::new("b", ty.clone(), loc(1, 10))],
        returns: ty,
        body: Expr::shift(
            Expr::name("b", loc(3, 12)),
            OffsetRef {
                name: "shift_to_J".to_string(),
                index: None,
                location: loc(3, 14),
            },
            loc(3, 12),
        ),
        location: loc(1, 1),
    };
    let result = cartesian_batch()
        .with_operator(op)
        .compile(&CompileConfig::default())
        .unwrap();
    let report = result.operator("shifted").unwrap();
    assert_eq!(report.state, UnitState::Failed);
    assert!(report.output.is_none());
    let diagnostic = report.diagnostic.as_ref().unwrap();
    assert_eq!(diagnostic.kind, ErrorKind::UndefinedSymbol);
    assert_eq!(diagnostic.stage, Stage::TypeDeduction);
    assert_eq!(diagnostic.location, loc(3, 14));
    assert_eq!(diagnostic.offending, "shift_to_J");
}

/// 输出维度与算子返回维度不符
#[test]
fn test_scenario_output_dimension_mismatch() {
    let op = binary_operator("op", BinOp::Add, &[dim_i()]);
    let fi = f64_field(&[dim_i()]);
    let prog = program(
        "mismatch",
        vec![
            shaped("x", fi.clone()),
            shaped("y", fi),
            shaped("out", f64_field(&[dim_i(), dim_j()])),
        ],
        vec![call("op", &["x", "y"], "out", 4)],
    );
    let result = cartesian_batch()
        .with_operator(op)
        .with_program(prog)
        .compile(&CompileConfig::default())
        .unwrap();

    assert_eq!(result.operator("op").unwrap().state, UnitState::Validated);
    let report = result.program("mismatch").unwrap();
    assert_eq!(report.state, UnitState::Failed);
    let diagnostic = report.diagnostic.as_ref().unwrap();
    assert_eq!(diagnostic.kind, ErrorKind::DimensionMismatch);
    assert!(diagnostic.message.contains("`out`"));
    assert!(diagnostic.message.contains("`op`"));
}

/// 两条语句写同一输出
#[test]
fn test_scenario_double_write() {
    let add = binary_operator("add", BinOp::Add, &[dim_i()]);
    let fi = f64_field(&[dim_i()]);
    let prog = program(
        "twice",
        vec![shaped("x", fi.clone()), shaped("y", fi.clone()), shaped("out", fi)],
        vec![
            call("add", &["x", "y"], "out", 2),
            call("add", &["y", "x"], "out", 3),
        ],
    );
    let result = cartesian_batch()
        .with_operator(add)
        .with_program(prog)
        .compile(&CompileConfig::default())
        .unwrap();
    let diagnostic = result
        .program("twice")
        .and_then(|r| r.diagnostic.as_ref())
        .unwrap();
    assert_eq!(diagnostic.kind, ErrorKind::MultipleAssignment);
    assert_eq!(diagnostic.offending, "out");
    assert_eq!(diagnostic.related, vec![loc(2, 5), loc(3, 5)]);
}
