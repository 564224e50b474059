//! Batch driver: ordering, isolation, cancellation and file round trips

use crate::common::*;
use fieldview::frontend::operator::{BinOp, Expr, FieldOperator, Param};
use fieldview::frontend::pipeline::{load_batch, save_batch};
use fieldview::frontend::registry::Connectivity;
use fieldview::frontend::types::make_function;
use fieldview::util::config::{load_config, CompileConfig};
use fieldview::util::span::SourceLocation;
use fieldview::{compile_file, CancellationToken, ErrorKind, Stage, UnitState};
use tempfile::TempDir;

fn stencil_batch() -> fieldview::Batch {
    let fik = f64_field(&[dim_i(), dim_k()]);
    let smooth = FieldOperator {
        name: "smooth".to_string(),
        params: vec![
            Param::new("f", fik.clone(), loc(1, 10)),
            Param::new("g", fik.clone(), loc(1, 20)),
        ],
        returns: fik.clone(),
        body: Expr::call(
            "add",
            vec![
                Expr::call("laplace", vec![Expr::name("f", loc(2, 20))], loc(2, 12)),
                Expr::name("g", loc(2, 24)),
            ],
            loc(2, 8),
        ),
        location: loc(1, 1),
    };
    let prog = program(
        "step",
        vec![
            shaped("f", fik.clone()),
            shaped("g", fik.clone()),
            shaped("out", fik),
        ],
        vec![call("smooth", &["f", "g"], "out", 2)],
    );
    cartesian_batch()
        .with_operator(binary_operator("add", BinOp::Add, &[dim_i(), dim_k()]))
        .with_operator(laplace_operator())
        .with_operator(smooth)
        .with_program(prog)
}

/// 测试多层内联后的程序单元
#[test]
fn test_nested_inlining_compiles() {
    let result = stencil_batch().compile(&CompileConfig::default()).unwrap();
    assert!(result.is_success(), "{:?}", result.diagnostics().collect::<Vec<_>>());

    let names: Vec<&str> = result.operators.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["add", "laplace", "smooth"]);

    let unit = result.program("step").unwrap().output.as_ref().unwrap();
    assert_eq!(unit.functions.len(), 1);
    let smooth = &unit.functions["smooth"];
    let rendered = smooth.body.to_string();
    // laplace is inlined while lowering the first argument of add
    assert!(rendered.starts_with("let __tmp_1 = lift(λ(f) → let __tmp_0 = f in "));
    assert!(rendered.contains("shift(__tmp_0, Ioff, 1)"));
    assert!(rendered.contains("shift(__tmp_0, Ioff, -1)"));
    assert!(!rendered.contains("laplace"));
    assert_eq!(
        unit.statements[0].domain.to_string(),
        "{I: [0, out_size_0), K: [0, out_size_1)}"
    );
}

/// 串行与并行编译结果一致
#[test]
fn test_parallel_matches_sequential() {
    let batch = stencil_batch();
    let parallel = batch.compile(&CompileConfig::default()).unwrap();
    let sequential = batch
        .compile(&CompileConfig {
            parallel: false,
            ..CompileConfig::default()
        })
        .unwrap();
    assert_eq!(parallel.operators, sequential.operators);
    assert_eq!(parallel.programs, sequential.programs);
}

/// 一个单元失败不影响其他单元
#[test]
fn test_failure_is_isolated_to_its_unit() {
    let ty = f64_field(&[dim_i()]);
    let broken = FieldOperator {
        name: "broken".to_string(),
        params: vec![Param::new("a", ty.clone(), loc(1, 10))],
        returns: ty,
        body: Expr::name("missing", loc(2, 5)),
        location: loc(1, 1),
    };
    let result = cartesian_batch()
        .with_operator(broken)
        .with_operator(binary_operator("add", BinOp::Add, &[dim_i()]))
        .compile(&CompileConfig::default())
        .unwrap();
    assert!(!result.is_success());
    assert_eq!(result.operators[0].state, UnitState::Failed);
    assert_eq!(result.operators[1].state, UnitState::Validated);
    assert_eq!(result.diagnostics().count(), 1);
}

/// 调用了推导失败的算子：降级阶段报未定义符号
#[test]
fn test_caller_of_failed_operator_fails_in_lowering() {
    let ty = f64_field(&[dim_i()]);
    let broken = FieldOperator {
        name: "broken".to_string(),
        params: vec![Param::new("a", ty.clone(), loc(1, 10))],
        returns: ty.clone(),
        body: Expr::name("missing", loc(2, 5)),
        location: loc(1, 1),
    };
    let caller = FieldOperator {
        name: "caller".to_string(),
        params: vec![Param::new("x", ty.clone(), loc(4, 10))],
        returns: ty,
        body: Expr::call("broken", vec![Expr::name("x", loc(5, 12))], loc(5, 5)),
        location: loc(4, 1),
    };
    let result = cartesian_batch()
        .with_operator(broken)
        .with_operator(caller)
        .compile(&CompileConfig::default())
        .unwrap();
    let report = result.operator("caller").unwrap();
    assert_eq!(report.state, UnitState::Failed);
    let diagnostic = report.diagnostic.as_ref().unwrap();
    assert_eq!(diagnostic.stage, Stage::Lowering);
    assert_eq!(diagnostic.kind, ErrorKind::UndefinedSymbol);
}

#[test]
fn test_cancelled_batch_marks_units() {
    let token = CancellationToken::new();
    token.cancel();
    let result = stencil_batch()
        .compile_with_token(&CompileConfig::default(), &token)
        .unwrap();
    assert!(result.operators.iter().all(|r| r.state == UnitState::Cancelled));
    assert!(result.programs.iter().all(|r| r.state == UnitState::Cancelled));
    assert_eq!(result.diagnostics().count(), 0);
    assert!(!result.is_success());
}

#[test]
fn test_validation_can_be_skipped() {
    let config = CompileConfig {
        validate: false,
        ..CompileConfig::default()
    };
    let result = stencil_batch().compile(&config).unwrap();
    assert!(result.is_success());
    assert!(result.operators.iter().all(|r| r.state == UnitState::Lowered));
}

/// 注册表冲突使整批失败
#[test]
fn test_registry_conflict_fails_the_batch() {
    let err = cartesian_batch()
        .with_offset(Connectivity::cartesian("Ioff", dim_i()).with_location(loc(9, 1)))
        .compile(&CompileConfig::default())
        .unwrap_err();
    assert_eq!(err.stage, Stage::Registry);
    assert_eq!(err.kind, ErrorKind::DuplicateDefinition);
    assert_eq!(err.location, loc(9, 1));
}

/// 测试偏移诊断带有声明位置
#[test]
fn test_offset_diagnostics_carry_declaration_site() {
    let err = fieldview::Batch::new()
        .with_offset(Connectivity::cartesian("Ioff", dim_i()).with_location(loc(1, 1)))
        .with_offset(Connectivity::cartesian("Ioff", dim_i()).with_location(loc(2, 1)))
        .compile(&CompileConfig::default())
        .unwrap_err();
    assert_eq!(err.location, loc(2, 1));
    assert_eq!(err.related, vec![loc(1, 1)]);
    assert!(err.to_string().contains("stencil.py"));

    let skewed = Connectivity {
        targets: vec![dim_j()],
        ..Connectivity::cartesian("Skew", dim_i()).with_location(loc(3, 1))
    };
    let err = fieldview::Batch::new()
        .with_offset(skewed)
        .compile(&CompileConfig::default())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DimensionMismatch);
    assert_eq!(err.location, loc(3, 1));
}

/// 旧的批次文件没有偏移位置字段
#[test]
fn test_offset_location_defaults_when_absent() {
    let batch = fieldview::Batch::new()
        .with_offset(Connectivity::cartesian("Ioff", dim_i()).with_location(loc(1, 1)));
    let mut json = serde_json::to_value(&batch).unwrap();
    json["offsets"][0].as_object_mut().unwrap().remove("location");
    let batch: fieldview::Batch = serde_json::from_value(json).unwrap();
    assert_eq!(batch.offsets[0].location, SourceLocation::dummy());
}

#[test]
fn test_batch_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("batch.json");
    let batch = stencil_batch();
    save_batch(&batch, &path).unwrap();
    assert_eq!(load_batch(&path).unwrap(), batch);

    let result = compile_file(&path, &load_config(&dir.path().join("fieldview.toml")).unwrap())
        .unwrap();
    assert!(result.is_success());
}

#[test]
fn test_missing_batch_file_has_context() {
    let dir = TempDir::new().unwrap();
    let err = load_batch(&dir.path().join("absent.json")).unwrap_err();
    assert!(err.to_string().contains("Failed to read batch"));
}

/// 测试签名中的函数类型在注册阶段被拒绝
#[test]
fn test_function_typed_signature_is_rejected() {
    let fi = f64_field(&[dim_i()]);
    let higher = FieldOperator {
        name: "higher".to_string(),
        params: vec![Param::new("a", fi.clone(), loc(1, 10))],
        returns: make_function(vec![fi.clone()], fi),
        body: Expr::name("a", loc(2, 5)),
        location: loc(1, 1),
    };
    let err = cartesian_batch()
        .with_operator(higher)
        .compile(&CompileConfig::default())
        .unwrap_err();
    assert_eq!(err.stage, Stage::Registry);
    assert_eq!(err.kind, ErrorKind::UnsupportedOperation);
    assert_eq!(err.location, loc(1, 1));
    assert_eq!(err.offending, "higher");
}
