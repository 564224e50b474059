//! 降级的确定性与类型保持（proptest）

use crate::common::*;
use fieldview::frontend::operator::{BinOp, Expr, FieldOperator, Literal, OffsetRef, Param};
use fieldview::frontend::program_from_operator;
use fieldview::util::config::CompileConfig;
use fieldview::UnitState;
use proptest::prelude::*;

fn leaf() -> impl Strategy<Value = Expr> {
    prop_oneof![
        Just(Expr::name("a", loc(2, 1))),
        Just(Expr::name("b", loc(2, 1))),
        (-3i64..=3).prop_map(|index| Expr::shift(
            Expr::name("a", loc(2, 1)),
            OffsetRef {
                name: "Ioff".to_string(),
                index: Some(index),
                location: loc(2, 3),
            },
            loc(2, 1),
        )),
        (0u8..10).prop_map(|n| Expr::literal(Literal::float64(n as f64), loc(2, 1))),
    ]
}

/// Random bodies over `a`, `b`, shifts, literals and calls to `add`
fn body() -> impl Strategy<Value = Expr> {
    leaf().prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone(), prop_oneof![
                Just(BinOp::Add),
                Just(BinOp::Sub),
                Just(BinOp::Mul),
            ])
                .prop_map(|(l, r, op)| Expr::binary(op, l, r, loc(3, 1))),
            (inner.clone(), inner).prop_map(|(l, r)| {
                // both arguments must be `Field[I]` to match the signature of add
                let l = Expr::binary(BinOp::Add, l, Expr::name("a", loc(4, 5)), loc(4, 5));
                let r = Expr::binary(BinOp::Add, r, Expr::name("b", loc(4, 9)), loc(4, 9));
                Expr::call("add", vec![l, r], loc(4, 1))
            }),
        ]
    })
}

/// Bodies that mention at least one field so the result is `Field[I]`
fn field_body() -> impl Strategy<Value = Expr> {
    body().prop_map(|b| Expr::binary(BinOp::Add, b, Expr::name("a", loc(5, 1)), loc(5, 1)))
}

fn operator_with(body: Expr) -> FieldOperator {
    let ty = f64_field(&[dim_i()]);
    FieldOperator {
        name: "generated".to_string(),
        params: vec![
            Param::new("a", ty.clone(), loc(1, 1)),
            Param::new("b", ty.clone(), loc(1, 1)),
        ],
        returns: ty,
        body,
        location: loc(1, 1),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// 同一批次编译两次得到完全相同的 IR
    #[test]
    fn prop_lowering_is_deterministic(body in field_body()) {
        let op = operator_with(body);
        let batch = cartesian_batch()
            .with_operator(binary_operator("add", BinOp::Add, &[dim_i()]))
            .with_program(program_from_operator(&op).unwrap())
            .with_operator(op);
        let config = CompileConfig::default();
        let first = batch.compile(&config).unwrap();
        let second = batch.compile(&config).unwrap();
        prop_assert_eq!(&first.operators, &second.operators);
        prop_assert_eq!(&first.programs, &second.programs);
    }

    /// 降级结果的类型与声明的返回类型一致，且通过校验
    #[test]
    fn prop_lowering_preserves_types(body in field_body()) {
        let op = operator_with(body);
        let declared = op.returns.clone();
        let result = cartesian_batch()
            .with_operator(binary_operator("add", BinOp::Add, &[dim_i()]))
            .with_operator(op)
            .compile(&CompileConfig::default())
            .unwrap();
        let report = result.operator("generated").unwrap();
        prop_assert_eq!(report.state, UnitState::Validated);
        let function = report.output.as_ref().unwrap();
        prop_assert_eq!(function.returns(), &declared);
    }
}
