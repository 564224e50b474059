//! IR 校验
//!
//! Structural checks run after lowering. A failure here is always a defect of
//! an earlier pass and is reported as an internal invariant violation.

#![allow(clippy::result_large_err)]

use crate::frontend::program::ast::Bound;
use crate::frontend::program::type_deduction::output_dims;
use crate::frontend::types::{is_equivalent, Dims, Type};
use crate::middle::ir::{Expr, ExprKind, FunctionDefinition, ProgramUnit};
use crate::util::diagnostic::{Diagnostic, Result, Stage};
use crate::util::span::SourceLocation;
use std::collections::HashSet;
use tracing::trace;

const STAGE: Stage = Stage::Validation;

fn violation(
    message: impl Into<String>,
    offending: impl Into<String>,
) -> Diagnostic {
    Diagnostic::internal(STAGE, SourceLocation::dummy(), message).with_offending(offending)
}

/// Check one lowered operator body
pub fn validate_function(function: &FunctionDefinition) -> Result<()> {
    trace!("validating function `{}`", function.name);
    let mut scope: Vec<&str> = function.params.iter().map(|p| p.name.as_str()).collect();
    let unique: HashSet<&str> = scope.iter().copied().collect();
    if unique.len() != scope.len() {
        return Err(violation(
            format!("function `{}` repeats a parameter name", function.name),
            &function.name,
        ));
    }
    check_expr(&function.body, &mut scope).map_err(|err| {
        let message = format!("in `{}`: {}", function.name, err.message);
        Diagnostic { message, ..err }
    })
}

fn check_expr<'e>(
    expr: &'e Expr,
    scope: &mut Vec<&'e str>,
) -> Result<()> {
    if expr.ty.contains_function() {
        return Err(violation(
            format!("node carries function type {}", expr.ty),
            expr.to_string(),
        ));
    }
    match &expr.kind {
        ExprKind::SymRef(name) => {
            if !scope.contains(&name.as_str()) {
                return Err(violation(format!("unbound symbol `{}`", name), name));
            }
        }
        ExprKind::Deref(inner) => {
            check_same(expr, &inner.ty, "deref")?;
            check_expr(inner, scope)?;
        }
        ExprKind::Let { name, value, body } => {
            check_expr(value, scope)?;
            check_same(expr, &body.ty, "let")?;
            scope.push(name);
            let result = check_expr(body, scope);
            scope.pop();
            result?;
        }
        ExprKind::Lift { params, body, args } => {
            if params.len() != args.len() {
                return Err(violation(
                    format!(
                        "lift binds {} parameters to {} arguments",
                        params.len(),
                        args.len()
                    ),
                    expr.to_string(),
                ));
            }
            for (param, arg) in params.iter().zip(args) {
                if !is_equivalent(&param.ty, &arg.ty) {
                    return Err(violation(
                        format!(
                            "lift parameter `{}` is {} but receives {}",
                            param.name, param.ty, arg.ty
                        ),
                        expr.to_string(),
                    ));
                }
                check_expr(arg, scope)?;
            }
            check_same(expr, &body.ty, "lift")?;
            let depth = scope.len();
            scope.extend(params.iter().map(|p| p.name.as_str()));
            let result = check_expr(body, scope);
            scope.truncate(depth);
            result?;
        }
        _ => {
            for child in expr.children() {
                check_expr(child, scope)?;
            }
        }
    }
    Ok(())
}

fn check_same(
    expr: &Expr,
    operand: &Type,
    what: &str,
) -> Result<()> {
    if is_equivalent(&expr.ty, operand) {
        Ok(())
    } else {
        Err(violation(
            format!(
                "{} node has type {} but its operand has {}",
                what, expr.ty, operand
            ),
            expr.to_string(),
        ))
    }
}

/// Check a whole program unit, functions included
pub fn validate_program(unit: &ProgramUnit) -> Result<()> {
    trace!("validating program `{}`", unit.name);
    for function in unit.functions.values() {
        validate_function(function)?;
    }

    for stmt in &unit.statements {
        let rendered = stmt.to_string();
        let function = unit.functions.get(&stmt.operator).ok_or_else(|| {
            violation(
                format!("statement calls `{}` which the unit does not define", stmt.operator),
                &rendered,
            )
        })?;
        if function.params.len() != stmt.args.len() {
            return Err(violation(
                format!(
                    "`{}` takes {} arguments, statement passes {}",
                    stmt.operator,
                    function.params.len(),
                    stmt.args.len()
                ),
                &rendered,
            ));
        }
        for arg in &stmt.args {
            match &arg.kind {
                ExprKind::SymRef(name) if unit.symbol(name).is_some() => {}
                ExprKind::Literal(_) => {}
                _ => {
                    return Err(violation(
                        format!("argument `{}` is not a program symbol or literal", arg),
                        &rendered,
                    ))
                }
            }
        }

        let domain: Dims = stmt.domain.dims().cloned().collect();
        for output in &stmt.outputs {
            let symbol = unit.symbol(output).ok_or_else(|| {
                violation(format!("output `{}` is not a program symbol", output), &rendered)
            })?;
            if output_dims(&symbol.ty).as_ref() != Some(&domain) {
                return Err(violation(
                    format!(
                        "domain {} does not cover exactly the dimensions of `{}` ({})",
                        stmt.domain, output, symbol.ty
                    ),
                    &rendered,
                ));
            }
        }

        for range in &stmt.domain.ranges {
            for bound in [&range.start, &range.stop] {
                if let Bound::Symbol(name) = bound {
                    let integral = unit
                        .symbol(name)
                        .is_some_and(|p| matches!(p.ty, Type::Scalar(kind) if kind.is_integral()));
                    if !integral {
                        return Err(violation(
                            format!("domain bound `{}` is not an integer parameter", name),
                            &rendered,
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}
