//! 算子级类型推断
//!
//! Annotates every node of a raw [`FieldOperator`] with a concrete [`Type`],
//! bottom-up. Parameters live in the root scope, each `let` opens a child
//! scope for its body.

#![allow(clippy::result_large_err)]

use super::ast::{BinOp, Expr, ExprKind, FieldOperator, OpClass, TypedExpr, TypedFieldOperator, UnOp};
use crate::frontend::builtins::{is_builtin_name, Builtin, ReduceOp};
use crate::frontend::registry::{OffsetKind, Registry};
use crate::frontend::types::{
    boolify, broadcast, check_assignable, make_field, make_scalar, make_symbol, make_tuple, unify,
    Dims, FunctionType, ScalarKind, ScopeId, SymbolTable, Type, TypeError, TypeResultExt,
};
use crate::util::diagnostic::{Diagnostic, ErrorKind, Result, Stage};
use crate::util::span::SourceLocation;
use tracing::{debug, trace};

const STAGE: Stage = Stage::TypeDeduction;

/// Deduce the types of one operator against the batch registry
pub fn deduce_operator(
    registry: &Registry,
    op: &FieldOperator,
) -> Result<TypedFieldOperator> {
    OperatorTypeDeduction::new(registry).deduce(op)
}

/// 算子类型推断器
#[derive(Debug)]
pub struct OperatorTypeDeduction<'a> {
    /// 只读注册表快照
    registry: &'a Registry,
    /// 形参与 let 绑定
    table: SymbolTable,
}

impl<'a> OperatorTypeDeduction<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            table: SymbolTable::new(),
        }
    }

    /// 推断整个算子
    pub fn deduce(
        mut self,
        op: &FieldOperator,
    ) -> Result<TypedFieldOperator> {
        debug!("Deducing types of operator `{}`", op.name);
        let root = self.table.root();

        for param in &op.params {
            if !param.ty.is_data() {
                return Err(Diagnostic::unsupported(
                    STAGE,
                    param.location.clone(),
                    format!("parameter `{}` has non-data type {}", param.name, param.ty),
                    &param.name,
                ));
            }
            self.define(&param.name, param.ty.clone(), root, &param.location)?;
        }
        if !op.returns.is_data() {
            return Err(Diagnostic::unsupported(
                STAGE,
                op.location.clone(),
                format!("operator `{}` returns non-data type {}", op.name, op.returns),
                &op.name,
            ));
        }

        let body = self.expr(&op.body, root)?;
        check_assignable(&op.returns, &body.ty).located(STAGE, &op.body.location, &op.name)?;

        debug!("Operator `{}` deduced: {}", op.name, body.ty);
        Ok(FieldOperator {
            name: op.name.clone(),
            params: op.params.clone(),
            returns: op.returns.clone(),
            body,
            location: op.location.clone(),
        })
    }

    fn define(
        &mut self,
        name: &str,
        ty: Type,
        scope: ScopeId,
        location: &SourceLocation,
    ) -> Result<()> {
        let symbol = make_symbol(name, ty, scope, location.clone())
            .map_err(|err| err.into_diagnostic(STAGE, location))?;
        self.table
            .define(symbol)
            .map_err(|err| err.into_diagnostic(STAGE, location))
    }

    fn expr(
        &mut self,
        expr: &Expr,
        scope: ScopeId,
    ) -> Result<TypedExpr> {
        let location = &expr.location;
        let (kind, ty) = match &expr.kind {
            ExprKind::Literal(lit) => {
                check_literal(&lit.value, lit.kind, location)?;
                (ExprKind::Literal(lit.clone()), make_scalar(lit.kind))
            }

            ExprKind::Name(name) => {
                let ty = match self.table.lookup(scope, name) {
                    Some(symbol) => symbol.ty.clone(),
                    None if self.registry.is_callable(name) || is_builtin_name(name) => {
                        return Err(Diagnostic::unsupported(
                            STAGE,
                            location.clone(),
                            format!("`{}` is a function and can only be called", name),
                            name,
                        ));
                    }
                    None => return Err(Diagnostic::undefined_symbol(STAGE, name, location.clone())),
                };
                (ExprKind::Name(name.clone()), ty)
            }

            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand, scope)?;
                let ok = match op {
                    UnOp::Plus | UnOp::Neg => operand.ty.is_arithmetic(),
                    UnOp::Not => operand.ty.is_logical(),
                };
                if !ok {
                    return Err(Diagnostic::unsupported(
                        STAGE,
                        location.clone(),
                        format!(
                            "unary operator `{}` is not defined for {}",
                            op.symbol().trim(),
                            operand.ty
                        ),
                        expr.to_string(),
                    ));
                }
                let ty = operand.ty.clone();
                (
                    ExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                )
            }

            ExprKind::Binary { op, left, right } => {
                let left = self.expr(left, scope)?;
                let right = self.expr(right, scope)?;
                let ty = self.binary_type(*op, &left.ty, &right.ty, expr)?;
                (
                    ExprKind::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    },
                    ty,
                )
            }

            ExprKind::Call {
                func,
                func_location,
                args,
            } => {
                if self.table.lookup(scope, func).is_some() {
                    return Err(Diagnostic::unsupported(
                        STAGE,
                        func_location.clone(),
                        format!("`{}` is a value and is not callable", func),
                        func,
                    ));
                }
                let callee = self.resolve_callee(func, func_location)?;
                let args = args
                    .iter()
                    .map(|arg| self.expr(arg, scope))
                    .collect::<Result<Vec<_>>>()?;
                let ty = match callee {
                    Callee::Builtin(builtin) => builtin_type(builtin, &args, expr)?,
                    Callee::Signature(signature) => check_call(func, &signature, &args, expr)?,
                };
                (
                    ExprKind::Call {
                        func: func.clone(),
                        func_location: func_location.clone(),
                        args,
                    },
                    ty,
                )
            }

            ExprKind::Shift { field, offset } => {
                let field = self.expr(field, scope)?;
                let connectivity = self.registry.offset(&offset.name).ok_or_else(|| {
                    Diagnostic::undefined_symbol(STAGE, &offset.name, offset.location.clone())
                })?;
                let (dtype, dims) = match &field.ty {
                    Type::Field { dtype, dims } => (*dtype, dims),
                    other => {
                        return Err(Diagnostic::unsupported(
                            STAGE,
                            location.clone(),
                            format!("cannot shift a value of type {}", other),
                            expr.to_string(),
                        ))
                    }
                };
                if !dims.contains(&connectivity.source) {
                    return Err(Diagnostic::new(
                        STAGE,
                        ErrorKind::DimensionMismatch,
                        offset.location.clone(),
                        format!(
                            "cannot shift {} by `{}`: it has no dimension `{}`",
                            field.ty, offset.name, connectivity.source
                        ),
                    )
                    .with_offending(expr.to_string()));
                }
                if let (Some(index), OffsetKind::Unstructured { max_neighbors }) =
                    (offset.index, connectivity.kind)
                {
                    if index < 0 || index as usize >= max_neighbors {
                        return Err(Diagnostic::unsupported(
                            STAGE,
                            offset.location.clone(),
                            format!(
                                "neighbor index {} out of range for `{}` ({} neighbors)",
                                index, offset.name, max_neighbors
                            ),
                            expr.to_string(),
                        ));
                    }
                }
                let ty = connectivity
                    .shifted(dtype, dims, offset.index)
                    .located(STAGE, &offset.location, &offset.name)?;
                trace!("shift by `{}`: {} -> {}", offset.name, field.ty, ty);
                (
                    ExprKind::Shift {
                        field: Box::new(field),
                        offset: offset.clone(),
                    },
                    ty,
                )
            }

            ExprKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.expr(condition, scope)?;
                if !condition.ty.is_logical() {
                    return Err(Diagnostic::new(
                        STAGE,
                        ErrorKind::TypeMismatch,
                        condition.location.clone(),
                        format!("condition must be boolean, found {}", condition.ty),
                    )
                    .with_offending(condition.to_string()));
                }
                let then_branch = self.expr(then_branch, scope)?;
                let else_branch = self.expr(else_branch, scope)?;
                let rendered = expr.to_string();
                let unified =
                    unify(&then_branch.ty, &else_branch.ty).located(STAGE, location, &rendered)?;
                let empty = Dims::new();
                let ty = broadcast(&unified, condition.ty.dims().unwrap_or(&empty)).located(
                    STAGE,
                    location,
                    &rendered,
                )?;
                (
                    ExprKind::Conditional {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    ty,
                )
            }

            ExprKind::Let {
                name,
                annotation,
                value,
                body,
            } => {
                let value = self.expr(value, scope)?;
                if let Some(annotation) = annotation {
                    check_assignable(annotation, &value.ty).located(STAGE, location, name)?;
                }
                let inner = self.table.child(scope);
                self.define(name, value.ty.clone(), inner, location)?;
                let body = self.expr(body, inner)?;
                let ty = body.ty.clone();
                (
                    ExprKind::Let {
                        name: name.clone(),
                        annotation: annotation.clone(),
                        value: Box::new(value),
                        body: Box::new(body),
                    },
                    ty,
                )
            }

            ExprKind::Tuple(elements) => {
                let elements = elements
                    .iter()
                    .map(|e| self.expr(e, scope))
                    .collect::<Result<Vec<_>>>()?;
                let ty = make_tuple(elements.iter().map(|e| e.ty.clone()).collect());
                (ExprKind::Tuple(elements), ty)
            }

            ExprKind::Subscript { value, index } => {
                let value = self.expr(value, scope)?;
                let ty = match &value.ty {
                    Type::Tuple(elements) => elements.get(*index).cloned().ok_or_else(|| {
                        Diagnostic::unsupported(
                            STAGE,
                            location.clone(),
                            format!(
                                "index {} out of range for {}-element tuple",
                                index,
                                elements.len()
                            ),
                            expr.to_string(),
                        )
                    })?,
                    other => {
                        return Err(Diagnostic::unsupported(
                            STAGE,
                            location.clone(),
                            format!("cannot subscript a value of type {}", other),
                            expr.to_string(),
                        ))
                    }
                };
                (
                    ExprKind::Subscript {
                        value: Box::new(value),
                        index: *index,
                    },
                    ty,
                )
            }

            ExprKind::Reduce {
                op,
                operand,
                axis,
                axis_location,
            } => {
                let operand = self.expr(operand, scope)?;
                let ty = reduce_type(*op, &operand.ty, axis, axis_location, expr)?;
                (
                    ExprKind::Reduce {
                        op: *op,
                        operand: Box::new(operand),
                        axis: axis.clone(),
                        axis_location: axis_location.clone(),
                    },
                    ty,
                )
            }
        };

        Ok(Expr {
            kind,
            ty,
            location: location.clone(),
        })
    }

    fn binary_type(
        &self,
        op: BinOp,
        left: &Type,
        right: &Type,
        expr: &Expr,
    ) -> Result<Type> {
        let class = op.class();
        let ok = match class {
            OpClass::Arithmetic => left.is_arithmetic() && right.is_arithmetic(),
            OpClass::Logical => left.is_logical() && right.is_logical(),
            OpClass::Comparison => {
                (left.is_arithmetic() && right.is_arithmetic())
                    || (matches!(op, BinOp::Eq | BinOp::Neq)
                        && left.is_logical()
                        && right.is_logical())
            }
        };
        if !ok {
            return Err(Diagnostic::unsupported(
                STAGE,
                expr.location.clone(),
                format!(
                    "operator `{}` is not defined for {} and {}",
                    op.symbol(),
                    left,
                    right
                ),
                expr.to_string(),
            ));
        }
        let unified = unify(left, right).located(STAGE, &expr.location, &expr.to_string())?;
        if class != OpClass::Comparison {
            return Ok(unified);
        }
        boolify(&unified).ok_or_else(|| {
            Diagnostic::internal(
                STAGE,
                expr.location.clone(),
                format!("comparison produced non-boolifiable type {}", unified),
            )
        })
    }

    fn resolve_callee(
        &self,
        func: &str,
        func_location: &SourceLocation,
    ) -> Result<Callee> {
        if let Some(builtin) = Builtin::lookup(func) {
            return Ok(Callee::Builtin(builtin));
        }
        if let Some(signature) = self.registry.operator(func) {
            return Ok(Callee::Signature(signature.function_type()));
        }
        if let Some(function) = self.registry.function(func) {
            return Ok(Callee::Signature(function.clone()));
        }
        if ReduceOp::from_name(func).is_some() {
            return Err(Diagnostic::unsupported(
                STAGE,
                func_location.clone(),
                format!("reduction `{}` needs an explicit axis", func),
                func,
            ));
        }
        Err(Diagnostic::undefined_symbol(STAGE, func, func_location.clone()))
    }
}

enum Callee {
    Builtin(Builtin),
    Signature(FunctionType),
}

fn check_literal(
    value: &str,
    kind: ScalarKind,
    location: &SourceLocation,
) -> Result<()> {
    let valid = match kind {
        ScalarKind::Bool => matches!(value, "true" | "false" | "True" | "False"),
        ScalarKind::Int32 => value.parse::<i32>().is_ok(),
        ScalarKind::Int64 => value.parse::<i64>().is_ok(),
        ScalarKind::Float32 => value.parse::<f32>().is_ok(),
        ScalarKind::Float64 => value.parse::<f64>().is_ok(),
    };
    if valid {
        Ok(())
    } else {
        Err(Diagnostic::new(
            STAGE,
            ErrorKind::TypeMismatch,
            location.clone(),
            format!("literal `{}` is not a valid {}", value, kind),
        )
        .with_offending(value))
    }
}

fn check_call(
    func: &str,
    signature: &FunctionType,
    args: &[TypedExpr],
    expr: &Expr,
) -> Result<Type> {
    if signature.params.len() != args.len() {
        return Err(TypeError::ArityMismatch {
            expected: signature.params.len(),
            found: args.len(),
        })
        .located(STAGE, &expr.location, func);
    }
    for (param, arg) in signature.params.iter().zip(args) {
        check_assignable(param, &arg.ty).located(STAGE, &arg.location, &arg.to_string())?;
    }
    Ok((*signature.returns).clone())
}

fn builtin_type(
    builtin: Builtin,
    args: &[TypedExpr],
    expr: &Expr,
) -> Result<Type> {
    if builtin.arity() != args.len() {
        return Err(TypeError::ArityMismatch {
            expected: builtin.arity(),
            found: args.len(),
        })
        .located(STAGE, &expr.location, builtin.name());
    }
    match builtin {
        Builtin::Cast(kind) => args[0].ty.with_dtype(kind).ok_or_else(|| {
            Diagnostic::unsupported(
                STAGE,
                expr.location.clone(),
                format!("cannot cast {} to {}", args[0].ty, kind),
                expr.to_string(),
            )
        }),
        Builtin::Math(function) => {
            for arg in args {
                let numeric = arg.ty.is_arithmetic();
                let floating = arg.ty.dtype().is_some_and(|k| k.is_floating());
                if !numeric || (function.requires_floating() && !floating) {
                    return Err(Diagnostic::unsupported(
                        STAGE,
                        arg.location.clone(),
                        format!("`{}` is not defined for {}", function.name(), arg.ty),
                        expr.to_string(),
                    ));
                }
            }
            let mut ty = args[0].ty.clone();
            for arg in &args[1..] {
                ty = unify(&ty, &arg.ty).located(STAGE, &expr.location, &expr.to_string())?;
            }
            Ok(ty)
        }
    }
}

fn reduce_type(
    op: ReduceOp,
    operand: &Type,
    axis: &str,
    axis_location: &SourceLocation,
    expr: &Expr,
) -> Result<Type> {
    let (dtype, dims) = match operand {
        Type::Field { dtype, dims } if dtype.is_arithmetic() => (*dtype, dims),
        other => {
            return Err(Diagnostic::unsupported(
                STAGE,
                expr.location.clone(),
                format!("`{}` is not defined for {}", op, other),
                expr.to_string(),
            ))
        }
    };
    let dim = dims.iter().find(|d| d.name == axis).ok_or_else(|| {
        Diagnostic::new(
            STAGE,
            ErrorKind::DimensionMismatch,
            axis_location.clone(),
            format!("reduction axis `{}` is not a dimension of {}", axis, operand),
        )
        .with_offending(axis)
    })?;
    if !dim.is_local() {
        return Err(Diagnostic::new(
            STAGE,
            ErrorKind::DimensionMismatch,
            axis_location.clone(),
            format!("reduction axis `{}` is not a local dimension", axis),
        )
        .with_offending(axis));
    }
    make_field(dtype, dims.iter().filter(|d| *d != dim).cloned()).located(
        STAGE,
        axis_location,
        axis,
    )
}
