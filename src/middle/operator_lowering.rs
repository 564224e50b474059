//! 算子 AST 到迭代器 IR 的降级
//!
//! Every AST node has two renderings:
//!
//! - value form: the element at the current position (`deref(a)`,
//!   `apply(plus, ..)`)
//! - iterator form: something that can be shifted, reduced or bound by `let`
//!   (`a`, `shift(a, Ioff, 1)`, or a `lift` of the value form)
//!
//! Calls to other field operators are inlined. Arguments are let-bound to
//! fresh temporaries and every binder of the callee body is renamed, so no
//! name of the caller can be captured. Each lowered node's type is checked
//! against the type deduced for its AST node.

#![allow(clippy::result_large_err)]

use crate::frontend::builtins::{Builtin, ReduceOp};
use crate::frontend::operator::ast::{
    BinOp, ExprKind as AstKind, OffsetRef, TypedExpr, TypedFieldOperator, UnOp,
};
use crate::frontend::registry::Registry;
use crate::frontend::types::{
    boolify, broadcast, is_equivalent, make_field, make_scalar, make_tuple, unify, Dims, Type,
    TypeError,
};
use crate::middle::ir::{Expr, ExprKind, FunctionDefinition, Param, Primitive};
use crate::util::config::CompileConfig;
use crate::util::diagnostic::{Diagnostic, Result, Stage};
use crate::util::span::SourceLocation;
use indexmap::IndexMap;
use std::collections::HashSet;
use tracing::{debug, trace};

const STAGE: Stage = Stage::Lowering;

/// Lower one typed operator into a function definition.
///
/// `operators` holds the typed operators of the batch; callees are inlined
/// from there.
pub fn lower_operator(
    registry: &Registry,
    operators: &IndexMap<String, TypedFieldOperator>,
    op: &TypedFieldOperator,
    config: &CompileConfig,
) -> Result<FunctionDefinition> {
    OperatorLowering::new(registry, operators, op, &config.temp_prefix).lower(op)
}

/// Fresh-name source for one lowering call
#[derive(Debug, Clone)]
pub struct FreshNames {
    prefix: String,
    counter: usize,
    used: HashSet<String>,
}

impl FreshNames {
    pub fn new(
        prefix: impl Into<String>,
        used: HashSet<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            counter: 0,
            used,
        }
    }

    /// `<prefix>_<n>` for the next `n` whose name is not taken
    pub fn next_name(&mut self) -> String {
        loop {
            let name = format!("{}_{}", self.prefix, self.counter);
            self.counter += 1;
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// AST name -> IR binding
#[derive(Debug, Default)]
struct Env {
    bindings: Vec<(String, Param)>,
    /// Rename `let` binders (set inside inlined bodies)
    rename: bool,
}

impl Env {
    fn renaming() -> Self {
        Self {
            bindings: Vec::new(),
            rename: true,
        }
    }

    fn push(
        &mut self,
        name: &str,
        binding: Param,
    ) {
        self.bindings.push((name.to_string(), binding));
    }

    fn pop(&mut self) {
        self.bindings.pop();
    }

    fn lookup(
        &self,
        name: &str,
    ) -> Option<&Param> {
        self.bindings
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, binding)| binding)
    }
}

/// 算子降级器
#[derive(Debug)]
pub struct OperatorLowering<'a> {
    registry: &'a Registry,
    operators: &'a IndexMap<String, TypedFieldOperator>,
    fresh: FreshNames,
    /// Operators currently being inlined, outermost first
    stack: Vec<String>,
}

impl<'a> OperatorLowering<'a> {
    pub fn new(
        registry: &'a Registry,
        operators: &'a IndexMap<String, TypedFieldOperator>,
        op: &TypedFieldOperator,
        temp_prefix: &str,
    ) -> Self {
        let mut used = HashSet::new();
        used.insert(op.name.clone());
        used.extend(op.params.iter().map(|p| p.name.clone()));
        collect_names(&op.body, &mut used);
        Self {
            registry,
            operators,
            fresh: FreshNames::new(temp_prefix, used),
            stack: Vec::new(),
        }
    }

    pub fn lower(
        mut self,
        op: &TypedFieldOperator,
    ) -> Result<FunctionDefinition> {
        debug!("Lowering operator `{}`", op.name);
        let params: Vec<Param> = op
            .params
            .iter()
            .map(|p| Param::new(p.name.clone(), p.ty.clone()))
            .collect();
        let mut env = Env::default();
        for param in &params {
            env.push(&param.name, param.clone());
        }

        self.stack.push(op.name.clone());
        let body = self.value(&op.body, &mut env)?;
        self.stack.pop();

        if !is_equivalent(&body.ty, &op.returns) {
            return Err(Diagnostic::internal(
                STAGE,
                op.location.clone(),
                format!(
                    "lowered body of `{}` has type {}, declared {}",
                    op.name, body.ty, op.returns
                ),
            )
            .with_offending(&op.name));
        }

        debug!("Operator `{}` lowered ({} IR nodes)", op.name, body.size());
        Ok(FunctionDefinition {
            name: op.name.clone(),
            params,
            body,
        })
    }

    /// 值形式
    fn value(
        &mut self,
        expr: &TypedExpr,
        env: &mut Env,
    ) -> Result<Expr> {
        let location = &expr.location;
        let lowered = match &expr.kind {
            AstKind::Literal(lit) => Expr::new(ExprKind::Literal(lit.clone()), make_scalar(lit.kind)),

            AstKind::Name(name) => deref(self.symbol(name, env, expr)?),

            AstKind::Unary { op, operand } => {
                let operand = self.value(operand, env)?;
                match op {
                    UnOp::Plus => operand,
                    UnOp::Neg => self.apply(Primitive::Negate, vec![operand], location)?,
                    UnOp::Not => self.apply(Primitive::Not, vec![operand], location)?,
                }
            }

            AstKind::Binary { op, left, right } => {
                let left = self.value(left, env)?;
                let right = self.value(right, env)?;
                self.apply(binary_primitive(*op), vec![left, right], location)?
            }

            AstKind::Call {
                func,
                func_location,
                args,
            } => self.call(func, func_location, args, env)?,

            AstKind::Shift { .. } => deref(self.iterator(expr, env)?),

            AstKind::Conditional {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.value(condition, env)?;
                let then_branch = self.value(then_branch, env)?;
                let else_branch = self.value(else_branch, env)?;
                let empty = Dims::new();
                let ty = unify(&then_branch.ty, &else_branch.ty)
                    .and_then(|ty| broadcast(&ty, condition.ty.dims().unwrap_or(&empty)))
                    .map_err(|err| type_defect(location, err))?;
                Expr::new(
                    ExprKind::If {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    },
                    ty,
                )
            }

            AstKind::Let {
                name, value, body, ..
            } => {
                let value = self.iterator(value, env)?;
                let binder = if env.rename {
                    self.fresh.next_name()
                } else {
                    name.clone()
                };
                env.push(name, Param::new(binder.clone(), value.ty.clone()));
                let body = self.value(body, env);
                env.pop();
                let_in(binder, value, body?)
            }

            AstKind::Tuple(elements) => {
                let elements = elements
                    .iter()
                    .map(|e| self.value(e, env))
                    .collect::<Result<Vec<_>>>()?;
                let ty = make_tuple(elements.iter().map(|e| e.ty.clone()).collect());
                Expr::new(ExprKind::MakeTuple(elements), ty)
            }

            AstKind::Subscript { value, index } => {
                let tuple = self.value(value, env)?;
                let ty = match &tuple.ty {
                    Type::Tuple(elements) => elements.get(*index).cloned(),
                    _ => None,
                }
                .ok_or_else(|| {
                    Diagnostic::internal(
                        STAGE,
                        location.clone(),
                        format!("tuple_get({}) on {}", index, tuple.ty),
                    )
                })?;
                Expr::new(
                    ExprKind::TupleGet {
                        tuple: Box::new(tuple),
                        index: *index,
                    },
                    ty,
                )
            }

            AstKind::Reduce {
                op, operand, axis, ..
            } => {
                let iterator = self.iterator(operand, env)?;
                reduce(*op, axis, iterator, location)?
            }
        };

        check_preserved(expr, &lowered)?;
        Ok(lowered)
    }

    /// 迭代器形式
    fn iterator(
        &mut self,
        expr: &TypedExpr,
        env: &mut Env,
    ) -> Result<Expr> {
        let lowered = match &expr.kind {
            AstKind::Name(name) => self.symbol(name, env, expr)?,
            AstKind::Shift { field, offset } => {
                let iterator = self.iterator(field, env)?;
                self.shift(iterator, offset, &expr.location)?
            }
            _ => {
                let body = self.value(expr, env)?;
                let params = body.free_symbols();
                let args = params
                    .iter()
                    .map(|p| Expr::sym_ref(p.name.clone(), p.ty.clone()))
                    .collect();
                let ty = body.ty.clone();
                Expr::new(
                    ExprKind::Lift {
                        params,
                        body: Box::new(body),
                        args,
                    },
                    ty,
                )
            }
        };
        check_preserved(expr, &lowered)?;
        Ok(lowered)
    }

    fn symbol(
        &self,
        name: &str,
        env: &Env,
        expr: &TypedExpr,
    ) -> Result<Expr> {
        let binding = env.lookup(name).ok_or_else(|| {
            Diagnostic::internal(
                STAGE,
                expr.location.clone(),
                format!("`{}` has no binding after type deduction", name),
            )
            .with_offending(name)
        })?;
        Ok(Expr::sym_ref(binding.name.clone(), binding.ty.clone()))
    }

    fn shift(
        &self,
        iterator: Expr,
        offset: &OffsetRef,
        location: &SourceLocation,
    ) -> Result<Expr> {
        let connectivity = self.registry.offset(&offset.name).ok_or_else(|| {
            Diagnostic::undefined_symbol(STAGE, &offset.name, offset.location.clone())
        })?;
        let ty = match &iterator.ty {
            Type::Field { dtype, dims } if dims.contains(&connectivity.source) => connectivity
                .shifted(*dtype, dims, offset.index)
                .map_err(|err| type_defect(location, err))?,
            other => {
                return Err(Diagnostic::internal(
                    STAGE,
                    location.clone(),
                    format!("cannot shift an iterator of {} by `{}`", other, offset.name),
                ))
            }
        };
        Ok(Expr::new(
            ExprKind::Shift {
                iterator: Box::new(iterator),
                offset: offset.name.clone(),
                index: offset.index,
            },
            ty,
        ))
    }

    fn apply(
        &self,
        primitive: Primitive,
        args: Vec<Expr>,
        location: &SourceLocation,
    ) -> Result<Expr> {
        let ty = match &primitive {
            Primitive::Cast(kind) => args.first().and_then(|a| a.ty.with_dtype(*kind)),
            Primitive::External(name) => self
                .registry
                .function(name)
                .map(|function| (*function.returns).clone()),
            _ => {
                let mut types = args.iter().map(|a| &a.ty);
                let first = types.next().cloned();
                let unified = types.try_fold(first, |acc, ty| match acc {
                    Some(acc) => unify(&acc, ty).map(Some),
                    None => Ok(None),
                });
                let unified = unified.map_err(|err| type_defect(location, err))?;
                if primitive.is_comparison() {
                    unified.as_ref().and_then(boolify)
                } else {
                    unified
                }
            }
        }
        .ok_or_else(|| {
            Diagnostic::internal(
                STAGE,
                location.clone(),
                format!("cannot type `{}` over {} argument(s)", primitive, args.len()),
            )
        })?;
        Ok(Expr::new(ExprKind::Apply { primitive, args }, ty))
    }

    fn call(
        &mut self,
        func: &str,
        func_location: &SourceLocation,
        args: &[TypedExpr],
        env: &mut Env,
    ) -> Result<Expr> {
        if let Some(builtin) = Builtin::lookup(func) {
            let values = self.values(args, env)?;
            let primitive = match builtin {
                Builtin::Math(function) => Primitive::Math(function),
                Builtin::Cast(kind) => Primitive::Cast(kind),
            };
            return self.apply(primitive, values, func_location);
        }
        if self.registry.operator(func).is_some() {
            if self.stack.iter().any(|name| name == func) {
                return Err(Diagnostic::unsupported(
                    STAGE,
                    func_location.clone(),
                    format!(
                        "recursive call to `{}` cannot be inlined (via {})",
                        func,
                        self.stack.join(" -> ")
                    ),
                    func,
                ));
            }
            let operators = self.operators;
            let callee = operators
                .get(func)
                .ok_or_else(|| Diagnostic::undefined_symbol(STAGE, func, func_location.clone()))?;
            return self.inline(callee, args, env, func_location);
        }
        if self.registry.function(func).is_some() {
            let values = self.values(args, env)?;
            return self.apply(Primitive::External(func.to_string()), values, func_location);
        }
        Err(Diagnostic::undefined_symbol(STAGE, func, func_location.clone()))
    }

    fn values(
        &mut self,
        args: &[TypedExpr],
        env: &mut Env,
    ) -> Result<Vec<Expr>> {
        args.iter().map(|arg| self.value(arg, env)).collect()
    }

    /// 内联被调算子
    fn inline(
        &mut self,
        callee: &TypedFieldOperator,
        args: &[TypedExpr],
        env: &mut Env,
        location: &SourceLocation,
    ) -> Result<Expr> {
        if callee.params.len() != args.len() {
            return Err(Diagnostic::internal(
                STAGE,
                location.clone(),
                format!(
                    "`{}` takes {} arguments, call passes {}",
                    callee.name,
                    callee.params.len(),
                    args.len()
                ),
            ));
        }
        trace!("inlining `{}`", callee.name);

        let mut inner = Env::renaming();
        let mut bindings = Vec::with_capacity(args.len());
        for (param, arg) in callee.params.iter().zip(args) {
            let value = self.iterator(arg, env)?;
            let temp = self.fresh.next_name();
            inner.push(&param.name, Param::new(temp.clone(), value.ty.clone()));
            bindings.push((temp, value));
        }

        self.stack.push(callee.name.clone());
        let body = self.value(&callee.body, &mut inner);
        self.stack.pop();

        let mut lowered = body?;
        for (temp, value) in bindings.into_iter().rev() {
            lowered = let_in(temp, value, lowered);
        }
        Ok(lowered)
    }
}

fn deref(iterator: Expr) -> Expr {
    let ty = iterator.ty.clone();
    Expr::new(ExprKind::Deref(Box::new(iterator)), ty)
}

fn let_in(
    name: String,
    value: Expr,
    body: Expr,
) -> Expr {
    let ty = body.ty.clone();
    Expr::new(
        ExprKind::Let {
            name,
            value: Box::new(value),
            body: Box::new(body),
        },
        ty,
    )
}

fn reduce(
    op: ReduceOp,
    axis: &str,
    iterator: Expr,
    location: &SourceLocation,
) -> Result<Expr> {
    let found = match &iterator.ty {
        Type::Field { dtype, dims } => dims.iter().find(|d| d.name == axis).map(|dim| {
            let ty = make_field(*dtype, dims.iter().filter(|d| *d != dim).cloned());
            (dim.clone(), ty)
        }),
        _ => None,
    };
    let (dim, ty) = found.ok_or_else(|| {
        Diagnostic::internal(
            STAGE,
            location.clone(),
            format!("iterator of {} has no axis `{}`", iterator.ty, axis),
        )
    })?;
    let ty = ty.map_err(|err| type_defect(location, err))?;
    Ok(Expr::new(
        ExprKind::Reduce {
            op,
            axis: dim,
            iterator: Box::new(iterator),
        },
        ty,
    ))
}

fn binary_primitive(op: BinOp) -> Primitive {
    match op {
        BinOp::Add => Primitive::Plus,
        BinOp::Sub => Primitive::Minus,
        BinOp::Mul => Primitive::Multiplies,
        BinOp::Div => Primitive::Divides,
        BinOp::And => Primitive::And,
        BinOp::Or => Primitive::Or,
        BinOp::Xor => Primitive::Xor,
        BinOp::Eq => Primitive::Eq,
        BinOp::Neq => Primitive::NotEq,
        BinOp::Lt => Primitive::Less,
        BinOp::Le => Primitive::LessEqual,
        BinOp::Gt => Primitive::Greater,
        BinOp::Ge => Primitive::GreaterEqual,
    }
}

fn type_defect(
    location: &SourceLocation,
    err: TypeError,
) -> Diagnostic {
    Diagnostic::internal(
        STAGE,
        location.clone(),
        format!("ill-typed IR: {}", err),
    )
}

/// 降级前后类型必须等价
fn check_preserved(
    expr: &TypedExpr,
    lowered: &Expr,
) -> Result<()> {
    if is_equivalent(&lowered.ty, &expr.ty) {
        return Ok(());
    }
    Err(Diagnostic::internal(
        STAGE,
        expr.location.clone(),
        format!(
            "lowering changed the type of `{}` from {} to {}",
            expr, expr.ty, lowered.ty
        ),
    )
    .with_offending(expr.to_string()))
}

/// Every identifier an operator mentions
fn collect_names(
    expr: &TypedExpr,
    names: &mut HashSet<String>,
) {
    match &expr.kind {
        AstKind::Literal(_) => {}
        AstKind::Name(name) => {
            names.insert(name.clone());
        }
        AstKind::Unary { operand, .. } => collect_names(operand, names),
        AstKind::Binary { left, right, .. } => {
            collect_names(left, names);
            collect_names(right, names);
        }
        AstKind::Call { func, args, .. } => {
            names.insert(func.clone());
            for arg in args {
                collect_names(arg, names);
            }
        }
        AstKind::Shift { field, .. } => collect_names(field, names),
        AstKind::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            collect_names(condition, names);
            collect_names(then_branch, names);
            collect_names(else_branch, names);
        }
        AstKind::Let {
            name, value, body, ..
        } => {
            names.insert(name.clone());
            collect_names(value, names);
            collect_names(body, names);
        }
        AstKind::Tuple(elements) => {
            for element in elements {
                collect_names(element, names);
            }
        }
        AstKind::Subscript { value, .. } => collect_names(value, names),
        AstKind::Reduce { operand, .. } => collect_names(operand, names),
    }
}
