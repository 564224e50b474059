//! 程序级类型推断
//!
//! Parameters and declarations share the outer scope; every call statement
//! resolves its arguments from a child scope of it. Statements run in order,
//! and an output symbol may be written at most once.

#![allow(clippy::result_large_err)]

use super::ast::{
    Arg, ArgKind, Bound, CallStmt, Domain, Extent, Program, ProgramParam, Stmt, Target,
    TypedProgram,
};
use crate::frontend::operator::ast::FieldOperator;
use crate::frontend::registry::{OperatorSignature, Registry};
use crate::frontend::types::{
    check_assignable, make_scalar, make_symbol, Dims, ScopeId, SymbolTable, Type, TypeError,
    TypeResultExt,
};
use crate::util::diagnostic::{Diagnostic, ErrorKind, Result, Stage};
use crate::util::span::SourceLocation;
use indexmap::IndexMap;
use tracing::debug;

const STAGE: Stage = Stage::TypeDeduction;

/// Name of the output parameter added by [`program_from_operator`]
pub const OUT_PARAM: &str = "out";

/// Deduce the types of one program against the batch registry
pub fn deduce_program(
    registry: &Registry,
    program: &Program,
) -> Result<TypedProgram> {
    ProgramTypeDeduction::new(registry).deduce(program)
}

/// 程序类型推断器
#[derive(Debug)]
pub struct ProgramTypeDeduction<'a> {
    registry: &'a Registry,
    table: SymbolTable,
    /// Output symbol -> statement that first wrote it
    written: IndexMap<String, SourceLocation>,
}

impl<'a> ProgramTypeDeduction<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self {
            registry,
            table: SymbolTable::new(),
            written: IndexMap::new(),
        }
    }

    pub fn deduce(
        mut self,
        program: &Program,
    ) -> Result<TypedProgram> {
        debug!(
            "Deducing types of program `{}` ({} statements)",
            program.name,
            program.body.len()
        );
        let root = self.table.root();

        for param in &program.params {
            check_data(&param.name, &param.ty, &param.location)?;
            check_shape(&param.name, &param.ty, param.shape.as_deref(), &param.location)?;
            self.define(&param.name, param.ty.clone(), root, &param.location)?;
        }

        let mut body = Vec::with_capacity(program.body.len());
        for stmt in &program.body {
            let typed = match stmt {
                Stmt::Declare(decl) => {
                    check_data(&decl.name, &decl.ty, &decl.location)?;
                    check_shape(&decl.name, &decl.ty, decl.shape.as_deref(), &decl.location)?;
                    self.define(&decl.name, decl.ty.clone(), root, &decl.location)?;
                    Stmt::Declare(decl.clone())
                }
                Stmt::Call(call) => {
                    let scope = self.table.child(root);
                    Stmt::Call(self.call(call, scope)?)
                }
            };
            body.push(typed);
        }

        debug!("Program `{}` deduced", program.name);
        Ok(Program {
            name: program.name.clone(),
            params: program.params.clone(),
            body,
            location: program.location.clone(),
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

    fn lookup(
        &self,
        scope: ScopeId,
        name: &str,
        location: &SourceLocation,
    ) -> Result<Type> {
        self.table
            .lookup(scope, name)
            .map(|symbol| symbol.ty.clone())
            .ok_or_else(|| Diagnostic::undefined_symbol(STAGE, name, location.clone()))
    }

    fn call(
        &mut self,
        call: &CallStmt,
        scope: ScopeId,
    ) -> Result<CallStmt<Type>> {
        let registry = self.registry;
        let signature = registry.operator(&call.operator).ok_or_else(|| {
            Diagnostic::undefined_symbol(STAGE, &call.operator, call.operator_location.clone())
        })?;

        if signature.arity() != call.args.len() {
            return Err(TypeError::ArityMismatch {
                expected: signature.arity(),
                found: call.args.len(),
            })
            .located(STAGE, &call.location, &call.operator);
        }

        let mut args = Vec::with_capacity(call.args.len());
        for (arg, (_, expected)) in call.args.iter().zip(&signature.params) {
            let ty = match &arg.kind {
                ArgKind::Name(name) => self.lookup(scope, name, &arg.location)?,
                ArgKind::Literal(lit) => make_scalar(lit.kind),
            };
            check_assignable(expected, &ty).located(STAGE, &arg.location, &arg.to_string())?;
            args.push(Arg {
                kind: arg.kind.clone(),
                ty,
                location: arg.location.clone(),
            });
        }

        let outs = self.outputs(call, signature, scope)?;
        if let Some(domain) = &call.domain {
            self.check_domain(domain, &outs, scope)?;
        }

        Ok(CallStmt {
            operator: call.operator.clone(),
            operator_location: call.operator_location.clone(),
            args,
            outs,
            domain: call.domain.clone(),
            location: call.location.clone(),
        })
    }

    fn outputs(
        &mut self,
        call: &CallStmt,
        signature: &OperatorSignature,
        scope: ScopeId,
    ) -> Result<Vec<Target<Type>>> {
        if call.outs.is_empty() {
            return Err(Diagnostic::unsupported(
                STAGE,
                call.location.clone(),
                format!("call to `{}` has no output", call.operator),
                &call.operator,
            ));
        }

        // 多个输出对应元组返回值的各个元素
        let expected: Vec<&Type> = match (&signature.returns, call.outs.len()) {
            (returns, 1) => vec![returns],
            (Type::Tuple(elements), n) if elements.len() == n => elements.iter().collect(),
            (returns, n) => {
                return Err(Diagnostic::new(
                    STAGE,
                    ErrorKind::TypeMismatch,
                    call.location.clone(),
                    format!(
                        "`{}` returns {} but the statement has {} outputs",
                        call.operator, returns, n
                    ),
                )
                .with_offending(&call.operator))
            }
        };

        let mut outs = Vec::with_capacity(call.outs.len());
        for (target, result) in call.outs.iter().zip(expected) {
            let ty = self.lookup(scope, &target.name, &target.location)?;
            if !is_field_like(&ty) {
                return Err(Diagnostic::unsupported(
                    STAGE,
                    target.location.clone(),
                    format!("output `{}` must be a field, found {}", target.name, ty),
                    &target.name,
                ));
            }
            check_assignable(&ty, result).map_err(|err| {
                Diagnostic::new(
                    STAGE,
                    err.kind(),
                    target.location.clone(),
                    format!(
                        "output `{}` cannot receive the result of `{}`: {}",
                        target.name, call.operator, err
                    ),
                )
                .with_offending(format!("{} = {}(...)", target.name, call.operator))
                .with_related(call.operator_location.clone())
            })?;

            if let Some(first) = self.written.get(&target.name) {
                return Err(Diagnostic::new(
                    STAGE,
                    ErrorKind::MultipleAssignment,
                    call.location.clone(),
                    format!(
                        "`{}` is written by the statements at {} and {}",
                        target.name, first, call.location
                    ),
                )
                .with_offending(&target.name)
                .with_related(first.clone())
                .with_related(call.location.clone()));
            }
            self.written
                .insert(target.name.clone(), call.location.clone());

            outs.push(Target {
                name: target.name.clone(),
                ty,
                location: target.location.clone(),
            });
        }
        Ok(outs)
    }

    /// An explicit domain spans exactly the output dimensions; symbolic bounds
    /// are integer scalars in scope.
    fn check_domain(
        &self,
        domain: &Domain,
        outs: &[Target<Type>],
        scope: ScopeId,
    ) -> Result<()> {
        let given: Dims = domain.ranges.iter().map(|r| r.dim.clone()).collect();
        if given.len() != domain.ranges.len() {
            return Err(Diagnostic::new(
                STAGE,
                ErrorKind::DimensionMismatch,
                domain.location.clone(),
                "domain lists a dimension more than once",
            ));
        }
        for target in outs {
            let dims = output_dims(&target.ty);
            if dims.as_ref() != Some(&given) {
                return Err(Diagnostic::new(
                    STAGE,
                    ErrorKind::DimensionMismatch,
                    domain.location.clone(),
                    format!(
                        "domain does not match the dimensions of output `{}` ({})",
                        target.name, target.ty
                    ),
                )
                .with_offending(&target.name));
            }
        }
        for range in &domain.ranges {
            for bound in [&range.start, &range.stop] {
                if let Bound::Symbol(name) = bound {
                    let ty = self.lookup(scope, name, &domain.location)?;
                    if !matches!(ty, Type::Scalar(kind) if kind.is_integral()) {
                        return Err(Diagnostic::new(
                            STAGE,
                            ErrorKind::TypeMismatch,
                            domain.location.clone(),
                            format!("domain bound `{}` must be an integer scalar, found {}", name, ty),
                        )
                        .with_offending(name));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Dimensions shared by every field of an output; `None` if they differ
pub fn output_dims(ty: &Type) -> Option<Dims> {
    match ty {
        Type::Field { dims, .. } => Some(dims.clone()),
        Type::Tuple(elements) => {
            let mut all = elements.iter().map(output_dims);
            let first = all.next()??;
            all.all(|dims| dims.as_ref() == Some(&first)).then_some(first)
        }
        Type::Scalar(_) | Type::Function(_) => None,
    }
}

fn is_field_like(ty: &Type) -> bool {
    match ty {
        Type::Field { .. } => true,
        Type::Tuple(elements) => !elements.is_empty() && elements.iter().all(is_field_like),
        Type::Scalar(_) | Type::Function(_) => false,
    }
}

fn check_data(
    name: &str,
    ty: &Type,
    location: &SourceLocation,
) -> Result<()> {
    if ty.is_data() {
        Ok(())
    } else {
        Err(Diagnostic::unsupported(
            STAGE,
            location.clone(),
            format!("`{}` has non-data type {}", name, ty),
            name,
        ))
    }
}

/// A declared shape has one extent per dimension of the field
fn check_shape(
    name: &str,
    ty: &Type,
    shape: Option<&[Extent]>,
    location: &SourceLocation,
) -> Result<()> {
    let Some(shape) = shape else {
        return Ok(());
    };
    let rank = output_dims(ty).map(|dims| dims.len());
    if rank == Some(shape.len()) {
        return Ok(());
    }
    Err(Diagnostic::new(
        STAGE,
        ErrorKind::DimensionMismatch,
        location.clone(),
        format!(
            "shape of `{}` has {} extents but its type is {}",
            name,
            shape.len(),
            ty
        ),
    )
    .with_offending(name))
}

/// 把单个算子包装成程序
///
/// The program takes the operator's parameters plus an `out` parameter of its
/// return type whose extents are only known at run time. An operator that
/// already has a parameter named `out` is rejected.
pub fn program_from_operator<T>(op: &FieldOperator<T>) -> Result<Program> {
    if let Some(clash) = op.params.iter().find(|p| p.name == OUT_PARAM) {
        return Err(Diagnostic::unsupported(
            STAGE,
            clash.location.clone(),
            format!(
                "operator `{}` cannot be wrapped as a program: parameter `{}` is reserved",
                op.name, OUT_PARAM
            ),
            OUT_PARAM,
        ));
    }
    let signature = OperatorSignature::of(op);
    let mut params: Vec<ProgramParam> = signature
        .params
        .iter()
        .zip(&op.params)
        .map(|((name, ty), p)| ProgramParam::new(name.clone(), ty.clone(), p.location.clone()))
        .collect();

    let rank = output_dims(&signature.returns).map(|dims| dims.len());
    let mut out = ProgramParam::new(OUT_PARAM, signature.returns.clone(), op.location.clone());
    if let Some(rank) = rank {
        out = out.with_shape(vec![Extent::Runtime; rank]);
    }
    params.push(out);

    let call = CallStmt {
        operator: op.name.clone(),
        operator_location: op.location.clone(),
        args: op
            .params
            .iter()
            .map(|p| Arg::name(p.name.clone(), p.location.clone()))
            .collect(),
        outs: vec![Target::new(OUT_PARAM, op.location.clone())],
        domain: None,
        location: op.location.clone(),
    };

    Ok(Program {
        name: op.name.clone(),
        params,
        body: vec![Stmt::Call(call)],
        location: op.location.clone(),
    })
}
