//! 程序 AST 到 ProgramUnit 的降级
//!
//! One apply statement per call statement, in order. The referenced
//! operator bodies are copied into the unit in first-reference order. A
//! statement without an explicit domain iterates over the declared shape of
//! its output: fixed extents become constant bounds, run-time extents become
//! implicit size parameters appended to the unit's parameters.

#![allow(clippy::result_large_err)]

use crate::frontend::program::ast::{
    ArgKind, Bound, CallStmt, DomainRange, Extent, Stmt, Target, TypedProgram,
};
use crate::frontend::program::type_deduction::output_dims;
use crate::frontend::types::{make_scalar, ScalarKind, Type};
use crate::middle::ir::{ApplyStmt, Domain, Expr, ExprKind, FunctionDefinition, Param, ProgramUnit};
use crate::util::config::CompileConfig;
use crate::util::diagnostic::{Diagnostic, ErrorKind, Result, Stage};
use indexmap::{IndexMap, IndexSet};
use tracing::debug;

const STAGE: Stage = Stage::Lowering;

/// Element type of implicit size parameters
pub const SIZE_KIND: ScalarKind = ScalarKind::Int32;

/// Lower a typed program against the lowered operator bodies of the batch
pub fn lower_program(
    program: &TypedProgram,
    functions: &IndexMap<String, FunctionDefinition>,
    config: &CompileConfig,
) -> Result<ProgramUnit> {
    ProgramLowering::new(program, functions, config).lower()
}

/// 程序降级器
#[derive(Debug)]
pub struct ProgramLowering<'a> {
    program: &'a TypedProgram,
    functions: &'a IndexMap<String, FunctionDefinition>,
    size_param_suffix: &'a str,
    /// Declared shape of every parameter and temporary
    shapes: IndexMap<String, Option<Vec<Extent>>>,
    /// Size parameters generated so far
    size_params: IndexSet<String>,
    unit: ProgramUnit,
}

impl<'a> ProgramLowering<'a> {
    pub fn new(
        program: &'a TypedProgram,
        functions: &'a IndexMap<String, FunctionDefinition>,
        config: &'a CompileConfig,
    ) -> Self {
        let mut shapes = IndexMap::new();
        for param in &program.params {
            shapes.insert(param.name.clone(), param.shape.clone());
        }
        for decl in program.declarations() {
            shapes.insert(decl.name.clone(), decl.shape.clone());
        }
        let unit = ProgramUnit {
            name: program.name.clone(),
            params: program
                .params
                .iter()
                .map(|p| Param::new(p.name.clone(), p.ty.clone()))
                .collect(),
            temporaries: program
                .declarations()
                .map(|d| Param::new(d.name.clone(), d.ty.clone()))
                .collect(),
            functions: IndexMap::new(),
            statements: Vec::new(),
        };
        Self {
            program,
            functions,
            size_param_suffix: &config.size_param_suffix,
            shapes,
            size_params: IndexSet::new(),
            unit,
        }
    }

    pub fn lower(mut self) -> Result<ProgramUnit> {
        let program = self.program;
        debug!("Lowering program `{}`", program.name);
        for stmt in &program.body {
            if let Stmt::Call(call) = stmt {
                let statement = self.statement(call)?;
                self.unit.statements.push(statement);
            }
        }
        debug!(
            "Program `{}` lowered: {} functions, {} statements",
            self.unit.name,
            self.unit.functions.len(),
            self.unit.statements.len()
        );
        Ok(self.unit)
    }

    fn statement(
        &mut self,
        call: &CallStmt<Type>,
    ) -> Result<ApplyStmt> {
        let function = self.functions.get(&call.operator).ok_or_else(|| {
            Diagnostic::undefined_symbol(STAGE, &call.operator, call.operator_location.clone())
        })?;
        if !self.unit.functions.contains_key(&call.operator) {
            self.unit
                .functions
                .insert(call.operator.clone(), function.clone());
        }

        let args = call
            .args
            .iter()
            .map(|arg| match &arg.kind {
                ArgKind::Name(name) => Expr::sym_ref(name.clone(), arg.ty.clone()),
                ArgKind::Literal(lit) => Expr::new(ExprKind::Literal(lit.clone()), arg.ty.clone()),
            })
            .collect();

        let domain = match &call.domain {
            Some(domain) => Domain {
                ranges: domain.ranges.clone(),
            },
            None => self.infer_domain(call)?,
        };

        Ok(ApplyStmt {
            operator: call.operator.clone(),
            args,
            outputs: call.outs.iter().map(|t| t.name.clone()).collect(),
            domain,
        })
    }

    /// 由输出的声明形状推断迭代域
    fn infer_domain(
        &mut self,
        call: &CallStmt<Type>,
    ) -> Result<Domain> {
        let missing = |target: &Target<Type>, why: &str| {
            Diagnostic::new(
                STAGE,
                ErrorKind::MissingDomain,
                call.location.clone(),
                format!(
                    "no domain given for `{}` and {}",
                    call.operator, why
                ),
            )
            .with_offending(&target.name)
        };

        let target = call.outs.first().ok_or_else(|| {
            Diagnostic::internal(STAGE, call.location.clone(), "call statement without output")
        })?;
        let dims = output_dims(&target.ty)
            .ok_or_else(|| missing(target, "its output fields differ in dimensions"))?;
        for other in &call.outs[1..] {
            if output_dims(&other.ty).as_ref() != Some(&dims) {
                return Err(missing(other, "its outputs differ in dimensions"));
            }
        }
        let shape = self
            .shapes
            .get(&target.name)
            .cloned()
            .flatten()
            .ok_or_else(|| {
                missing(
                    target,
                    &format!("the shape of `{}` is not declared", target.name),
                )
            })?;
        if shape.len() != dims.len() {
            return Err(Diagnostic::internal(
                STAGE,
                target.location.clone(),
                format!(
                    "shape of `{}` has {} extents for {} dimensions",
                    target.name,
                    shape.len(),
                    dims.len()
                ),
            ));
        }

        let mut ranges = Vec::with_capacity(dims.len());
        for (axis, (dim, extent)) in dims.iter().zip(&shape).enumerate() {
            let stop = match extent {
                Extent::Fixed(n) => Bound::Const(i64::try_from(*n).map_err(|_| {
                    Diagnostic::unsupported(
                        STAGE,
                        target.location.clone(),
                        format!(
                            "extent {} of `{}` along `{}` does not fit a 64-bit bound",
                            n, target.name, dim
                        ),
                        &target.name,
                    )
                })?),
                Extent::Runtime => {
                    let name = format!("{}{}{}", target.name, self.size_param_suffix, axis);
                    self.add_size_param(&name, target)?;
                    Bound::Symbol(name)
                }
            };
            ranges.push(DomainRange::new(dim.clone(), Bound::Const(0), stop));
        }
        Ok(Domain { ranges })
    }

    /// 添加隐式尺寸参数；与用户声明的符号同名时报错
    fn add_size_param(
        &mut self,
        name: &str,
        target: &Target<Type>,
    ) -> Result<()> {
        if self.size_params.contains(name) {
            return Ok(());
        }
        if self.unit.symbol(name).is_some() {
            return Err(Diagnostic::new(
                STAGE,
                ErrorKind::DuplicateDefinition,
                target.location.clone(),
                format!(
                    "size parameter `{}` of `{}` clashes with a declared symbol",
                    name, target.name
                ),
            )
            .with_offending(name));
        }
        self.size_params.insert(name.to_string());
        self.unit
            .params
            .push(Param::new(name.to_string(), make_scalar(SIZE_KIND)));
        Ok(())
    }
}
