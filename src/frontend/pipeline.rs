//! 编译流水线
//!
//! 管理每个编译单元的状态机，并行执行一批算子与程序的编译。
//!
//! 每个单元依次经过 `Parsed → TypeDeduced → Lowered → Validated`；
//! 任一阶段失败则进入 `Failed` 并丢弃部分结果，取消则进入 `Cancelled`。
//! 注册表在所有单元开始之前冻结，之后只读共享。

#![allow(clippy::result_large_err)]

use crate::frontend::operator::{deduce_operator, FieldOperator, TypedFieldOperator};
use crate::frontend::program::{deduce_program, Program};
use crate::frontend::registry::{Connectivity, Registry};
use crate::frontend::types::Type;
use crate::middle::{
    lower_operator, lower_program, validate_function, validate_program, FunctionDefinition,
    ProgramUnit,
};
use crate::util::config::CompileConfig;
use crate::util::diagnostic::{Diagnostic, Result};
use anyhow::Context;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// 编译单元状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    /// 已接收原始语法树
    Parsed,
    /// 类型推导完成
    TypeDeduced,
    /// 降级完成
    Lowered,
    /// 校验通过
    Validated,
    /// 编译失败
    Failed,
    /// 被取消
    Cancelled,
}

impl UnitState {
    /// 终止状态不再迁移
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnitState::Validated | UnitState::Failed | UnitState::Cancelled
        )
    }

    /// Next state of the success path
    pub fn successor(&self) -> Option<UnitState> {
        match self {
            UnitState::Parsed => Some(UnitState::TypeDeduced),
            UnitState::TypeDeduced => Some(UnitState::Lowered),
            UnitState::Lowered => Some(UnitState::Validated),
            _ => None,
        }
    }
}

impl fmt::Display for UnitState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            UnitState::Parsed => write!(f, "parsed"),
            UnitState::TypeDeduced => write!(f, "type deduced"),
            UnitState::Lowered => write!(f, "lowered"),
            UnitState::Validated => write!(f, "validated"),
            UnitState::Failed => write!(f, "failed"),
            UnitState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Cooperative cancellation flag shared between the caller and a running batch
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// 单元编译报告
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport<T> {
    pub name: String,
    pub state: UnitState,
    /// Present only when every stage succeeded
    pub output: Option<T>,
    pub diagnostic: Option<Diagnostic>,
}

impl<T> UnitReport<T> {
    fn parsed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: UnitState::Parsed,
            output: None,
            diagnostic: None,
        }
    }

    fn advance(&mut self) {
        if let Some(next) = self.state.successor() {
            self.state = next;
        }
    }

    fn fail(
        mut self,
        diagnostic: Diagnostic,
    ) -> Self {
        debug!(
            "Unit `{}` failed after {}: {}",
            self.name, self.state, diagnostic
        );
        self.state = UnitState::Failed;
        self.output = None;
        self.diagnostic = Some(diagnostic);
        self
    }

    fn cancel(mut self) -> Self {
        self.state = UnitState::Cancelled;
        self.output = None;
        self
    }

    fn finish(
        mut self,
        output: T,
    ) -> Self {
        self.output = Some(output);
        self
    }

    /// 是否成功
    pub fn is_success(&self) -> bool {
        self.output.is_some()
    }
}

/// Signature of an external function callable from operator bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalFunction {
    pub name: String,
    pub params: Vec<Type>,
    pub returns: Type,
}

/// 一批待编译的算子与程序
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    #[serde(default)]
    pub offsets: Vec<Connectivity>,
    #[serde(default)]
    pub functions: Vec<ExternalFunction>,
    #[serde(default)]
    pub operators: Vec<FieldOperator>,
    #[serde(default)]
    pub programs: Vec<Program>,
}

/// 批量编译结果
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// Operator reports in input order
    pub operators: Vec<UnitReport<FunctionDefinition>>,
    /// Program reports in input order
    pub programs: Vec<UnitReport<ProgramUnit>>,
    /// 总耗时（毫秒）
    pub total_duration_ms: u64,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.operators.iter().all(UnitReport::is_success)
            && self.programs.iter().all(UnitReport::is_success)
    }

    /// Every diagnostic of the batch, operators first
    pub fn diagnostics(&self) -> impl Iterator<Item = &Diagnostic> {
        self.operators
            .iter()
            .filter_map(|r| r.diagnostic.as_ref())
            .chain(self.programs.iter().filter_map(|r| r.diagnostic.as_ref()))
    }

    pub fn program(
        &self,
        name: &str,
    ) -> Option<&UnitReport<ProgramUnit>> {
        self.programs.iter().find(|r| r.name == name)
    }

    pub fn operator(
        &self,
        name: &str,
    ) -> Option<&UnitReport<FunctionDefinition>> {
        self.operators.iter().find(|r| r.name == name)
    }
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_offset(
        mut self,
        connectivity: Connectivity,
    ) -> Self {
        self.offsets.push(connectivity);
        self
    }

    pub fn with_operator(
        mut self,
        op: FieldOperator,
    ) -> Self {
        self.operators.push(op);
        self
    }

    pub fn with_program(
        mut self,
        program: Program,
    ) -> Self {
        self.programs.push(program);
        self
    }

    /// Freeze the registry: offsets, external functions, operator signatures
    pub fn registry(&self) -> Result<Arc<Registry>> {
        let mut builder = Registry::builder();
        for connectivity in &self.offsets {
            builder.add_offset(connectivity.clone());
        }
        for function in &self.functions {
            builder.add_function(
                function.name.clone(),
                function.params.clone(),
                function.returns.clone(),
            );
        }
        for op in &self.operators {
            builder.add_operator(op);
        }
        builder.build()
    }

    /// 编译整批单元
    ///
    /// Fails as a whole only when the registry cannot be built; every other
    /// failure stays inside the report of its unit.
    pub fn compile(
        &self,
        config: &CompileConfig,
    ) -> Result<BatchResult> {
        self.compile_with_token(config, &CancellationToken::new())
    }

    pub fn compile_with_token(
        &self,
        config: &CompileConfig,
        token: &CancellationToken,
    ) -> Result<BatchResult> {
        let start_time = Instant::now();
        info!(
            "Compiling batch: {} operators, {} programs",
            self.operators.len(),
            self.programs.len()
        );
        let registry = self.registry()?;

        // 第一阶段：算子类型推导
        let deduced: Vec<(UnitReport<FunctionDefinition>, Option<TypedFieldOperator>)> =
            map_units(&self.operators, config.parallel, |op| {
                let report = UnitReport::parsed(op.name.clone());
                if token.is_cancelled() {
                    return (report.cancel(), None);
                }
                match deduce_operator(&registry, op) {
                    Ok(typed) => {
                        let mut report = report;
                        report.advance();
                        (report, Some(typed))
                    }
                    Err(err) => (report.fail(err), None),
                }
            });

        let mut typed_operators: IndexMap<String, TypedFieldOperator> = IndexMap::new();
        let mut operator_reports = Vec::with_capacity(deduced.len());
        for (report, typed) in deduced {
            if let Some(typed) = typed {
                typed_operators.insert(typed.name.clone(), typed);
            }
            operator_reports.push(report);
        }

        // 第二阶段：算子降级与校验，被调算子从已推导的集合中内联
        let operator_reports: Vec<UnitReport<FunctionDefinition>> =
            map_units_owned(operator_reports, config.parallel, |report| {
                if report.state != UnitState::TypeDeduced {
                    return report;
                }
                match typed_operators.get(&report.name) {
                    Some(typed) => {
                        compile_operator(&registry, &typed_operators, typed, report, config, token)
                    }
                    None => report,
                }
            });

        let functions: IndexMap<String, FunctionDefinition> = operator_reports
            .iter()
            .filter_map(|r| r.output.as_ref())
            .map(|f| (f.name.clone(), f.clone()))
            .collect();

        // 第三阶段：程序
        let program_reports = map_units(&self.programs, config.parallel, |program| {
            compile_program(&registry, &functions, program, config, token)
        });

        let result = BatchResult {
            operators: operator_reports,
            programs: program_reports,
            total_duration_ms: start_time.elapsed().as_millis() as u64,
        };
        let failed = result.diagnostics().count();
        if failed > 0 {
            warn!("Batch finished with {} failed units", failed);
        }
        info!("Batch compiled in {} ms", result.total_duration_ms);
        Ok(result)
    }
}

fn compile_operator(
    registry: &Registry,
    typed_operators: &IndexMap<String, TypedFieldOperator>,
    typed: &TypedFieldOperator,
    mut report: UnitReport<FunctionDefinition>,
    config: &CompileConfig,
    token: &CancellationToken,
) -> UnitReport<FunctionDefinition> {
    if token.is_cancelled() {
        return report.cancel();
    }
    let function = match lower_operator(registry, typed_operators, typed, config) {
        Ok(function) => function,
        Err(err) => return report.fail(err),
    };
    report.advance();
    if !config.validate {
        return report.finish(function);
    }
    if token.is_cancelled() {
        return report.cancel();
    }
    if let Err(err) = validate_function(&function) {
        return report.fail(err);
    }
    report.advance();
    report.finish(function)
}

fn compile_program(
    registry: &Registry,
    functions: &IndexMap<String, FunctionDefinition>,
    program: &Program,
    config: &CompileConfig,
    token: &CancellationToken,
) -> UnitReport<ProgramUnit> {
    let mut report = UnitReport::parsed(program.name.clone());
    if token.is_cancelled() {
        return report.cancel();
    }
    let typed = match deduce_program(registry, program) {
        Ok(typed) => typed,
        Err(err) => return report.fail(err),
    };
    report.advance();

    if token.is_cancelled() {
        return report.cancel();
    }
    let unit = match lower_program(&typed, functions, config) {
        Ok(unit) => unit,
        Err(err) => return report.fail(err),
    };
    report.advance();
    if !config.validate {
        return report.finish(unit);
    }

    if token.is_cancelled() {
        return report.cancel();
    }
    if let Err(err) = validate_program(&unit) {
        return report.fail(err);
    }
    report.advance();
    report.finish(unit)
}

/// Order-preserving map, on the rayon pool when `parallel` is set
fn map_units<I, O, F>(
    items: &[I],
    parallel: bool,
    f: F,
) -> Vec<O>
where
    I: Sync,
    O: Send,
    F: Fn(&I) -> O + Sync + Send,
{
    if parallel {
        items.par_iter().map(f).collect()
    } else {
        items.iter().map(f).collect()
    }
}

fn map_units_owned<I, O, F>(
    items: Vec<I>,
    parallel: bool,
    f: F,
) -> Vec<O>
where
    I: Send,
    O: Send,
    F: Fn(I) -> O + Sync + Send,
{
    if parallel {
        items.into_par_iter().map(f).collect()
    } else {
        items.into_iter().map(f).collect()
    }
}

/// Read a JSON batch file
pub fn load_batch(path: &Path) -> anyhow::Result<Batch> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read batch: {}", path.display()))?;
    let batch: Batch = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse batch: {}", path.display()))?;
    debug!(
        "Loaded batch {}: {} operators, {} programs",
        path.display(),
        batch.operators.len(),
        batch.programs.len()
    );
    Ok(batch)
}

/// Write a batch as pretty-printed JSON
pub fn save_batch(
    batch: &Batch,
    path: &Path,
) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(batch).context("Failed to serialize batch")?;
    fs::write(path, content)
        .with_context(|| format!("Failed to write batch: {}", path.display()))?;
    Ok(())
}
