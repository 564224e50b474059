//! Batch registry
//!
//! Offset/connectivity metadata, operator signatures and external function
//! signatures. A [`RegistryBuilder`] collects them; [`RegistryBuilder::build`]
//! validates and freezes the result into an `Arc<Registry>` that every pass of
//! the batch reads and none mutates.

#![allow(clippy::result_large_err)]

use crate::frontend::builtins::is_builtin_name;
use crate::frontend::operator::ast::FieldOperator;
use crate::frontend::types::{
    is_identifier, make_field, Dimension, Dims, FunctionType, ScalarKind, Type, TypeError,
    TypeResultExt,
};
use crate::util::diagnostic::{Diagnostic, ErrorKind, Result, Stage};
use crate::util::span::SourceLocation;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// 偏移种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OffsetKind {
    /// Shift along a structured axis by an integer amount
    Cartesian,
    /// Neighbor table of an unstructured grid
    Unstructured { max_neighbors: usize },
}

/// Named mapping from a source dimension to neighbor coordinates in the
/// target dimensions. Shifting a field replaces `source` with `targets`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connectivity {
    pub name: String,
    pub source: Dimension,
    pub targets: Vec<Dimension>,
    pub kind: OffsetKind,
    /// Declaration site, for registry diagnostics
    #[serde(default)]
    pub location: SourceLocation,
}

impl Connectivity {
    /// Structured shift along `dim` (e.g. `Ioff: I -> I`)
    pub fn cartesian(
        name: impl Into<String>,
        dim: Dimension,
    ) -> Self {
        Self {
            name: name.into(),
            source: dim.clone(),
            targets: vec![dim],
            kind: OffsetKind::Cartesian,
            location: SourceLocation::dummy(),
        }
    }

    /// Neighbor table from `source` to `target`, indexed along `local`
    /// (e.g. `E2V: Vertex -> [Edge, E2VDim]`)
    pub fn unstructured(
        name: impl Into<String>,
        source: Dimension,
        target: Dimension,
        local: Dimension,
        max_neighbors: usize,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            targets: vec![target, local],
            kind: OffsetKind::Unstructured { max_neighbors },
            location: SourceLocation::dummy(),
        }
    }

    pub fn with_location(
        mut self,
        location: SourceLocation,
    ) -> Self {
        self.location = location;
        self
    }

    /// Local (neighbor) axes introduced by this offset
    pub fn local_dims(&self) -> impl Iterator<Item = &Dimension> {
        self.targets.iter().filter(|d| d.is_local())
    }

    /// Type of a field over `dims` after shifting by this offset.
    ///
    /// `source` is replaced by the targets. Selecting a single neighbor
    /// (`index` on an unstructured offset) introduces no local axis.
    /// A target the operand already carries would fuse two independent
    /// axes and is rejected.
    pub fn shifted(
        &self,
        dtype: ScalarKind,
        dims: &Dims,
        index: Option<i64>,
    ) -> std::result::Result<Type, TypeError> {
        let selected = index.is_some();
        let remaining: Vec<Dimension> = dims
            .iter()
            .filter(|d| **d != self.source)
            .cloned()
            .collect();
        let targets: Vec<Dimension> = self
            .targets
            .iter()
            .filter(|d| !(selected && d.is_local()))
            .cloned()
            .collect();
        if let Some(overlap) = targets
            .iter()
            .find(|t| remaining.iter().any(|d| d.name == t.name))
        {
            return Err(TypeError::DimensionOverlap {
                offset: self.name.clone(),
                name: overlap.name.clone(),
            });
        }
        make_field(dtype, remaining.into_iter().chain(targets))
    }
}

/// 算子签名（来自声明的注解）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorSignature {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub returns: Type,
    pub location: SourceLocation,
}

impl OperatorSignature {
    pub fn of<T>(op: &FieldOperator<T>) -> Self {
        Self {
            name: op.name.clone(),
            params: op
                .params
                .iter()
                .map(|p| (p.name.clone(), p.ty.clone()))
                .collect(),
            returns: op.returns.clone(),
            location: op.location.clone(),
        }
    }

    pub fn function_type(&self) -> FunctionType {
        FunctionType {
            params: self.params.iter().map(|(_, ty)| ty.clone()).collect(),
            returns: Box::new(self.returns.clone()),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Read-only snapshot shared by every unit of a batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    offsets: IndexMap<String, Connectivity>,
    operators: IndexMap<String, OperatorSignature>,
    functions: IndexMap<String, FunctionType>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn offset(
        &self,
        name: &str,
    ) -> Option<&Connectivity> {
        self.offsets.get(name)
    }

    pub fn operator(
        &self,
        name: &str,
    ) -> Option<&OperatorSignature> {
        self.operators.get(name)
    }

    /// External (non-inlinable) function signature
    pub fn function(
        &self,
        name: &str,
    ) -> Option<&FunctionType> {
        self.functions.get(name)
    }

    pub fn offsets(&self) -> impl Iterator<Item = &Connectivity> {
        self.offsets.values()
    }

    pub fn operators(&self) -> impl Iterator<Item = &OperatorSignature> {
        self.operators.values()
    }

    /// Whether `name` is callable (operator or external function)
    pub fn is_callable(
        &self,
        name: &str,
    ) -> bool {
        self.operators.contains_key(name) || self.functions.contains_key(name)
    }
}

/// 注册表构建器
#[derive(Debug, Clone, Default)]
pub struct RegistryBuilder {
    offsets: Vec<Connectivity>,
    operators: Vec<OperatorSignature>,
    functions: Vec<(String, FunctionType, SourceLocation)>,
}

impl RegistryBuilder {
    pub fn offset(
        mut self,
        connectivity: Connectivity,
    ) -> Self {
        self.add_offset(connectivity);
        self
    }

    pub fn add_offset(
        &mut self,
        connectivity: Connectivity,
    ) {
        self.offsets.push(connectivity);
    }

    /// Register the declared signature of a field operator
    pub fn add_operator<T>(
        &mut self,
        op: &FieldOperator<T>,
    ) {
        self.operators.push(OperatorSignature::of(op));
    }

    pub fn add_signature(
        &mut self,
        signature: OperatorSignature,
    ) {
        self.operators.push(signature);
    }

    /// Register an external function callable from operator bodies
    pub fn add_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<Type>,
        returns: Type,
    ) {
        self.functions.push((
            name.into(),
            FunctionType {
                params,
                returns: Box::new(returns),
            },
            SourceLocation::dummy(),
        ));
    }

    /// 校验并冻结
    pub fn build(self) -> Result<Arc<Registry>> {
        let mut registry = Registry::default();
        let mut seen: IndexMap<String, SourceLocation> = IndexMap::new();
        let mut claim = |name: &str, location: &SourceLocation| -> Result<()> {
            if !is_identifier(name) {
                return Err(Diagnostic::unsupported(
                    Stage::Registry,
                    location.clone(),
                    format!("`{}` is not a valid identifier", name),
                    name,
                ));
            }
            if is_builtin_name(name) {
                return Err(Diagnostic::new(
                    Stage::Registry,
                    ErrorKind::DuplicateDefinition,
                    location.clone(),
                    format!("`{}` shadows a builtin", name),
                )
                .with_offending(name));
            }
            if let Some(previous) = seen.get(name) {
                return Err(Diagnostic::new(
                    Stage::Registry,
                    ErrorKind::DuplicateDefinition,
                    location.clone(),
                    format!("`{}` is registered more than once", name),
                )
                .with_offending(name)
                .with_related(previous.clone()));
            }
            seen.insert(name.to_string(), location.clone());
            Ok(())
        };

        for connectivity in self.offsets {
            claim(&connectivity.name, &connectivity.location)?;
            check_connectivity(&connectivity)?;
            registry
                .offsets
                .insert(connectivity.name.clone(), connectivity);
        }
        for signature in self.operators {
            claim(&signature.name, &signature.location)?;
            check_signature_types(
                &signature.name,
                signature.params.iter().map(|(_, ty)| ty),
                &signature.returns,
                &signature.location,
            )?;
            registry
                .operators
                .insert(signature.name.clone(), signature);
        }
        for (name, func, location) in self.functions {
            claim(&name, &location)?;
            check_signature_types(&name, func.params.iter(), &func.returns, &location)?;
            registry.functions.insert(name, func);
        }

        debug!(
            "Registry frozen: {} offsets, {} operators, {} functions",
            registry.offsets.len(),
            registry.operators.len(),
            registry.functions.len()
        );
        Ok(Arc::new(registry))
    }
}

fn check_connectivity(connectivity: &Connectivity) -> Result<()> {
    let location = connectivity.location.clone();
    if connectivity.targets.is_empty() {
        return Err(Diagnostic::unsupported(
            Stage::Registry,
            location,
            format!("offset `{}` has no target dimension", connectivity.name),
            &connectivity.name,
        ));
    }
    if connectivity.kind == OffsetKind::Cartesian
        && connectivity.targets != [connectivity.source.clone()]
    {
        return Err(Diagnostic::new(
            Stage::Registry,
            ErrorKind::DimensionMismatch,
            location,
            format!(
                "Cartesian offset `{}` must map `{}` onto itself",
                connectivity.name, connectivity.source
            ),
        )
        .with_offending(&connectivity.name));
    }
    // 目标维度之间不能同名异种
    make_field(ScalarKind::Bool, connectivity.targets.iter().cloned())
        .map(|_| ())
        .located(Stage::Registry, &location, &connectivity.name)
}

fn check_signature_types<'a>(
    name: &str,
    params: impl Iterator<Item = &'a Type>,
    returns: &'a Type,
    location: &SourceLocation,
) -> Result<()> {
    for ty in params.chain(std::iter::once(returns)) {
        if !ty.is_data() {
            return Err(Diagnostic::unsupported(
                Stage::Registry,
                location.clone(),
                format!("`{}` uses non-data type {} in its signature", name, ty),
                name,
            ));
        }
    }
    Ok(())
}
