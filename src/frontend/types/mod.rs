//! 类型描述与 unify 算法
//!
//! 字段类型系统的核心数据结构：
//! - ScalarKind: 标量元素类型
//! - Dimension: 带种类标签的命名轴
//! - Type: 标量 / 字段 / 元组 / 函数
//!
//! Both type-deduction passes build their types through the `make_*`
//! constructors here and combine them with [`unify`].

#![allow(clippy::result_large_err)]

pub mod errors;
pub mod symbol;

#[cfg(test)]
mod tests;

pub use errors::{TypeError, TypeResultExt};
pub use symbol::{is_identifier, make_symbol, ScopeId, Symbol, SymbolError, SymbolTable};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// 标量元素类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl ScalarKind {
    /// 是否支持算术运算
    pub fn is_arithmetic(&self) -> bool {
        !matches!(self, ScalarKind::Bool)
    }

    pub fn is_integral(&self) -> bool {
        matches!(self, ScalarKind::Int32 | ScalarKind::Int64)
    }

    pub fn is_floating(&self) -> bool {
        matches!(self, ScalarKind::Float32 | ScalarKind::Float64)
    }

    /// 是否支持逻辑运算
    pub fn is_logical(&self) -> bool {
        matches!(self, ScalarKind::Bool)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::Int32 => "int32",
            ScalarKind::Int64 => "int64",
            ScalarKind::Float32 => "float32",
            ScalarKind::Float64 => "float64",
        }
    }

    /// Parse a type-constructor name such as `float64`
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ScalarKind::Bool),
            "int32" => Some(ScalarKind::Int32),
            "int64" => Some(ScalarKind::Int64),
            "float32" => Some(ScalarKind::Float32),
            "float64" => Some(ScalarKind::Float64),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// 维度种类
///
/// Declaration order is the canonical order of dimensions inside a field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    /// 水平索引（网格点、边、单元）
    Horizontal,
    /// 邻居局部轴
    Local,
    /// 垂直层
    Vertical,
}

/// A named axis. Two dimensions are equal iff name and kind match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Dimension {
    pub kind: DimensionKind,
    pub name: String,
}

impl Dimension {
    pub fn new(
        name: impl Into<String>,
        kind: DimensionKind,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn horizontal(name: impl Into<String>) -> Self {
        Self::new(name, DimensionKind::Horizontal)
    }

    pub fn vertical(name: impl Into<String>) -> Self {
        Self::new(name, DimensionKind::Vertical)
    }

    pub fn local(name: impl Into<String>) -> Self {
        Self::new(name, DimensionKind::Local)
    }

    pub fn is_local(&self) -> bool {
        self.kind == DimensionKind::Local
    }
}

impl fmt::Display for Dimension {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Ordered dimension set of a field
pub type Dims = BTreeSet<Dimension>;

/// 函数签名
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionType {
    pub params: Vec<Type>,
    pub returns: Box<Type>,
}

/// 类型
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    /// 标量
    Scalar(ScalarKind),
    /// 字段：元素类型 + 非空维度集合
    Field { dtype: ScalarKind, dims: Dims },
    /// 元组
    Tuple(Vec<Type>),
    /// 函数
    Function(FunctionType),
}

impl Type {
    /// Element kind of scalars and fields
    pub fn dtype(&self) -> Option<ScalarKind> {
        match self {
            Type::Scalar(kind) => Some(*kind),
            Type::Field { dtype, .. } => Some(*dtype),
            Type::Tuple(_) | Type::Function(_) => None,
        }
    }

    /// Dimensions of a field; `None` for everything else
    pub fn dims(&self) -> Option<&Dims> {
        match self {
            Type::Field { dims, .. } => Some(dims),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Scalar(_))
    }

    pub fn is_field(&self) -> bool {
        matches!(self, Type::Field { .. })
    }

    /// Scalar or field with a numeric element type
    pub fn is_arithmetic(&self) -> bool {
        self.dtype().is_some_and(|kind| kind.is_arithmetic())
    }

    /// Scalar or field with a boolean element type
    pub fn is_logical(&self) -> bool {
        self.dtype().is_some_and(|kind| kind.is_logical())
    }

    /// Scalar, field, or tuple thereof
    pub fn is_data(&self) -> bool {
        match self {
            Type::Scalar(_) | Type::Field { .. } => true,
            Type::Tuple(elements) => elements.iter().all(Type::is_data),
            Type::Function(_) => false,
        }
    }

    /// Whether a function type appears anywhere inside this type
    pub fn contains_function(&self) -> bool {
        match self {
            Type::Function(_) => true,
            Type::Tuple(elements) => elements.iter().any(Type::contains_function),
            Type::Scalar(_) | Type::Field { .. } => false,
        }
    }

    /// Same shape with the element kind replaced; `None` for tuples and functions
    pub fn with_dtype(
        &self,
        kind: ScalarKind,
    ) -> Option<Type> {
        match self {
            Type::Scalar(_) => Some(Type::Scalar(kind)),
            Type::Field { dims, .. } => Some(Type::Field {
                dtype: kind,
                dims: dims.clone(),
            }),
            Type::Tuple(_) | Type::Function(_) => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            Type::Scalar(kind) => write!(f, "{}", kind),
            Type::Field { dtype, dims } => {
                let names: Vec<&str> = dims.iter().map(|d| d.name.as_str()).collect();
                write!(f, "Field[[{}], {}]", names.join(", "), dtype)
            }
            Type::Tuple(elements) => {
                let parts: Vec<String> = elements.iter().map(|t| t.to_string()).collect();
                write!(f, "tuple[{}]", parts.join(", "))
            }
            Type::Function(func) => {
                let params: Vec<String> = func.params.iter().map(|t| t.to_string()).collect();
                write!(f, "({}) -> {}", params.join(", "), func.returns)
            }
        }
    }
}

/// 构造标量类型
pub fn make_scalar(kind: ScalarKind) -> Type {
    Type::Scalar(kind)
}

/// 构造字段类型
///
/// A field over no dimensions is the scalar of its element kind. Listing the
/// same name under two different kinds is a [`TypeError::DimensionConflict`].
pub fn make_field(
    dtype: ScalarKind,
    dims: impl IntoIterator<Item = Dimension>,
) -> Result<Type, TypeError> {
    let mut set = Dims::new();
    for dim in dims {
        set = merge_dims(&set, &BTreeSet::from([dim]))?;
    }
    if set.is_empty() {
        return Ok(Type::Scalar(dtype));
    }
    Ok(Type::Field { dtype, dims: set })
}

/// 构造元组类型
pub fn make_tuple(elements: Vec<Type>) -> Type {
    Type::Tuple(elements)
}

/// 构造函数类型
pub fn make_function(
    params: Vec<Type>,
    returns: Type,
) -> Type {
    Type::Function(FunctionType {
        params,
        returns: Box::new(returns),
    })
}

/// Union of two dimension sets; a shared name must carry the same kind.
pub fn merge_dims(
    left: &Dims,
    right: &Dims,
) -> Result<Dims, TypeError> {
    let kinds: HashMap<&str, DimensionKind> =
        left.iter().map(|d| (d.name.as_str(), d.kind)).collect();
    for dim in right {
        if let Some(kind) = kinds.get(dim.name.as_str()) {
            if *kind != dim.kind {
                return Err(TypeError::DimensionConflict {
                    name: dim.name.clone(),
                    left: *kind,
                    right: dim.kind,
                });
            }
        }
    }
    Ok(left.union(right).cloned().collect())
}

/// 统一两个类型
///
/// - scalar ∘ scalar（同种类）→ scalar
/// - field ∘ scalar → field（广播，维度不变）
/// - field ∘ field → 维度并集
/// - tuple ∘ tuple → 逐元素统一
///
/// Commutative and idempotent: `unify(a, b) == unify(b, a)` and
/// `unify(t, t) == t` wherever defined.
pub fn unify(
    left: &Type,
    right: &Type,
) -> Result<Type, TypeError> {
    let mismatch = || TypeError::Mismatch {
        expected: left.clone(),
        found: right.clone(),
    };
    match (left, right) {
        (Type::Scalar(a), Type::Scalar(b)) => {
            if a == b {
                Ok(left.clone())
            } else {
                Err(mismatch())
            }
        }
        (Type::Field { dtype, .. }, Type::Scalar(kind))
        | (Type::Scalar(kind), Type::Field { dtype, .. }) => {
            if dtype == kind {
                Ok(if left.is_field() {
                    left.clone()
                } else {
                    right.clone()
                })
            } else {
                Err(mismatch())
            }
        }
        (
            Type::Field {
                dtype: a,
                dims: left_dims,
            },
            Type::Field {
                dtype: b,
                dims: right_dims,
            },
        ) => {
            if a != b {
                return Err(mismatch());
            }
            Ok(Type::Field {
                dtype: *a,
                dims: merge_dims(left_dims, right_dims)?,
            })
        }
        (Type::Tuple(xs), Type::Tuple(ys)) => {
            if xs.len() != ys.len() {
                return Err(TypeError::ArityMismatch {
                    expected: xs.len(),
                    found: ys.len(),
                });
            }
            xs.iter()
                .zip(ys)
                .map(|(x, y)| unify(x, y))
                .collect::<Result<Vec<_>, _>>()
                .map(Type::Tuple)
        }
        (Type::Function(f), Type::Function(g)) if f == g => Ok(left.clone()),
        _ => Err(mismatch()),
    }
}

/// Strict compatibility used at call boundaries and assignments.
///
/// `found` must unify with `expected` to exactly `expected`. A field argument
/// missing a dimension of the expected type is rejected instead of being
/// broadcast.
pub fn check_assignable(
    expected: &Type,
    found: &Type,
) -> Result<(), TypeError> {
    if let (Type::Tuple(es), Type::Tuple(fs)) = (expected, found) {
        if es.len() != fs.len() {
            return Err(TypeError::ArityMismatch {
                expected: es.len(),
                found: fs.len(),
            });
        }
        for (e, f) in es.iter().zip(fs) {
            check_assignable(e, f)?;
        }
        return Ok(());
    }

    let unified = unify(expected, found).map_err(|err| match err {
        TypeError::Mismatch { .. } => TypeError::Mismatch {
            expected: expected.clone(),
            found: found.clone(),
        },
        other => other,
    })?;

    let empty = Dims::new();
    let expected_dims = expected.dims().unwrap_or(&empty);
    let found_dims = found.dims().unwrap_or(&empty);
    let missing: Vec<Dimension> = expected_dims.difference(found_dims).cloned().collect();
    if !missing.is_empty() {
        return Err(TypeError::MissingDimensions {
            expected: expected.clone(),
            found: found.clone(),
            missing,
        });
    }
    let extra: Vec<Dimension> = found_dims.difference(expected_dims).cloned().collect();
    if !extra.is_empty() {
        return Err(TypeError::UnexpectedDimensions {
            expected: expected.clone(),
            found: found.clone(),
            extra,
        });
    }
    if unified != *expected {
        return Err(TypeError::Mismatch {
            expected: expected.clone(),
            found: found.clone(),
        });
    }
    Ok(())
}

/// Broadcast `ty` over additional dimensions
pub fn broadcast(
    ty: &Type,
    dims: &Dims,
) -> Result<Type, TypeError> {
    if dims.is_empty() {
        return Ok(ty.clone());
    }
    match ty {
        Type::Scalar(kind) => Ok(Type::Field {
            dtype: *kind,
            dims: dims.clone(),
        }),
        Type::Field { dtype, dims: own } => Ok(Type::Field {
            dtype: *dtype,
            dims: merge_dims(own, dims)?,
        }),
        Type::Tuple(elements) => elements
            .iter()
            .map(|t| broadcast(t, dims))
            .collect::<Result<Vec<_>, _>>()
            .map(Type::Tuple),
        Type::Function(_) => Err(TypeError::Mismatch {
            expected: Type::Field {
                dtype: ScalarKind::Bool,
                dims: dims.clone(),
            },
            found: ty.clone(),
        }),
    }
}

/// Same shape with a boolean element type
pub fn boolify(ty: &Type) -> Option<Type> {
    ty.with_dtype(ScalarKind::Bool)
}

/// Type equivalence used to check that lowering preserves types.
///
/// Scalars match on kind, fields on element kind and dimension set (order is
/// irrelevant), tuples and functions elementwise.
pub fn is_equivalent(
    left: &Type,
    right: &Type,
) -> bool {
    match (left, right) {
        (Type::Scalar(a), Type::Scalar(b)) => a == b,
        (
            Type::Field {
                dtype: a,
                dims: left_dims,
            },
            Type::Field {
                dtype: b,
                dims: right_dims,
            },
        ) => a == b && left_dims == right_dims,
        (Type::Tuple(xs), Type::Tuple(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| is_equivalent(x, y))
        }
        (Type::Function(f), Type::Function(g)) => {
            f.params.len() == g.params.len()
                && f.params
                    .iter()
                    .zip(&g.params)
                    .all(|(x, y)| is_equivalent(x, y))
                && is_equivalent(&f.returns, &g.returns)
        }
        _ => false,
    }
}
