//! 类型构造器测试模块


use crate::frontend::types::*;

pub(crate) fn dim_i() -> Dimension {
    Dimension::horizontal("I")
}

pub(crate) fn dim_j() -> Dimension {
    Dimension::horizontal("J")
}

pub(crate) fn dim_k() -> Dimension {
    Dimension::vertical("K")
}

pub(crate) fn field(
    dtype: ScalarKind,
    dims: &[Dimension],
) -> Type {
    make_field(dtype, dims.iter().cloned()).unwrap()
}
