//! 算子类型推断测试
