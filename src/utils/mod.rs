//! 通用工具函数模块
//!
//! 提供编码转换等通用工具。

pub mod encoding;

pub use encoding::*;
