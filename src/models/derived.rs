//! 派生对象记录与对象属性
//!
//! 容器递归发现子对象时创建 `DerivedObjectRecord`；记录只追加、
//! 创建后不再修改，仅在整案重置时删除。

use crate::vfs::VirtualAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 派生对象的文件属性
///
/// 大小总是已知（gzip 子对象在 finish 阶段解码计量）；
/// 修改时间与 uid/gid/mode 仅在格式提供时记录。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectAttrs {
    /// 解压后的字节大小
    pub size: u64,
    /// 修改时间
    pub modified: Option<DateTime<Utc>>,
    /// 属主（tar 等格式提供）
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// 权限位
    pub mode: Option<u32>,
}

/// 派生对象记录
///
/// 持久化元组 (父地址, 地址, 显示名, 属性)。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedObjectRecord {
    pub parent: VirtualAddress,
    pub address: VirtualAddress,
    pub display_name: String,
    pub attrs: ObjectAttrs,
}

/// 资源护栏使用的对象统计
///
/// `extents` 为 None 表示底层存储没有 extent 映射（例如派生对象），
/// 此时只按声明大小判定。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub extents: Option<usize>,
}

/// 全文索引命中
///
/// `encoded_offset` 内嵌块号与块内偏移：`(block << B) | intra`。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexHit {
    pub word_id: u32,
    pub encoded_offset: u64,
}
