//! 有界递归工作队列
//!
//! 容器递归不再在发现者的调用栈里同步展开（对抗性嵌套会把
//! 单工作者拖进无界深度优先递归），而是把子对象排进显式队列，
//! 在这里裁决两条边界：
//! - 嵌套深度上限
//! - 整棵递归树的展开字节总量上限
//!
//! 越界的子对象被跳过并记警告，不算错误。

use crate::models::DerivedObjectRecord;
use crate::vfs::VirtualAddress;
use std::collections::VecDeque;
use tracing::warn;

/// 队列里的一项待扫对象
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub address: VirtualAddress,
    pub depth: usize,
}

/// 单棵递归树的工作队列
pub struct WorkQueue {
    items: VecDeque<WorkItem>,
    max_depth: usize,
    max_expanded_bytes: u64,
    expanded_bytes: u64,
    skipped_depth: u64,
    skipped_bytes: u64,
}

impl WorkQueue {
    pub fn new(max_depth: usize, max_expanded_bytes: u64) -> Self {
        Self {
            items: VecDeque::new(),
            max_depth,
            max_expanded_bytes,
            expanded_bytes: 0,
            skipped_depth: 0,
            skipped_bytes: 0,
        }
    }

    /// 顶层对象入队
    pub fn push_root(&mut self, address: VirtualAddress) {
        self.items.push_back(WorkItem { address, depth: 0 });
    }

    /// 派生子对象入队（边界裁决发生在这里）
    pub fn push_child(&mut self, record: &DerivedObjectRecord, depth: usize) {
        if depth > self.max_depth {
            self.skipped_depth += 1;
            warn!(
                address = %record.address,
                depth,
                max_depth = self.max_depth,
                "nesting depth cap reached, child left unscanned"
            );
            return;
        }

        let projected = self.expanded_bytes.saturating_add(record.attrs.size);
        if projected > self.max_expanded_bytes {
            self.skipped_bytes += 1;
            warn!(
                address = %record.address,
                size = record.attrs.size,
                expanded = self.expanded_bytes,
                cap = self.max_expanded_bytes,
                "expansion byte cap reached, child left unscanned"
            );
            return;
        }

        self.expanded_bytes = projected;
        self.items.push_back(WorkItem {
            address: record.address.clone(),
            depth,
        });
    }

    pub fn pop(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn expanded_bytes(&self) -> u64 {
        self.expanded_bytes
    }

    /// (深度越界, 字节越界) 跳过计数
    pub fn skipped(&self) -> (u64, u64) {
        (self.skipped_depth, self.skipped_bytes)
    }
}
