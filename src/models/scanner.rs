//! 扫描器定义与扫描状态
//!
//! `ScannerDefinition` 是注册表中的不可变条目；真正的可变状态
//! （`ScanInstance`）由流水线在每次列车启动时创建、结束时销毁。

use crate::scanners::ScanInstance;
use crate::vfs::VirtualAddress;
use serde::{Deserialize, Serialize};

/// 扫描器实例构造函数
///
/// 函数指针而非闭包：注册表是启动时写死的静态表，
/// 实例所需的运行期状态全部通过 `ScanContext` 在 process/finish 时获取。
pub type BuildFn = fn(&VirtualAddress) -> Box<dyn ScanInstance>;

/// 扫描器定义
///
/// # 字段
///
/// - `name`: 唯一名称，同时是持久化 ScanMarker 的键
/// - `order`: 执行优先级，列车按升序排列（相同值保持注册顺序）
/// - `default_on`: 默认是否启用
/// - `depends`: 依赖的其他扫描器名称（被依赖者强制启用且排在前面）
/// - `group`: 可选分组，用于成组开关
#[derive(Clone)]
pub struct ScannerDefinition {
    pub name: &'static str,
    pub order: u32,
    pub default_on: bool,
    pub depends: &'static [&'static str],
    pub group: Option<&'static str>,
    pub build: BuildFn,
}

impl std::fmt::Debug for ScannerDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerDefinition")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("default_on", &self.default_on)
            .field("depends", &self.depends)
            .field("group", &self.group)
            .finish()
    }
}

/// 每个 (扫描器定义, 地址) 对的最终状态码
///
/// 基线设计只有日志；这里额外把状态持久化到案件存储，
/// 让报表层能区分"没扫过"和"扫失败"。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    /// 扫描完成
    Done,
    /// process/finish 抛错（已按实例隔离）
    Failed,
    /// 资源护栏触发，未创建实例
    Skipped,
    /// 单对象截止时间到期
    TimedOut,
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanStatus::Done => "done",
            ScanStatus::Failed => "failed",
            ScanStatus::Skipped => "skipped",
            ScanStatus::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}
