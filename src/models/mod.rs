/**
 * 核心数据模型模块
 *
 * 定义引擎各子系统共享的数据结构：
 * - 引擎配置（分块大小、索引块位宽、资源护栏、递归边界）
 * - 扫描器定义与扫描状态
 * - 派生对象记录与对象属性
 */
pub mod config;
pub mod derived;
pub mod scanner;

// 重新导出核心类型
pub use config::{CorrelationCacheConfig, EngineConfig};
pub use derived::{DerivedObjectRecord, IndexHit, ObjectAttrs, ObjectStat};
pub use scanner::{ScanStatus, ScannerDefinition};
