//! Case storage module
//!
//! The SQL-backed case database is an external collaborator; this module
//! defines the trait surface the engine consumes plus the reference
//! implementations used by tests and standalone runs:
//!
//! - `CaseStore`: derived-object records, scan markers/status, the
//!   idempotency key/value store, and the two append-only index tables
//!   (block assignments, hits)
//! - `MemoryCase`: in-memory `CaseStore` over dashmap/parking_lot
//! - `ArtifactStore`: deduplicated spool files for buffered containers
//! - `JobQueue` / `LocalJobQueue`: the job-farm seam

pub mod artifacts;
pub mod jobs;
pub mod memory;

pub use artifacts::{ArtifactStore, SealedArtifact};
pub use jobs::{JobCookie, JobOutcome, JobQueue, LocalJobQueue};
pub use memory::MemoryCase;

use crate::error::Result;
use crate::models::{DerivedObjectRecord, IndexHit, ObjectAttrs, ObjectStat, ScanStatus};
use crate::vfs::{AddressStep, RootOpener, VirtualAddress};

/// `resolve(address)` 的结果：展示路径 + 地址 + 数据库数字主键
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedObject {
    pub display_path: String,
    pub address: VirtualAddress,
    pub numeric_id: u64,
}

/// 块归属查询结果
///
/// `first_block` 是该地址分到的第一个块号；解码端用它把全局块号
/// 换算回地址相对偏移。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockOwner {
    pub address: VirtualAddress,
    pub first_block: u64,
}

/// 案件存储接口
///
/// 引擎消费的全部持久化能力。方法都是同步的：每个顶层对象由一个
/// 工作者独占扫描，存储后端自行决定内部并发策略。
pub trait CaseStore: RootOpener + Send + Sync {
    /// 登记一个派生对象（只追加；重复登记同一地址返回既有记录的地址）
    fn create_derived_object(
        &self,
        parent: &VirtualAddress,
        step: AddressStep,
        display_name: &str,
        attrs: &ObjectAttrs,
    ) -> Result<VirtualAddress>;

    /// 列出某地址的全部派生子对象
    fn derived_children(&self, parent: &VirtualAddress) -> Result<Vec<DerivedObjectRecord>>;

    /// 解析地址为 (展示路径, 地址, 数字主键)
    fn resolve(&self, address: &VirtualAddress) -> Result<ResolvedObject>;

    /// 资源护栏用的对象统计
    fn stat(&self, address: &VirtualAddress) -> Result<ObjectStat>;

    /// 原子地检查并写入 ScanMarker
    ///
    /// 语义等价于唯一约束插入：返回 `true` 表示本调用方赢得了
    /// 这个 (扫描器, 地址) 对，应当创建实例；`false` 表示已扫过。
    /// 多工作者竞争同一地址时，恰有一个拿到 `true`。
    fn try_mark_scanned(&self, scanner: &str, address: &VirtualAddress) -> Result<bool>;

    /// 写入每 (扫描器, 地址) 的状态码
    fn set_scan_status(
        &self,
        scanner: &str,
        address: &VirtualAddress,
        status: ScanStatus,
    ) -> Result<()>;

    /// 读取状态码
    fn scan_status(&self, scanner: &str, address: &VirtualAddress) -> Result<Option<ScanStatus>>;

    /// 幂等键值存储
    fn kv_put(&self, key: &str, value: &str) -> Result<()>;
    fn kv_get(&self, key: &str) -> Result<Option<String>>;

    /// 分配下一个索引块（全局自增、无空洞），绑定到 `owner`
    fn allocate_block(&self, owner: &VirtualAddress) -> Result<u64>;

    /// 范围查询块归属：拥有 ≤ `block` 的最大已分配块号的地址，
    /// 连同该地址的第一个块号
    fn block_owner(&self, block: u64) -> Result<Option<BlockOwner>>;

    /// 追加索引命中
    fn push_hits(&self, hits: &[IndexHit]) -> Result<()>;

    /// 整案重置：清空派生对象、标记、状态、索引表和键值存储
    fn reset_case(&self) -> Result<()>;
}
