//! 内存版案件存储
//!
//! `CaseStore` 的参考实现，供测试和单机运行使用。并发结构的选型
//! 跟随生产后端的约束：标记写入必须是原子的"检查并插入"，块分配
//! 必须全局自增且无空洞。

use crate::error::{AppError, Result};
use crate::models::{DerivedObjectRecord, IndexHit, ObjectAttrs, ObjectStat, ScanStatus};
use crate::storage::{BlockOwner, CaseStore, ResolvedObject};
use crate::vfs::{AddressStep, ByteStream, RootOpener, VirtualAddress};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::File;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 根证据来源
enum EvidenceSource {
    /// 内存字节（测试）
    Bytes(Arc<[u8]>),
    /// 磁盘文件（证据镜像）
    File(PathBuf),
}

struct EvidenceEntry {
    source: EvidenceSource,
    stat: ObjectStat,
}

/// 块分配表：下标即块号，只追加
#[derive(Default)]
struct BlockTable {
    owners: Vec<String>,
    /// 地址 -> 该地址分到的第一个块号
    first_block: HashMap<String, u64>,
}

/// 内存版案件存储
pub struct MemoryCase {
    evidence: DashMap<String, EvidenceEntry>,
    records: DashMap<String, DerivedObjectRecord>,
    children: DashMap<String, Vec<String>>,
    numeric_ids: DashMap<String, u64>,
    next_id: AtomicU64,
    markers: DashMap<String, ()>,
    statuses: DashMap<String, ScanStatus>,
    kv: DashMap<String, String>,
    blocks: Mutex<BlockTable>,
    hits: Mutex<Vec<IndexHit>>,
}

impl MemoryCase {
    pub fn new() -> Self {
        Self {
            evidence: DashMap::new(),
            records: DashMap::new(),
            children: DashMap::new(),
            numeric_ids: DashMap::new(),
            next_id: AtomicU64::new(1),
            markers: DashMap::new(),
            statuses: DashMap::new(),
            kv: DashMap::new(),
            blocks: Mutex::new(BlockTable::default()),
            hits: Mutex::new(Vec::new()),
        }
    }

    /// 登记内存字节形式的根证据
    pub fn add_evidence(&self, locator: &str, bytes: impl Into<Arc<[u8]>>) -> Result<VirtualAddress> {
        let address = VirtualAddress::root(locator)?;
        let bytes = bytes.into();
        let stat = ObjectStat {
            size: bytes.len() as u64,
            extents: Some(1),
        };
        self.evidence.insert(
            locator.to_string(),
            EvidenceEntry {
                source: EvidenceSource::Bytes(bytes),
                stat,
            },
        );
        self.assign_id(&address);
        Ok(address)
    }

    /// 登记磁盘文件形式的根证据
    pub fn add_evidence_file(&self, locator: &str, path: PathBuf) -> Result<VirtualAddress> {
        let address = VirtualAddress::root(locator)?;
        let size = std::fs::metadata(&path)?.len();
        self.evidence.insert(
            locator.to_string(),
            EvidenceEntry {
                source: EvidenceSource::File(path),
                stat: ObjectStat {
                    size,
                    extents: Some(1),
                },
            },
        );
        self.assign_id(&address);
        Ok(address)
    }

    /// 覆盖根证据的 extent 统计（镜像碎片化信息来自上游采集器）
    pub fn set_evidence_extents(&self, locator: &str, extents: usize) {
        if let Some(mut entry) = self.evidence.get_mut(locator) {
            entry.stat.extents = Some(extents);
        }
    }

    /// 全部命中（搜索层/测试用）
    pub fn all_hits(&self) -> Vec<IndexHit> {
        self.hits.lock().clone()
    }

    /// 已分配块数
    pub fn block_count(&self) -> u64 {
        self.blocks.lock().owners.len() as u64
    }

    fn assign_id(&self, address: &VirtualAddress) -> u64 {
        *self
            .numeric_ids
            .entry(address.to_string())
            .or_insert_with(|| self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn marker_key(scanner: &str, address: &VirtualAddress) -> String {
        format!("{}\u{0}{}", scanner, address)
    }

    /// 沿祖先链拼接展示路径
    fn display_path(&self, address: &VirtualAddress) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(address.clone());
        while let Some(addr) = cursor {
            if addr.is_root() {
                segments.push(addr.root_locator().to_string());
                break;
            }
            match self.records.get(&addr.to_string()) {
                Some(rec) => segments.push(rec.display_name.clone()),
                None => segments.push(addr.to_string()),
            }
            cursor = addr.parent();
        }
        segments.reverse();
        segments.join("/")
    }
}

impl Default for MemoryCase {
    fn default() -> Self {
        Self::new()
    }
}

impl RootOpener for MemoryCase {
    fn open_root(&self, locator: &str) -> Result<ByteStream> {
        let entry = self
            .evidence
            .get(locator)
            .ok_or_else(|| AppError::not_found(format!("evidence '{}'", locator)))?;
        match &entry.source {
            EvidenceSource::Bytes(bytes) => Ok(Box::new(Cursor::new(Arc::clone(bytes)))),
            EvidenceSource::File(path) => Ok(Box::new(File::open(path)?)),
        }
    }
}

impl CaseStore for MemoryCase {
    fn create_derived_object(
        &self,
        parent: &VirtualAddress,
        step: AddressStep,
        display_name: &str,
        attrs: &ObjectAttrs,
    ) -> Result<VirtualAddress> {
        let address = parent.child(step);
        let key = address.to_string();

        if self.records.contains_key(&key) {
            // 只追加：同一地址重复登记直接返回既有记录
            return Ok(address);
        }

        let record = DerivedObjectRecord {
            parent: parent.clone(),
            address: address.clone(),
            display_name: display_name.to_string(),
            attrs: attrs.clone(),
        };
        self.records.insert(key.clone(), record);
        self.children
            .entry(parent.to_string())
            .or_default()
            .push(key);
        self.assign_id(&address);

        debug!(address = %address, name = display_name, "registered derived object");
        Ok(address)
    }

    fn derived_children(&self, parent: &VirtualAddress) -> Result<Vec<DerivedObjectRecord>> {
        let Some(keys) = self.children.get(&parent.to_string()) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|k| self.records.get(k).map(|r| r.value().clone()))
            .collect())
    }

    fn resolve(&self, address: &VirtualAddress) -> Result<ResolvedObject> {
        let key = address.to_string();
        let numeric_id = self
            .numeric_ids
            .get(&key)
            .map(|id| *id)
            .ok_or_else(|| AppError::not_found(format!("object {}", key)))?;
        Ok(ResolvedObject {
            display_path: self.display_path(address),
            address: address.clone(),
            numeric_id,
        })
    }

    fn stat(&self, address: &VirtualAddress) -> Result<ObjectStat> {
        if address.is_root() {
            let entry = self
                .evidence
                .get(address.root_locator())
                .ok_or_else(|| AppError::not_found(format!("evidence '{}'", address)))?;
            return Ok(entry.stat);
        }
        let record = self
            .records
            .get(&address.to_string())
            .ok_or_else(|| AppError::not_found(format!("object {}", address)))?;
        Ok(ObjectStat {
            size: record.attrs.size,
            extents: None,
        })
    }

    fn try_mark_scanned(&self, scanner: &str, address: &VirtualAddress) -> Result<bool> {
        // DashMap::insert 对单键是原子的：返回 None 即本调用方赢得插入
        let won = self
            .markers
            .insert(Self::marker_key(scanner, address), ())
            .is_none();
        Ok(won)
    }

    fn set_scan_status(
        &self,
        scanner: &str,
        address: &VirtualAddress,
        status: ScanStatus,
    ) -> Result<()> {
        self.statuses
            .insert(Self::marker_key(scanner, address), status);
        Ok(())
    }

    fn scan_status(&self, scanner: &str, address: &VirtualAddress) -> Result<Option<ScanStatus>> {
        Ok(self
            .statuses
            .get(&Self::marker_key(scanner, address))
            .map(|s| *s))
    }

    fn kv_put(&self, key: &str, value: &str) -> Result<()> {
        self.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn kv_get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.kv.get(key).map(|v| v.value().clone()))
    }

    fn allocate_block(&self, owner: &VirtualAddress) -> Result<u64> {
        let mut table = self.blocks.lock();
        let block = table.owners.len() as u64;
        let key = owner.to_string();
        table.owners.push(key.clone());
        table.first_block.entry(key).or_insert(block);
        Ok(block)
    }

    fn block_owner(&self, block: u64) -> Result<Option<BlockOwner>> {
        let table = self.blocks.lock();
        // 分配表稠密无空洞，≤ block 的最大已分配块号即 block 本身
        let Some(owner_key) = table.owners.get(block as usize) else {
            return Ok(None);
        };
        let first_block = table.first_block[owner_key];
        let address: VirtualAddress = owner_key
            .parse()
            .map_err(|_| AppError::storage_error("corrupt block table"))?;
        Ok(Some(BlockOwner {
            address,
            first_block,
        }))
    }

    fn push_hits(&self, hits: &[IndexHit]) -> Result<()> {
        self.hits.lock().extend_from_slice(hits);
        Ok(())
    }

    fn reset_case(&self) -> Result<()> {
        self.records.clear();
        self.children.clear();
        self.markers.clear();
        self.statuses.clear();
        self.kv.clear();
        *self.blocks.lock() = BlockTable::default();
        self.hits.lock().clear();
        Ok(())
    }
}
