//! 扫描流水线
//!
//! 在一个对象的字节流上执行有序扫描列车：
//! 1. 资源护栏：碎片化病态或超过大小硬上限的对象直接跳过
//!    （记警告，不算错误）
//! 2. 逐定义检查 ScanMarker——原子"检查并插入"，多工作者竞争
//!    同一地址时恰有一个赢家；只为赢到的定义创建实例
//! 3. 按固定分块读流；每个分块新建元数据映射，按列车顺序调用
//!    每个存活实例的 `process`
//! 4. 流耗尽后按列车顺序调用 `finish`
//! 5. 单个实例抛错按实例隔离：记日志、记状态，绝不波及兄弟
//!    实例或整个运行
//! 6. 只有 `finish` 能登记派生对象；递归扫描经由有界工作队列
//!
//! 错误容忍沿用处理器的老规矩：单个对象失败不中断整棵树。

pub mod context;
pub mod queue;

pub use context::{CancelToken, FinishContext, FlowCache, RunContext, ScanContext};
pub use queue::{WorkItem, WorkQueue};

use crate::error::{AppError, Result};
use crate::models::{DerivedObjectRecord, ScanStatus, ScannerDefinition};
use crate::scanners::{ChunkMeta, ScanChunk, ScanInstance};
use crate::vfs::VirtualAddress;
use scopeguard::defer;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 一棵递归树扫完后的统计
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeStats {
    pub objects_scanned: u64,
    pub objects_failed: u64,
    pub objects_skipped: u64,
    pub children_registered: u64,
}

struct LiveInstance {
    def: Arc<ScannerDefinition>,
    instance: Box<dyn ScanInstance>,
    failed: bool,
}

/// 扫描流水线
pub struct ScanPipeline {
    run: Arc<RunContext>,
    train: Vec<Arc<ScannerDefinition>>,
}

impl ScanPipeline {
    pub fn new(run: Arc<RunContext>, train: Vec<Arc<ScannerDefinition>>) -> Self {
        Self { run, train }
    }

    pub fn run_context(&self) -> &Arc<RunContext> {
        &self.run
    }

    /// 扫描一个顶层对象及其整棵派生树
    ///
    /// 单个对象的失败（IO 错误、超时）记入统计后继续处理队列中
    /// 的兄弟对象。
    pub fn scan_tree(&self, root: &VirtualAddress) -> Result<TreeStats> {
        let config = self.run.config();
        let mut queue = WorkQueue::new(config.max_depth, config.max_expanded_bytes);
        queue.push_root(root.clone());

        let mut stats = TreeStats::default();
        while let Some(item) = queue.pop() {
            match self.scan_object(&item, &mut queue, &mut stats) {
                Ok(()) => {}
                Err(e) => {
                    stats.objects_failed += 1;
                    warn!(address = %item.address, error = %e, "object scan aborted");
                }
            }
        }

        let (skipped_depth, skipped_bytes) = queue.skipped();
        info!(
            root = %root,
            scanned = stats.objects_scanned,
            failed = stats.objects_failed,
            skipped = stats.objects_skipped,
            children = stats.children_registered,
            skipped_depth,
            skipped_bytes,
            expanded_bytes = queue.expanded_bytes(),
            "scan tree complete"
        );
        Ok(stats)
    }

    /// 单对象扫描（列车执行）
    fn scan_object(
        &self,
        item: &WorkItem,
        queue: &mut WorkQueue,
        stats: &mut TreeStats,
    ) -> Result<()> {
        let address = &item.address;
        let store = self.run.store();

        // 1. 资源护栏：实例创建之前裁决
        let stat = store.stat(address)?;
        let config = self.run.config();
        let guard_reason = match stat.extents {
            Some(extents) if extents > config.max_extents => Some(format!(
                "pathological fragmentation: {} extents (cap {})",
                extents, config.max_extents
            )),
            _ if stat.size > config.max_object_bytes => Some(format!(
                "declared size {} exceeds hard cap {}",
                stat.size, config.max_object_bytes
            )),
            _ => None,
        };
        if let Some(reason) = guard_reason {
            warn!(address = %address, %reason, "resource guard tripped, object left unscanned");
            for def in &self.train {
                if store.scan_status(def.name, address)?.is_none() {
                    store.set_scan_status(def.name, address, ScanStatus::Skipped)?;
                }
            }
            stats.objects_skipped += 1;
            return Ok(());
        }

        // 2. 原子标记：只为赢到 (定义, 地址) 对的定义创建实例
        let mut live: Vec<LiveInstance> = Vec::with_capacity(self.train.len());
        for def in &self.train {
            if store.try_mark_scanned(def.name, address)? {
                live.push(LiveInstance {
                    def: Arc::clone(def),
                    instance: (def.build)(address),
                    failed: false,
                });
            }
        }
        if live.is_empty() {
            debug!(address = %address, "all definitions already scanned");
            return Ok(());
        }

        let ctx = ScanContext::for_object(Arc::clone(&self.run), address.clone());

        // 对象扫完后回收它的缓冲工件
        let artifact_key = address.to_string();
        defer! {
            self.run.artifacts().remove(&artifact_key);
        }

        // 3. 分块循环
        let mut stream = self
            .run
            .drivers()
            .open(store.as_ref(), address)
            .map_err(|e| {
                for slot in &live {
                    let _ = store.set_scan_status(slot.def.name, address, ScanStatus::Failed);
                }
                e
            })?;

        let mut buf = vec![0u8; config.chunk_size];
        let mut base_offset = 0u64;
        loop {
            if ctx.cancel().check("chunk loop").is_err() {
                warn!(address = %address, "object deadline expired mid-scan");
                for slot in live.iter().filter(|s| !s.failed) {
                    store.set_scan_status(slot.def.name, address, ScanStatus::TimedOut)?;
                }
                stats.objects_failed += 1;
                return Ok(());
            }

            let filled = match read_full(stream.as_mut(), &mut buf) {
                Ok(n) => n,
                Err(e) => {
                    // 证据不可读：只中止当前对象的列车
                    for slot in live.iter().filter(|s| !s.failed) {
                        store.set_scan_status(slot.def.name, address, ScanStatus::Failed)?;
                    }
                    return Err(AppError::Io(e));
                }
            };
            if filled == 0 {
                break;
            }

            let chunk = ScanChunk {
                data: &buf[..filled],
                base_offset,
            };
            // 每个分块新建：映射只服务同一列车在同一分块上的协作
            let mut meta = ChunkMeta::new();

            for slot in live.iter_mut().filter(|s| !s.failed) {
                if let Err(e) = slot.instance.process(&chunk, &mut meta, &ctx) {
                    warn!(
                        scanner = slot.def.name,
                        address = %address,
                        error = %e,
                        "scan instance failed in process, siblings continue"
                    );
                    slot.failed = true;
                    store.set_scan_status(slot.def.name, address, ScanStatus::Failed)?;
                }
            }

            base_offset += filled as u64;
        }

        // 4. finish，列车顺序；仍然按实例隔离错误
        let mut pending: Vec<DerivedObjectRecord> = Vec::new();
        for slot in live.iter_mut() {
            if slot.failed {
                continue;
            }
            if ctx.cancel().check("finish").is_err() {
                warn!(address = %address, "object deadline expired before finish completed");
                store.set_scan_status(slot.def.name, address, ScanStatus::TimedOut)?;
                continue;
            }
            let mut finish_ctx = FinishContext::new(&ctx, &mut pending);
            match slot.instance.finish(&mut finish_ctx) {
                Ok(()) => {
                    store.set_scan_status(slot.def.name, address, ScanStatus::Done)?;
                }
                Err(e) => {
                    warn!(
                        scanner = slot.def.name,
                        address = %address,
                        error = %e,
                        "scan instance failed in finish, siblings continue"
                    );
                    slot.failed = true;
                    store.set_scan_status(slot.def.name, address, ScanStatus::Failed)?;
                }
            }
        }

        // 5. 递归：子对象交给有界队列
        stats.objects_scanned += 1;
        stats.children_registered += pending.len() as u64;
        for record in &pending {
            queue.push_child(record, item.depth + 1);
        }
        Ok(())
    }
}

/// 读满缓冲或到 EOF
fn read_full<R: Read + ?Sized>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
