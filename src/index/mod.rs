//! 逻辑块索引
//!
//! 平面全文索引只存 64 位编码偏移；本模块维护编码两端：
//! - 扫描侧（`IndexScan`）：把对象字节流喂给字典自动机，按块
//!   边界分配 IndexBlock，把命中持久化为 `(词id, (块号<<B)|块内偏移)`
//! - 查询侧（`OffsetDecoder`）：把编码偏移还原成
//!   (虚拟地址, 地址内偏移)
//!
//! 块在对象的索引长度越过块边界时惰性分配；同一对象的块号连续，
//! 解码端靠"该地址的第一个块号"做差得到地址相对偏移。

pub mod dictionary;

#[cfg(test)]
mod block_property_tests;

pub use dictionary::{Dictionary, DictionaryEntry};

use crate::error::{AppError, Result};
use crate::models::IndexHit;
use crate::pipeline::{FinishContext, ScanContext};
use crate::scanners::{ChunkMeta, ScanChunk, ScanInstance};
use crate::storage::{BlockOwner, CaseStore};
use crate::vfs::VirtualAddress;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::debug;

/// 编码一个索引偏移：`(块号 << B) | 块内偏移`
///
/// 在块的有效偏移范围内，编码与解码互为双射。
#[inline]
pub fn encode_offset(block: u64, intra: u64, block_bits: u32) -> u64 {
    debug_assert!(intra < (1u64 << block_bits));
    (block << block_bits) | intra
}

/// 拆开编码偏移为 (块号, 块内偏移)
#[inline]
pub fn split_offset(encoded: u64, block_bits: u32) -> (u64, u64) {
    (encoded >> block_bits, encoded & ((1u64 << block_bits) - 1))
}

/// 解码一个编码偏移为 (归属地址, 地址相对偏移)
///
/// 归属查询返回该地址的第一个块号；同一地址的块连续分配，
/// `(块号 - 首块号) << B | 块内偏移` 即地址相对偏移。
pub fn decode_offset(
    store: &dyn CaseStore,
    encoded: u64,
    block_bits: u32,
) -> Result<(VirtualAddress, u64)> {
    let (block, intra) = split_offset(encoded, block_bits);
    let owner = store
        .block_owner(block)?
        .ok_or_else(|| AppError::not_found(format!("index block {}", block)))?;
    let local = ((block - owner.first_block) << block_bits) | intra;
    Ok((owner.address, local))
}

/// 查询侧解码器（搜索/报表层使用）
///
/// 块归属基本不变，套一层 LRU 免得每个命中都打一次存储。
pub struct OffsetDecoder {
    store: Arc<dyn CaseStore>,
    block_bits: u32,
    cache: Mutex<LruCache<u64, BlockOwner>>,
}

impl OffsetDecoder {
    pub fn new(store: Arc<dyn CaseStore>, block_bits: u32) -> Self {
        Self {
            store,
            block_bits,
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(4096).expect("nonzero cache capacity"),
            )),
        }
    }

    pub fn decode(&self, encoded: u64) -> Result<(VirtualAddress, u64)> {
        let (block, intra) = split_offset(encoded, self.block_bits);

        if let Some(owner) = self.cache.lock().get(&block) {
            let local = ((block - owner.first_block) << self.block_bits) | intra;
            return Ok((owner.address.clone(), local));
        }

        let owner = self
            .store
            .block_owner(block)?
            .ok_or_else(|| AppError::not_found(format!("index block {}", block)))?;
        let local = ((block - owner.first_block) << self.block_bits) | intra;
        let address = owner.address.clone();
        self.cache.lock().put(block, owner);
        Ok((address, local))
    }
}

/// 逻辑块索引扫描器
///
/// 跨整个对象扫描保持的状态：当前块号与相对偏移基线。
/// 下一个未分配块号由案件存储的自增计数器持有。
pub struct IndexScan {
    address: VirtualAddress,
    current_block: u64,
    /// 当前分块基址相对当前块起点的偏移
    ///
    /// 块边界在分块中段被越过时基线会暂时为负（命中触发了新块
    /// 分配、而分块基址还在旧块里），所以是有符号的。
    rel: i64,
    started: bool,
    hits_emitted: u64,
}

impl IndexScan {
    pub fn new(address: VirtualAddress) -> Self {
        Self {
            address,
            current_block: 0,
            rel: 0,
            started: false,
            hits_emitted: 0,
        }
    }
}

impl ScanInstance for IndexScan {
    fn process(
        &mut self,
        chunk: &ScanChunk<'_>,
        _meta: &mut ChunkMeta,
        ctx: &ScanContext,
    ) -> Result<()> {
        let block_bits = ctx.config().index_block_bits;
        let block_size = 1i64 << block_bits;
        let store = ctx.store();

        if !self.started {
            self.current_block = store.allocate_block(&self.address)?;
            self.rel = 0;
            self.started = true;
        }

        // 自动机按结束位置产出命中；基线重置要求起始位置单调递增，
        // 先收集再按起始偏移排序
        let mut matches: Vec<(usize, u32)> = ctx
            .automaton()
            .find_iter(chunk.data)
            .map(|mat| {
                (
                    mat.start(),
                    ctx.dictionary().word_id(mat.pattern().as_usize()),
                )
            })
            .collect();
        matches.sort_unstable_by_key(|&(start, _)| start);

        let mut hits = Vec::new();
        for (start, word_id) in matches {
            let mut pos = self.rel + start as i64;

            // 命中落到当前块之外：分配新块并重置基线
            while pos >= block_size {
                self.current_block = store.allocate_block(&self.address)?;
                self.rel -= block_size;
                pos -= block_size;
            }

            hits.push(IndexHit {
                word_id,
                encoded_offset: encode_offset(self.current_block, pos as u64, block_bits),
            });
        }

        if !hits.is_empty() {
            self.hits_emitted += hits.len() as u64;
            store.push_hits(&hits)?;
        }

        self.rel += chunk.data.len() as i64;
        Ok(())
    }

    fn finish(&mut self, _ctx: &mut FinishContext<'_>) -> Result<()> {
        debug!(
            address = %self.address,
            hits = self.hits_emitted,
            "index scan finished"
        );
        Ok(())
    }
}
