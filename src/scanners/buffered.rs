//! 类型门控缓冲策略
//!
//! 容器扫描器共用的"先无聊、后缓冲"策略对象：在观察到感兴趣的
//! 内容类型之前保持惰性；一旦命中，把对象的完整字节流缓冲到
//! 工件存储（按地址键去重：同一对象上叠放的多个容器实例只有
//! 一份真正落盘），`finish` 阶段在完整工件上解析。

use crate::error::{AppError, Result};
use crate::pipeline::ScanContext;
use crate::scanners::{ScanChunk, ChunkMeta, META_CONTENT_TYPE};
use crate::storage::SealedArtifact;
use crate::vfs::VirtualAddress;

/// 持久化类型分类事实的键
pub fn type_fact_key(address: &VirtualAddress) -> String {
    format!("type:{}", address)
}

enum GateState {
    /// 尚未见到第一个分块
    Undecided,
    /// 类型不感兴趣，保持惰性
    Boring,
    /// 正在缓冲
    Buffering,
}

/// 类型门控缓冲器
pub struct TypeGatedBuffer {
    address: VirtualAddress,
    key: String,
    wanted: &'static [&'static str],
    state: GateState,
}

impl TypeGatedBuffer {
    pub fn new(address: VirtualAddress, wanted: &'static [&'static str]) -> Self {
        let key = address.to_string();
        Self {
            address,
            key,
            wanted,
            state: GateState::Undecided,
        }
    }

    /// 喂一个分块
    ///
    /// 第一个分块上裁决门控：先查本分块元数据里的类型事实，
    /// 再查持久化的分类事实；两处都没有就保持惰性。
    pub fn offer(&mut self, chunk: &ScanChunk<'_>, meta: &ChunkMeta, ctx: &ScanContext) -> Result<()> {
        if matches!(self.state, GateState::Undecided) {
            let content_type = meta
                .text(META_CONTENT_TYPE)
                .map(str::to_string)
                .or_else(|| {
                    ctx.store()
                        .kv_get(&type_fact_key(&self.address))
                        .ok()
                        .flatten()
                });

            self.state = match content_type {
                Some(ty) if self.wanted.contains(&ty.as_str()) => GateState::Buffering,
                _ => GateState::Boring,
            };
        }

        if matches!(self.state, GateState::Buffering) {
            ctx.artifacts().append(&self.key, chunk.base_offset, chunk.data)?;
        }
        Ok(())
    }

    /// 是否已进入缓冲态
    pub fn is_buffering(&self) -> bool {
        matches!(self.state, GateState::Buffering)
    }

    /// 封存并取回完整工件（仅在缓冲态下可用）
    pub fn sealed(&self, ctx: &ScanContext) -> Result<SealedArtifact> {
        if !self.is_buffering() {
            return Err(AppError::Internal(
                "sealed() called on a boring buffer".into(),
            ));
        }
        ctx.artifacts().seal(&self.key)
    }
}
