//! 内容类型识别扫描器
//!
//! 列车里排最前：嗅探首分块的魔数，拿不准时按展示名猜 MIME，
//! 把分类结果写进每个分块的元数据映射（同列车的容器扫描器消费），
//! 并持久化成分类事实（后续列车经由键值存储消费）。

use crate::error::Result;
use crate::pipeline::{FinishContext, ScanContext};
use crate::scanners::buffered::type_fact_key;
use crate::scanners::{
    ChunkMeta, MetaFact, ScanChunk, ScanInstance, META_CONTENT_TYPE, TYPE_GZIP, TYPE_OCTET_STREAM,
    TYPE_PCAP, TYPE_TAR, TYPE_ZIP,
};
use crate::vfs::VirtualAddress;
use tracing::debug;

/// 按魔数嗅探内容类型
///
/// 只认引擎自带驱动关心的那几类；认不出返回 None。
pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x50, 0x4B, 0x03, 0x04]) {
        return Some(TYPE_ZIP);
    }
    if data.starts_with(&[0x1F, 0x8B]) {
        return Some(TYPE_GZIP);
    }
    if data.len() >= 4 {
        match [data[0], data[1], data[2], data[3]] {
            // pcap：usec/nsec 精度 × 两种字节序
            [0xD4, 0xC3, 0xB2, 0xA1]
            | [0xA1, 0xB2, 0xC3, 0xD4]
            | [0x4D, 0x3C, 0xB2, 0xA1]
            | [0xA1, 0xB2, 0x3C, 0x4D] => return Some(TYPE_PCAP),
            _ => {}
        }
    }
    // tar：257 偏移处的 "ustar"
    if data.len() >= 262 && &data[257..262] == b"ustar" {
        return Some(TYPE_TAR);
    }
    None
}

/// 内容类型识别扫描器
pub struct TypeScan {
    address: VirtualAddress,
    detected: Option<String>,
}

impl TypeScan {
    pub fn new(address: VirtualAddress) -> Self {
        Self {
            address,
            detected: None,
        }
    }

    /// 展示名兜底：按扩展名猜 MIME
    fn guess_from_name(&self, ctx: &ScanContext) -> Option<String> {
        let resolved = ctx.store().resolve(&self.address).ok()?;
        let file_name = resolved.display_path.rsplit('/').next()?.to_string();
        mime_guess::from_path(&file_name)
            .first_raw()
            .map(str::to_string)
    }
}

impl ScanInstance for TypeScan {
    fn process(
        &mut self,
        chunk: &ScanChunk<'_>,
        meta: &mut ChunkMeta,
        ctx: &ScanContext,
    ) -> Result<()> {
        if self.detected.is_none() {
            let ty = if chunk.base_offset == 0 {
                sniff_content_type(chunk.data)
                    .map(str::to_string)
                    .or_else(|| self.guess_from_name(ctx))
                    .unwrap_or_else(|| TYPE_OCTET_STREAM.to_string())
            } else {
                // 首分块缺席（不应发生）：保守归为字节流
                TYPE_OCTET_STREAM.to_string()
            };

            ctx.store().kv_put(&type_fact_key(&self.address), &ty)?;
            debug!(address = %self.address, content_type = %ty, "classified");
            self.detected = Some(ty);
        }

        if let Some(ty) = &self.detected {
            meta.put(META_CONTENT_TYPE, MetaFact::Text(ty.clone()));
        }
        Ok(())
    }

    fn finish(&mut self, _ctx: &mut FinishContext<'_>) -> Result<()> {
        Ok(())
    }
}
