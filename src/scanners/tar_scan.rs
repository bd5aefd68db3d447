//! TAR 容器扫描器
//!
//! 与 ZIP 同一套"门控 + 缓冲 + finish 枚举"模式。tar 成员未压缩，
//! 步骤参数直接取"数据区偏移 + 大小"；uid/gid/mode 从 tar 头原样
//! 记进派生对象属性。

use crate::error::{AppError, Result};
use crate::models::ObjectAttrs;
use crate::pipeline::{FinishContext, ScanContext};
use crate::scanners::{ChunkMeta, ScanChunk, ScanInstance, TypeGatedBuffer, TYPE_TAR};
use crate::utils::encoding::decode_entry_name;
use crate::vfs::drivers::TAR_SPECIFIER;
use crate::vfs::{AddressStep, VirtualAddress};
use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

fn tar_mtime(secs: u64) -> Option<DateTime<Utc>> {
    if secs == 0 {
        return None;
    }
    Utc.timestamp_opt(secs as i64, 0).single()
}

/// TAR 容器扫描器
pub struct TarScan {
    address: VirtualAddress,
    buffer: TypeGatedBuffer,
}

impl TarScan {
    pub fn new(address: VirtualAddress) -> Self {
        let buffer = TypeGatedBuffer::new(address.clone(), &[TYPE_TAR]);
        Self { address, buffer }
    }
}

impl ScanInstance for TarScan {
    fn process(
        &mut self,
        chunk: &ScanChunk<'_>,
        meta: &mut ChunkMeta,
        ctx: &ScanContext,
    ) -> Result<()> {
        self.buffer.offer(chunk, meta, ctx)
    }

    fn finish(&mut self, ctx: &mut FinishContext<'_>) -> Result<()> {
        if !self.buffer.is_buffering() {
            return Ok(());
        }

        let sealed = self.buffer.sealed(ctx.ctx())?;
        let mut archive = tar::Archive::new(sealed.open()?);

        let mut found: Vec<(AddressStep, String, ObjectAttrs)> = Vec::new();
        let entries = archive
            .entries()
            .map_err(|e| AppError::decode_error(format!("invalid tar archive: {}", e), None))?;
        for entry in entries {
            let entry =
                entry.map_err(|e| AppError::decode_error(format!("tar entry: {}", e), None))?;
            let header = entry.header();
            // 纯目录条目跳过；链接等非常规条目没有数据区，同样跳过
            if !header.entry_type().is_file() {
                continue;
            }

            let size = header
                .size()
                .map_err(|e| AppError::decode_error(format!("tar size field: {}", e), None))?;
            let name = decode_entry_name(&entry.path_bytes());
            let step = AddressStep::span(TAR_SPECIFIER, entry.raw_file_position(), size);
            let attrs = ObjectAttrs {
                size,
                modified: header.mtime().ok().and_then(tar_mtime),
                uid: header.uid().ok().map(|v| v as u32),
                gid: header.gid().ok().map(|v| v as u32),
                mode: header.mode().ok(),
            };
            found.push((step, name, attrs));
        }
        drop(archive);

        let count = found.len();
        for (step, name, attrs) in found {
            ctx.register_child(step, &name, attrs)?;
        }

        info!(address = %self.address, members = count, "tar expanded");
        Ok(())
    }
}
