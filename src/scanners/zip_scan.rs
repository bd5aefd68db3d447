//! ZIP 容器扫描器
//!
//! 类型门控 + 全流缓冲；`finish` 阶段枚举中央目录，为每个非目录
//! 成员登记派生对象。步骤参数取"本地头偏移 + 压缩长度"——重定位
//! 成员时无需重新解析整个归档。
//!
//! 支持 Windows 编码优化（GBK/GB2312 文件名）。

use crate::error::{AppError, Result};
use crate::models::ObjectAttrs;
use crate::pipeline::{FinishContext, ScanContext};
use crate::scanners::{ChunkMeta, ScanChunk, ScanInstance, TypeGatedBuffer, TYPE_ZIP};
use crate::utils::encoding::decode_entry_name;
use crate::vfs::drivers::ZIP_SPECIFIER;
use crate::vfs::{AddressStep, VirtualAddress};
use chrono::{DateTime, TimeZone, Utc};
use tracing::info;

/// zip::DateTime -> chrono（zip 的 DOS 时间没有时区，按 UTC 记）
fn member_mtime(dt: Option<zip::DateTime>) -> Option<DateTime<Utc>> {
    let dt = dt?;
    Utc.with_ymd_and_hms(
        dt.year() as i32,
        dt.month() as u32,
        dt.day() as u32,
        dt.hour() as u32,
        dt.minute() as u32,
        dt.second() as u32,
    )
    .single()
}

/// ZIP 容器扫描器
pub struct ZipScan {
    address: VirtualAddress,
    buffer: TypeGatedBuffer,
}

impl ZipScan {
    pub fn new(address: VirtualAddress) -> Self {
        let buffer = TypeGatedBuffer::new(address.clone(), &[TYPE_ZIP]);
        Self { address, buffer }
    }
}

impl ScanInstance for ZipScan {
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
        let mut archive = zip::ZipArchive::new(sealed.open()?)
            .map_err(|e| AppError::decode_error(format!("invalid zip archive: {}", e), None))?;

        // 先完整枚举再登记：枚举中途解码失败时对象保持零子对象，
        // 不留半套
        let mut found: Vec<(AddressStep, String, ObjectAttrs)> = Vec::new();
        for i in 0..archive.len() {
            let member = archive.by_index_raw(i).map_err(|e| {
                AppError::decode_error(format!("zip member #{}: {}", i, e), None)
            })?;
            if member.is_dir() {
                continue;
            }

            // 多编码支持：自动检测并解码 UTF-8/GBK 文件名
            let name = decode_entry_name(member.name_raw());
            let step = AddressStep::span(
                ZIP_SPECIFIER,
                member.header_start(),
                member.compressed_size(),
            );
            let attrs = ObjectAttrs {
                size: member.size(),
                modified: member_mtime(member.last_modified()),
                uid: None,
                gid: None,
                mode: member.unix_mode(),
            };
            found.push((step, name, attrs));
        }
        drop(archive);

        let count = found.len();
        for (step, name, attrs) in found {
            ctx.register_child(step, &name, attrs)?;
        }

        info!(address = %self.address, members = count, "zip expanded");
        Ok(())
    }
}
