//! GZ 单流压缩扫描器
//!
//! 处理 .gz 单文件压缩（.tar.gz 的外层也在这里剥；剥开后的 tar
//! 由递归扫描里的 tar 扫描器接手）。gzip 恰有一个派生子对象，
//! 展示名按优先级取：
//! 1. 格式头里嵌的原始文件名（FNAME）
//! 2. 父对象展示名去掉可识别的压缩后缀
//! 3. 固定占位名

use crate::error::{AppError, Result};
use crate::models::ObjectAttrs;
use crate::pipeline::{FinishContext, ScanContext};
use crate::scanners::{ChunkMeta, ScanChunk, ScanInstance, TypeGatedBuffer, TYPE_GZIP};
use crate::utils::encoding::decode_entry_name;
use crate::vfs::drivers::GZIP_SPECIFIER;
use crate::vfs::{AddressStep, VirtualAddress};
use chrono::{DateTime, TimeZone, Utc};
use flate2::read::GzDecoder;
use std::io::Read;
use tracing::info;

/// 子对象找不到名字时的占位名
const FALLBACK_NAME: &str = "data";

/// 去掉可识别的压缩后缀
///
/// - `file.log.gz` → `file.log`
/// - `bundle.tgz` → `bundle.tar`
/// - 无可识别后缀 → None
fn strip_compressed_suffix(name: &str) -> Option<String> {
    if let Some(base) = name.strip_suffix(".gz") {
        return Some(base.to_string());
    }
    if let Some(base) = name.strip_suffix(".gzip") {
        return Some(base.to_string());
    }
    if let Some(base) = name.strip_suffix(".tgz") {
        return Some(format!("{}.tar", base));
    }
    None
}

fn gzip_mtime(mtime: u32) -> Option<DateTime<Utc>> {
    if mtime == 0 {
        return None;
    }
    Utc.timestamp_opt(mtime as i64, 0).single()
}

/// GZ 单流压缩扫描器
pub struct GzipScan {
    address: VirtualAddress,
    buffer: TypeGatedBuffer,
}

impl GzipScan {
    pub fn new(address: VirtualAddress) -> Self {
        let buffer = TypeGatedBuffer::new(address.clone(), &[TYPE_GZIP]);
        Self { address, buffer }
    }

    /// 父对象展示名（展示路径的最后一段）
    fn parent_display_name(&self, ctx: &ScanContext) -> Option<String> {
        let resolved = ctx.store().resolve(&self.address).ok()?;
        resolved
            .display_path
            .rsplit('/')
            .next()
            .map(str::to_string)
    }
}

impl ScanInstance for GzipScan {
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
        let mut decoder = GzDecoder::new(sealed.open()?);

        // 解码计量子对象大小；压缩炸弹在硬上限处截断
        let size_cap = ctx.ctx().config().max_object_bytes;
        let mut decoded_len = 0u64;
        let mut sink = [0u8; 64 * 1024];
        loop {
            let n = decoder
                .read(&mut sink)
                .map_err(|e| AppError::decode_error(format!("corrupt gzip stream: {}", e), None))?;
            if n == 0 {
                break;
            }
            decoded_len += n as u64;
            if decoded_len > size_cap {
                return Err(AppError::decode_error(
                    format!("gzip expansion exceeds object size cap {}", size_cap),
                    None,
                ));
            }
        }

        let header = decoder.header();
        let embedded_name = header
            .and_then(|h| h.filename())
            .map(decode_entry_name)
            .filter(|n| !n.is_empty());
        let modified = header.and_then(|h| gzip_mtime(h.mtime()));

        let name = embedded_name
            .or_else(|| {
                self.parent_display_name(ctx.ctx())
                    .and_then(|n| strip_compressed_suffix(&n))
            })
            .unwrap_or_else(|| FALLBACK_NAME.to_string());

        let attrs = ObjectAttrs {
            size: decoded_len,
            modified,
            uid: None,
            gid: None,
            mode: None,
        };
        ctx.register_child(AddressStep::bare(GZIP_SPECIFIER), &name, attrs)?;

        info!(address = %self.address, child = %name, size = decoded_len, "gzip expanded");
        Ok(())
    }
}
