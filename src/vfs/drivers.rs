//! 地址步骤驱动
//!
//! 每个驱动认领一个说明符字符，负责把"父对象的字节流 + 步骤参数"
//! 变成子对象的字节流。`open` 沿地址的步骤链逐层展开，任何嵌套
//! 深度的对象都能仅凭地址打开，无需落盘展开。
//!
//! 驱动表是启动时显式注册的：同一说明符注册两次是致命配置错误。

use crate::error::{AppError, Result};
use crate::vfs::spool::SpoolingReader;
use crate::vfs::{AddressStep, StepParams, VirtualAddress};
use flate2::read::{DeflateDecoder, GzDecoder};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::Arc;
use tracing::trace;

/// zip 成员步骤说明符
pub const ZIP_SPECIFIER: char = 'Z';
/// tar 成员步骤说明符
pub const TAR_SPECIFIER: char = 'T';
/// gzip 单流步骤说明符
pub const GZIP_SPECIFIER: char = 'G';

/// 证据字节流：顺序读 + 定位
pub trait EvidenceRead: Read + Seek + Send {}
impl<T: Read + Seek + Send> EvidenceRead for T {}

pub type ByteStream = Box<dyn EvidenceRead>;

/// 根证据打开接口（由案件存储实现）
pub trait RootOpener: Send + Sync {
    fn open_root(&self, locator: &str) -> Result<ByteStream>;
}

/// 步骤驱动：按说明符注册，负责读取某一类派生步骤
pub trait StepDriver: Send + Sync {
    /// 本驱动认领的说明符字符
    fn specifier(&self) -> char;

    /// 给定父流与步骤参数，产出子对象的字节流
    fn open(&self, parent: ByteStream, step: &AddressStep) -> Result<ByteStream>;
}

/// 驱动注册表：说明符 -> 驱动
pub struct DriverRegistry {
    drivers: HashMap<char, Arc<dyn StepDriver>>,
}

impl DriverRegistry {
    /// 空注册表（测试用）
    pub fn new() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// 带全部内置驱动的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register(Arc::new(ZipDriver))
            .expect("builtin driver table has no duplicates");
        registry
            .register(Arc::new(TarDriver))
            .expect("builtin driver table has no duplicates");
        registry
            .register(Arc::new(GzipDriver))
            .expect("builtin driver table has no duplicates");
        registry
    }

    /// 注册驱动
    ///
    /// # 错误
    ///
    /// 同一说明符重复注册返回 `Config` 错误（启动期致命）。
    pub fn register(&mut self, driver: Arc<dyn StepDriver>) -> Result<()> {
        let spec = driver.specifier();
        if self.drivers.contains_key(&spec) {
            return Err(AppError::config_error(format!(
                "duplicate driver specifier '{}'",
                spec
            )));
        }
        self.drivers.insert(spec, driver);
        Ok(())
    }

    /// 按说明符查驱动
    pub fn resolve(&self, specifier: char) -> Result<&Arc<dyn StepDriver>> {
        self.drivers
            .get(&specifier)
            .ok_or(AppError::UnknownSpecifier(specifier))
    }

    /// 打开任意地址的字节流
    ///
    /// 递归语义：先打开父链（除最后一步外的全部步骤），再让最后
    /// 一步的驱动在父流上产出子流。实现为沿步骤链的迭代展开。
    pub fn open<R: RootOpener + ?Sized>(
        &self,
        roots: &R,
        address: &VirtualAddress,
    ) -> Result<ByteStream> {
        trace!(address = %address, "opening virtual address");
        let mut stream = roots.open_root(address.root_locator())?;
        for step in address.steps() {
            let driver = self.resolve(step.specifier)?;
            stream = driver.open(stream, step)?;
        }
        Ok(stream)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

// ---------------------------------------------------------------------------
// 窗口读取器
// ---------------------------------------------------------------------------

/// 父流上的字节窗口 `[start, start+len)`，自身可 seek
pub struct SliceReader<R: Read + Seek> {
    inner: R,
    start: u64,
    len: u64,
    pos: u64,
}

impl<R: Read + Seek> SliceReader<R> {
    pub fn new(mut inner: R, start: u64, len: u64) -> io::Result<Self> {
        inner.seek(SeekFrom::Start(start))?;
        Ok(Self {
            inner,
            start,
            len,
            pos: 0,
        })
    }
}

impl<R: Read + Seek> Read for SliceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len {
            return Ok(0);
        }
        let remaining = (self.len - self.pos).min(buf.len() as u64) as usize;
        let n = self.inner.read(&mut buf[..remaining])?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for SliceReader<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => p as i64,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
            SeekFrom::End(delta) => self.len as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of slice",
            ));
        }
        self.pos = target as u64;
        self.inner
            .seek(SeekFrom::Start(self.start + self.pos.min(self.len)))?;
        Ok(self.pos)
    }
}

/// 把一个只读流整体缓冲到临时文件（旧式序号步骤使用）
fn buffer_to_temp(reader: &mut dyn Read) -> Result<File> {
    let mut file = tempfile::tempfile()?;
    io::copy(reader, &mut file)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

// ---------------------------------------------------------------------------
// zip 成员驱动
// ---------------------------------------------------------------------------

/// zip 本地文件头长度（定长部分）
const ZIP_LOCAL_HEADER_LEN: usize = 30;
/// 本地文件头魔数 "PK\x03\x04"
const ZIP_LOCAL_HEADER_SIG: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

const ZIP_METHOD_STORED: u16 = 0;
const ZIP_METHOD_DEFLATED: u16 = 8;

/// zip 成员驱动
///
/// 规范参数是"本地文件头偏移 + 压缩长度"：直接定位本地头，跳过
/// 变长的文件名/扩展区即是数据，无需解析中央目录。旧式 `Z#n`
/// 序号参数仅为导入旧案保留，走完整的 zip 解析路径。
pub struct ZipDriver;

impl StepDriver for ZipDriver {
    fn specifier(&self) -> char {
        ZIP_SPECIFIER
    }

    fn open(&self, mut parent: ByteStream, step: &AddressStep) -> Result<ByteStream> {
        match step.params {
            StepParams::Span { offset, length } => {
                parent.seek(SeekFrom::Start(offset))?;
                let mut header = [0u8; ZIP_LOCAL_HEADER_LEN];
                parent.read_exact(&mut header).map_err(|e| {
                    AppError::decode_error(format!("short zip local header: {}", e), None)
                })?;

                if header[..4] != ZIP_LOCAL_HEADER_SIG {
                    return Err(AppError::decode_error(
                        format!("no zip local header at offset {}", offset),
                        None,
                    ));
                }

                let method = u16::from_le_bytes([header[8], header[9]]);
                let name_len = u16::from_le_bytes([header[26], header[27]]) as u64;
                let extra_len = u16::from_le_bytes([header[28], header[29]]) as u64;
                let data_start = offset + ZIP_LOCAL_HEADER_LEN as u64 + name_len + extra_len;

                let window = SliceReader::new(parent, data_start, length)?;
                match method {
                    ZIP_METHOD_STORED => Ok(Box::new(window)),
                    ZIP_METHOD_DEFLATED => Ok(Box::new(SpoolingReader::new(
                        DeflateDecoder::new(window),
                    )?)),
                    other => Err(AppError::decode_error(
                        format!("unsupported zip compression method {}", other),
                        None,
                    )),
                }
            }
            StepParams::LegacyIndex(index) => {
                let mut archive = zip::ZipArchive::new(parent)
                    .map_err(|e| AppError::decode_error(format!("invalid zip: {}", e), None))?;
                let mut member = archive.by_index(index as usize).map_err(|e| {
                    AppError::decode_error(format!("zip member #{}: {}", index, e), None)
                })?;
                Ok(Box::new(buffer_to_temp(&mut member)?))
            }
            StepParams::Empty => Err(AppError::address_syntax(
                "zip step requires `offset:length` or legacy `#index` parameters",
                step.to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// tar 成员驱动
// ---------------------------------------------------------------------------

/// tar 成员驱动
///
/// 参数是"数据区偏移 + 大小"。tar 成员数据未压缩，窗口本身可
/// seek，不需要回退缓存。
pub struct TarDriver;

impl StepDriver for TarDriver {
    fn specifier(&self) -> char {
        TAR_SPECIFIER
    }

    fn open(&self, parent: ByteStream, step: &AddressStep) -> Result<ByteStream> {
        match step.params {
            StepParams::Span { offset, length } => {
                Ok(Box::new(SliceReader::new(parent, offset, length)?))
            }
            _ => Err(AppError::address_syntax(
                "tar step requires `offset:length` parameters",
                step.to_string(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// gzip 单流驱动
// ---------------------------------------------------------------------------

/// gzip 单流驱动
///
/// gzip 恰有一个派生子对象，步骤无参数。解码流不可 seek，包一层
/// 回退缓存。
pub struct GzipDriver;

impl StepDriver for GzipDriver {
    fn specifier(&self) -> char {
        GZIP_SPECIFIER
    }

    fn open(&self, parent: ByteStream, step: &AddressStep) -> Result<ByteStream> {
        match step.params {
            StepParams::Empty => Ok(Box::new(SpoolingReader::new(GzDecoder::new(parent))?)),
            _ => Err(AppError::address_syntax(
                "gzip step takes no parameters",
                step.to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    struct MemoryRoots(Vec<u8>);

    impl RootOpener for MemoryRoots {
        fn open_root(&self, _locator: &str) -> Result<ByteStream> {
            Ok(Box::new(Cursor::new(self.0.clone())))
        }
    }

    fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer
                .start_file(
                    *name,
                    SimpleFileOptions::default()
                        .compression_method(zip::CompressionMethod::Deflated),
                )
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// 读回归档，取成员的 (本地头偏移, 压缩长度)
    fn zip_member_span(bytes: &[u8], index: usize) -> (u64, u64) {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let member = archive.by_index(index).unwrap();
        (member.header_start(), member.compressed_size())
    }

    #[test]
    fn test_duplicate_specifier_is_config_error() {
        let mut registry = DriverRegistry::with_builtin();
        let err = registry.register(Arc::new(ZipDriver)).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_unknown_specifier() {
        let registry = DriverRegistry::with_builtin();
        let err = registry.resolve('Q').err().unwrap();
        assert!(matches!(err, AppError::UnknownSpecifier('Q')));
    }

    #[test]
    fn test_zip_span_open_decompresses_member() {
        let payload = b"the quick brown fox jumps over the lazy dog".repeat(50);
        let bytes = build_zip(&[("a.txt", &payload)]);
        let (offset, clen) = zip_member_span(&bytes, 0);

        let registry = DriverRegistry::with_builtin();
        let roots = MemoryRoots(bytes);
        let addr: VirtualAddress = format!("img0|Z{}:{}", offset, clen).parse().unwrap();

        let mut stream = registry.open(&roots, &addr).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_zip_legacy_index_open() {
        let bytes = build_zip(&[("a.txt", b"alpha"), ("b.txt", b"bravo")]);
        let registry = DriverRegistry::with_builtin();
        let roots = MemoryRoots(bytes);

        let addr: VirtualAddress = "img0|Z#1".parse().unwrap();
        let mut stream = registry.open(&roots, &addr).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"bravo");
    }

    #[test]
    fn test_zip_bad_offset_is_decode_error() {
        let bytes = build_zip(&[("a.txt", b"alpha")]);
        let registry = DriverRegistry::with_builtin();
        let roots = MemoryRoots(bytes);

        let addr: VirtualAddress = "img0|Z3:5".parse().unwrap();
        let err = registry.open(&roots, &addr).err().unwrap();
        assert!(matches!(err, AppError::Decode { .. }));
    }

    #[test]
    fn test_tar_span_open() {
        let mut builder = tar::Builder::new(Vec::new());
        let payload = b"tar member payload".to_vec();
        let mut header = tar::Header::new_gnu();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "member.bin", &payload[..])
            .unwrap();
        let bytes = builder.into_inner().unwrap();

        // GNU tar: 第一个成员的数据从 512 字节头之后开始
        let addr: VirtualAddress = format!("img0|T512:{}", payload.len()).parse().unwrap();
        let registry = DriverRegistry::with_builtin();
        let roots = MemoryRoots(bytes);

        let mut stream = registry.open(&roots, &addr).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);
    }

    #[test]
    fn test_gzip_open_and_backward_seek() {
        let payload = b"compressed once, read twice".to_vec();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let bytes = encoder.finish().unwrap();

        let registry = DriverRegistry::with_builtin();
        let roots = MemoryRoots(bytes);
        let addr: VirtualAddress = "img0|G".parse().unwrap();

        let mut stream = registry.open(&roots, &addr).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, payload);

        // 解码流上的向后 seek 由回退缓存支撑
        stream.seek(SeekFrom::Start(0)).unwrap();
        let mut again = Vec::new();
        stream.read_to_end(&mut again).unwrap();
        assert_eq!(again, payload);
    }

    #[test]
    fn test_nested_zip_in_zip() {
        let inner_payload = b"innermost file body".to_vec();
        let inner_zip = build_zip(&[("inner.txt", &inner_payload)]);
        let outer_zip = build_zip(&[("inner.zip", &inner_zip)]);

        let (outer_off, outer_clen) = zip_member_span(&outer_zip, 0);
        let (inner_off, inner_clen) = zip_member_span(&inner_zip, 0);

        let addr: VirtualAddress = format!(
            "img0|Z{}:{}|Z{}:{}",
            outer_off, outer_clen, inner_off, inner_clen
        )
        .parse()
        .unwrap();

        let registry = DriverRegistry::with_builtin();
        let roots = MemoryRoots(outer_zip);
        let mut stream = registry.open(&roots, &addr).unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        assert_eq!(out, inner_payload);
    }
}
