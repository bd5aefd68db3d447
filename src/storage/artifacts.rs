//! 缓冲工件存储
//!
//! 容器扫描器在"不再无聊"之后把对象的完整字节流缓冲到后备文件，
//! `finish` 阶段在完整工件上做归档枚举。写入按工件键（对象地址）
//! 去重：同一对象上叠放的多个容器实例各自追加同样的分块，只有
//! 第一份真正落盘，其余按偏移判定为重复直接跳过。
//!
//! 封存时计算 SHA-256 摘要，供上层做内容级去重或完整性校验。

use crate::error::{AppError, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

struct ArtifactEntry {
    path: PathBuf,
    file: File,
    len: u64,
    sealed: bool,
}

/// 封存后的工件
#[derive(Debug, Clone)]
pub struct SealedArtifact {
    pub path: PathBuf,
    pub len: u64,
    /// 内容 SHA-256（十六进制小写）
    pub digest: String,
}

impl SealedArtifact {
    /// 打开一个独立的读取句柄
    pub fn open(&self) -> Result<File> {
        Ok(File::open(&self.path)?)
    }
}

/// 缓冲工件存储
///
/// 工件文件集中放在一个临时目录下，随存储一起删除。
pub struct ArtifactStore {
    dir: TempDir,
    entries: DashMap<String, Arc<Mutex<ArtifactEntry>>>,
}

impl ArtifactStore {
    /// # 参数
    ///
    /// * `spool_dir` - 工件目录的父目录（None 时用系统临时目录）
    pub fn new(spool_dir: Option<&Path>) -> Result<Self> {
        let dir = match spool_dir {
            Some(base) => {
                std::fs::create_dir_all(base)?;
                TempDir::new_in(base)?
            }
            None => TempDir::new()?,
        };
        Ok(Self {
            dir,
            entries: DashMap::new(),
        })
    }

    /// 追加一个分块（按偏移幂等）
    ///
    /// # 行为
    ///
    /// - `base_offset + data` 完全落在已写区间内：跳过（重复写）
    /// - 与已写区间部分重叠：只写新尾部
    /// - 偏移超前于已写长度：说明调用方漏块，报内部错误
    pub fn append(&self, key: &str, base_offset: u64, data: &[u8]) -> Result<()> {
        let entry = self.entry_for(key)?;
        let mut entry = entry.lock();

        if entry.sealed {
            return Err(AppError::Internal(format!(
                "append to sealed artifact '{}'",
                key
            )));
        }

        let end = base_offset + data.len() as u64;
        if end <= entry.len {
            return Ok(()); // 另一个实例已经写过这段
        }
        if base_offset > entry.len {
            return Err(AppError::Internal(format!(
                "artifact '{}' gap: append at {} but only {} spooled",
                key, base_offset, entry.len
            )));
        }

        let fresh_from = (entry.len - base_offset) as usize;
        let spooled_len = entry.len;
        entry.file.seek(SeekFrom::Start(spooled_len))?;
        entry.file.write_all(&data[fresh_from..])?;
        entry.len = end;
        Ok(())
    }

    /// 封存工件：计算摘要，之后只读
    pub fn seal(&self, key: &str) -> Result<SealedArtifact> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| AppError::not_found(format!("artifact '{}'", key)))?
            .clone();
        let mut entry = entry.lock();
        entry.file.flush()?;
        entry.sealed = true;

        let mut reader = File::open(&entry.path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let digest = format!("{:x}", hasher.finalize());

        debug!(key, len = entry.len, %digest, "sealed artifact");
        Ok(SealedArtifact {
            path: entry.path.clone(),
            len: entry.len,
            digest,
        })
    }

    /// 删除工件（扫描结束后回收空间）
    pub fn remove(&self, key: &str) {
        if let Some((_, entry)) = self.entries.remove(key) {
            let entry = entry.lock();
            if let Err(e) = std::fs::remove_file(&entry.path) {
                warn!(key, error = %e, "failed to remove artifact file");
            }
        }
    }

    /// 当前是否存在该工件
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn entry_for(&self, key: &str) -> Result<Arc<Mutex<ArtifactEntry>>> {
        if let Some(entry) = self.entries.get(key) {
            return Ok(entry.clone());
        }
        let path = self.dir.path().join(Uuid::new_v4().to_string());
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let entry = Arc::new(Mutex::new(ArtifactEntry {
            path,
            file,
            len: 0,
            sealed: false,
        }));
        // 并发创建同键工件时保留先到的那份
        Ok(self
            .entries
            .entry(key.to_string())
            .or_insert(entry)
            .clone())
    }
}
