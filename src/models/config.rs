//! 引擎配置
//!
//! 定义扫描流水线的全部可调参数：
//! - 分块大小与索引块位宽
//! - 资源护栏（碎片化/大小上限）
//! - 嵌套递归边界（深度、展开总字节数）
//! - 单对象截止时间与关联缓存驱逐策略

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 跨对象关联缓存配置
///
/// 缓存由运行上下文持有，必须显式有界并按存活时间驱逐。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationCacheConfig {
    /// 最大条目数
    #[serde(default = "default_cache_capacity")]
    pub capacity: u64,

    /// 条目存活时间（秒）
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> u64 {
    65_536
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CorrelationCacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// 引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// 流式读取的分块大小（字节）
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// 逻辑索引块位宽 B（块大小为 2^B 字节）
    #[serde(default = "default_index_block_bits")]
    pub index_block_bits: u32,

    /// 资源护栏：对象 extent 数量上限（碎片化病态判定）
    #[serde(default = "default_max_extents")]
    pub max_extents: usize,

    /// 资源护栏：对象声明大小硬上限（字节）
    #[serde(default = "default_max_object_bytes")]
    pub max_object_bytes: u64,

    /// 最大嵌套深度（容器套容器）
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    /// 整棵递归树的展开总字节数上限
    #[serde(default = "default_max_expanded_bytes")]
    pub max_expanded_bytes: u64,

    /// 单对象扫描截止时间（秒，0 表示不限）
    #[serde(default = "default_object_deadline_secs")]
    pub object_deadline_secs: u64,

    /// 工作线程数（0 表示使用 CPU 核心数）
    #[serde(default)]
    pub workers: usize,

    /// 缓冲工件与回退缓存的临时目录（None 表示系统默认）
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,

    /// 跨对象关联缓存配置
    #[serde(default)]
    pub correlation_cache: CorrelationCacheConfig,
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_index_block_bits() -> u32 {
    20
}

fn default_max_extents() -> usize {
    5000
}

fn default_max_object_bytes() -> u64 {
    64 * 1024 * 1024 * 1024 // 64GB
}

fn default_max_depth() -> usize {
    15
}

fn default_max_expanded_bytes() -> u64 {
    20 * 1024 * 1024 * 1024 // 20GB
}

fn default_object_deadline_secs() -> u64 {
    0
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            index_block_bits: default_index_block_bits(),
            max_extents: default_max_extents(),
            max_object_bytes: default_max_object_bytes(),
            max_depth: default_max_depth(),
            max_expanded_bytes: default_max_expanded_bytes(),
            object_deadline_secs: default_object_deadline_secs(),
            workers: 0,
            spool_dir: None,
            correlation_cache: CorrelationCacheConfig::default(),
        }
    }
}

impl EngineConfig {
    /// 从 TOML 配置文件加载，环境变量（`EVIDENCE_` 前缀）可覆盖
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径（可选；None 时仅用默认值+环境变量）
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(p) = path {
            builder = builder.add_source(config::File::from(p).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("EVIDENCE")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: EngineConfig = builder
            .build()
            .map_err(|e| AppError::config_error(format!("failed to read config: {}", e)))?
            .try_deserialize()
            .map_err(|e| AppError::config_error(format!("invalid config: {}", e)))?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AppError::validation_error("chunk_size must be positive"));
        }

        if !(10..=30).contains(&self.index_block_bits) {
            return Err(AppError::validation_error(
                "index_block_bits must be between 10 and 30",
            ));
        }

        // 分块不能大于索引块，否则单个分块内的命中可能跨越多个块边界
        if (self.chunk_size as u64) > (1u64 << self.index_block_bits) {
            return Err(AppError::validation_error(
                "chunk_size must not exceed the index block size",
            ));
        }

        if self.max_depth == 0 {
            return Err(AppError::validation_error("max_depth must be positive"));
        }

        if self.max_depth > 64 {
            return Err(AppError::validation_error("max_depth must not exceed 64"));
        }

        if self.max_expanded_bytes == 0 {
            return Err(AppError::validation_error(
                "max_expanded_bytes must be positive",
            ));
        }

        if self.max_object_bytes == 0 {
            return Err(AppError::validation_error(
                "max_object_bytes must be positive",
            ));
        }

        if self.correlation_cache.capacity == 0 {
            return Err(AppError::validation_error(
                "correlation_cache.capacity must be positive",
            ));
        }

        Ok(())
    }

    /// 逻辑索引块大小（字节）
    pub fn index_block_size(&self) -> u64 {
        1u64 << self.index_block_bits
    }

    /// 实际工作线程数
    pub fn effective_workers(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}
