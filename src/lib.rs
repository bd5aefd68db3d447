//! 证据分析引擎
//!
//! 把磁盘镜像、网络捕获和复合文件里任意深度嵌套的对象，暴露成
//! 可寻址、可检索的虚拟层级——不把递归展开落盘。三个核心子系统：
//!
//! - **扫描流水线**（`pipeline`）：在单个对象的字节流上按依赖序
//!   执行有状态的扫描列车，分块处理、按实例隔离错误
//! - **虚拟 inode 寻址**（`vfs`）：结构化、可版本化的命名文法，
//!   任何派生对象仅凭地址 + 祖先链即可打开、读取、再扫描
//! - **逻辑块索引**（`index`）：把平面全文索引的命中映射回
//!   (虚拟对象, 字节偏移) 的可逆编码
//!
//! 容器递归（zip/tar/gzip，`scanners`）经由显式有界工作队列展开；
//! SQL 案件库、作业农场等外部协作者以 `storage` 里的接口出现。

pub mod engine;
pub mod error;
pub mod index;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod registry;
pub mod scanners;
pub mod storage;
pub mod utils;
pub mod vfs;

// 重新导出核心类型
pub use engine::AnalysisEngine;
pub use error::{AppError, Result};
pub use index::{decode_offset, encode_offset, Dictionary, OffsetDecoder};
pub use models::{EngineConfig, ScanStatus};
pub use pipeline::{ScanPipeline, TreeStats};
pub use registry::{ScannerRegistry, Selection};
pub use storage::{CaseStore, MemoryCase};
pub use vfs::{AddressStep, VirtualAddress};
