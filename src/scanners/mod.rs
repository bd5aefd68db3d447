//! 扫描器模块
//!
//! 扫描器分两层：
//! - `ScanInstance`：每 (对象, 定义) 一个的可变状态，由流水线在
//!   列车开始时创建、结束时销毁；借用字节流，绝不持有
//! - 定义表：启动时写死的注册表（见 `builtin_definitions`），
//!   没有目录扫描、没有动态加载
//!
//! 同一列车内的实例通过"每分块元数据映射"协作：映射每个分块
//! 新建、用完即弃，绝不跨分块携带信息。

pub mod buffered;
pub mod gzip_scan;
pub mod net;
pub mod tar_scan;
pub mod type_scan;
pub mod zip_scan;

pub use buffered::TypeGatedBuffer;
pub use gzip_scan::GzipScan;
pub use net::{FlowKey, FlowStats, PacketRecord, PcapScan};
pub use tar_scan::TarScan;
pub use type_scan::TypeScan;
pub use zip_scan::ZipScan;

use crate::error::Result;
use crate::models::ScannerDefinition;
use crate::pipeline::{FinishContext, ScanContext};
use crate::vfs::VirtualAddress;
use std::collections::HashMap;
use std::sync::Arc;

/// 每分块元数据的键：内容类型
pub const META_CONTENT_TYPE: &str = "content.type";
/// 每分块元数据的键：pcap 解析结果
pub const META_PACKETS: &str = "net.packets";

/// 内容类型常量
pub const TYPE_ZIP: &str = "application/zip";
pub const TYPE_GZIP: &str = "application/gzip";
pub const TYPE_TAR: &str = "application/x-tar";
pub const TYPE_PCAP: &str = "application/vnd.tcpdump.pcap";
pub const TYPE_OCTET_STREAM: &str = "application/octet-stream";

/// 一个分块的只读视图
pub struct ScanChunk<'a> {
    pub data: &'a [u8],
    /// 分块首字节在对象流内的偏移
    pub base_offset: u64,
}

/// 扫描器写进每分块元数据映射的事实
#[derive(Clone)]
pub enum MetaFact {
    Text(String),
    Json(serde_json::Value),
    /// pcap 基底扫描器发布的协议解析（兄弟实例免于重复解析）
    Packets(Arc<Vec<PacketRecord>>),
}

/// 每分块元数据映射
///
/// 键由扫描器自定义；映射在每次分块迭代时新建。
#[derive(Default)]
pub struct ChunkMeta {
    facts: HashMap<String, MetaFact>,
}

impl ChunkMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, fact: MetaFact) {
        self.facts.insert(key.into(), fact);
    }

    pub fn get(&self, key: &str) -> Option<&MetaFact> {
        self.facts.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.facts.get(key) {
            Some(MetaFact::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn packets(&self, key: &str) -> Option<&Arc<Vec<PacketRecord>>> {
        match self.facts.get(key) {
            Some(MetaFact::Packets(p)) => Some(p),
            _ => None,
        }
    }
}

/// 扫描器实例接口
///
/// `process` 在每个分块上按列车顺序调用；`finish` 在流耗尽后按
/// 列车顺序调用，是唯一允许登记派生对象并触发递归扫描的地方。
pub trait ScanInstance: Send {
    fn process(
        &mut self,
        chunk: &ScanChunk<'_>,
        meta: &mut ChunkMeta,
        ctx: &ScanContext,
    ) -> Result<()>;

    fn finish(&mut self, ctx: &mut FinishContext<'_>) -> Result<()>;
}

fn build_type(address: &VirtualAddress) -> Box<dyn ScanInstance> {
    Box::new(TypeScan::new(address.clone()))
}

fn build_index(address: &VirtualAddress) -> Box<dyn ScanInstance> {
    Box::new(crate::index::IndexScan::new(address.clone()))
}

fn build_zip(address: &VirtualAddress) -> Box<dyn ScanInstance> {
    Box::new(ZipScan::new(address.clone()))
}

fn build_tar(address: &VirtualAddress) -> Box<dyn ScanInstance> {
    Box::new(TarScan::new(address.clone()))
}

fn build_gzip(address: &VirtualAddress) -> Box<dyn ScanInstance> {
    Box::new(GzipScan::new(address.clone()))
}

fn build_pcap(address: &VirtualAddress) -> Box<dyn ScanInstance> {
    Box::new(PcapScan::new(address.clone()))
}

/// 内置扫描器注册表
///
/// 显式的启动期注册：名称 -> 构造函数，依赖与分组在这里一次性
/// 声明。类型识别排最前，容器扫描器依赖它的分类事实。
pub fn builtin_definitions() -> Vec<ScannerDefinition> {
    vec![
        ScannerDefinition {
            name: "type",
            order: 10,
            default_on: true,
            depends: &[],
            group: None,
            build: build_type,
        },
        ScannerDefinition {
            name: "index",
            order: 20,
            default_on: true,
            depends: &[],
            group: None,
            build: build_index,
        },
        ScannerDefinition {
            name: "zip",
            order: 30,
            default_on: true,
            depends: &["type"],
            group: Some("containers"),
            build: build_zip,
        },
        ScannerDefinition {
            name: "tar",
            order: 31,
            default_on: true,
            depends: &["type"],
            group: Some("containers"),
            build: build_tar,
        },
        ScannerDefinition {
            name: "gzip",
            order: 32,
            default_on: true,
            depends: &["type"],
            group: Some("containers"),
            build: build_gzip,
        },
        ScannerDefinition {
            name: "pcap",
            order: 40,
            default_on: false,
            depends: &["type"],
            group: Some("network"),
            build: build_pcap,
        },
    ]
}
