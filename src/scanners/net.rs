//! 网络捕获扫描器基底
//!
//! pcap 证据的流式解析基底：
//! - 记录帧跨分块时由实例内的进位缓冲接续，不缓冲整个对象
//! - 每个分块把解析出的记录发布到分块元数据（兄弟实例不必
//!   重复解析同一个包）
//! - 同一逻辑连接的包跨对象关联：计数器挂在运行上下文的有界
//!   TTL 缓存里，绝不是全局状态

use crate::error::{AppError, Result};
use crate::pipeline::{FinishContext, ScanContext};
use crate::scanners::{
    ChunkMeta, MetaFact, ScanChunk, ScanInstance, META_CONTENT_TYPE, META_PACKETS, TYPE_PCAP,
};
use crate::vfs::VirtualAddress;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// pcap 全局头长度
const PCAP_GLOBAL_HEADER_LEN: usize = 24;
/// 每记录头长度
const PCAP_RECORD_HEADER_LEN: usize = 16;
/// 单包捕获长度上限（超过即判定帧损坏）
const MAX_CAPTURED_LEN: u32 = 262_144;

/// 归一化的连接键（双向同键）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub proto: u8,
    /// (ip, port)，字典序小的一端
    pub lo: (u32, u16),
    pub hi: (u32, u16),
}

impl FlowKey {
    pub fn new(proto: u8, a: (u32, u16), b: (u32, u16)) -> Self {
        if a <= b {
            Self { proto, lo: a, hi: b }
        } else {
            Self { proto, lo: b, hi: a }
        }
    }
}

/// 每连接的关联计数
#[derive(Debug, Default)]
pub struct FlowStats {
    pub packets: AtomicU64,
    pub bytes: AtomicU64,
}

/// 单个捕获记录的解析结果
#[derive(Debug, Clone)]
pub struct PacketRecord {
    /// 对象内的包序号（0 起）
    pub index: u64,
    pub ts_sec: u32,
    pub ts_frac: u32,
    pub captured_len: u32,
    pub original_len: u32,
    /// IPv4 TCP/UDP 之外的包没有连接键
    pub flow: Option<FlowKey>,
}

enum Gate {
    Undecided,
    Inert,
    Active,
}

/// pcap 扫描器基底
pub struct PcapScan {
    address: VirtualAddress,
    gate: Gate,
    header_parsed: bool,
    big_endian: bool,
    link_type: u32,
    carry: Vec<u8>,
    packet_index: u64,
}

impl PcapScan {
    pub fn new(address: VirtualAddress) -> Self {
        Self {
            address,
            gate: Gate::Undecided,
            header_parsed: false,
            big_endian: false,
            link_type: 0,
            carry: Vec::new(),
            packet_index: 0,
        }
    }

    fn read_u32(&self, data: &[u8], at: usize) -> u32 {
        let bytes = [data[at], data[at + 1], data[at + 2], data[at + 3]];
        if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    }

    /// 解析全局头，确定字节序与链路类型
    fn parse_global_header(&mut self, data: &[u8]) -> Result<()> {
        let magic = [data[0], data[1], data[2], data[3]];
        self.big_endian = match magic {
            [0xD4, 0xC3, 0xB2, 0xA1] | [0x4D, 0x3C, 0xB2, 0xA1] => false,
            [0xA1, 0xB2, 0xC3, 0xD4] | [0xA1, 0xB2, 0x3C, 0x4D] => true,
            _ => {
                return Err(AppError::decode_error(
                    format!("bad pcap magic {:02x?}", magic),
                    None,
                ))
            }
        };
        self.link_type = self.read_u32(data, 20);
        self.header_parsed = true;
        debug!(
            address = %self.address,
            big_endian = self.big_endian,
            link_type = self.link_type,
            "pcap global header parsed"
        );
        Ok(())
    }

    /// 以太网帧 -> IPv4 TCP/UDP 连接键
    fn dissect_flow(&self, frame: &[u8]) -> Option<FlowKey> {
        // 只认 EN10MB 链路
        if self.link_type != 1 || frame.len() < 34 {
            return None;
        }
        let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
        if ethertype != 0x0800 {
            return None;
        }

        let ip = &frame[14..];
        let ihl = ((ip[0] & 0x0F) as usize) * 4;
        if ip[0] >> 4 != 4 || ihl < 20 || ip.len() < ihl + 4 {
            return None;
        }
        let proto = ip[9];
        if proto != 6 && proto != 17 {
            return None;
        }

        let src = u32::from_be_bytes([ip[12], ip[13], ip[14], ip[15]]);
        let dst = u32::from_be_bytes([ip[16], ip[17], ip[18], ip[19]]);
        let l4 = &ip[ihl..];
        let src_port = u16::from_be_bytes([l4[0], l4[1]]);
        let dst_port = u16::from_be_bytes([l4[2], l4[3]]);

        Some(FlowKey::new(proto, (src, src_port), (dst, dst_port)))
    }
}

impl ScanInstance for PcapScan {
    fn process(
        &mut self,
        chunk: &ScanChunk<'_>,
        meta: &mut ChunkMeta,
        ctx: &ScanContext,
    ) -> Result<()> {
        if matches!(self.gate, Gate::Undecided) {
            self.gate = match meta.text(META_CONTENT_TYPE) {
                Some(TYPE_PCAP) => Gate::Active,
                _ => Gate::Inert,
            };
        }
        if matches!(self.gate, Gate::Inert) {
            return Ok(());
        }

        // 同列车的另一个实例已经解析过这个分块
        if meta.packets(META_PACKETS).is_some() {
            return Ok(());
        }

        // 进位 + 新数据；进位为空时直接用分块切片省一次拷贝
        let joined: Vec<u8>;
        let mut data: &[u8] = if self.carry.is_empty() {
            chunk.data
        } else {
            joined = [self.carry.as_slice(), chunk.data].concat();
            &joined
        };

        if !self.header_parsed {
            if data.len() < PCAP_GLOBAL_HEADER_LEN {
                self.carry = data.to_vec();
                return Ok(());
            }
            self.parse_global_header(data)?;
            data = &data[PCAP_GLOBAL_HEADER_LEN..];
        }

        let mut records = Vec::new();
        loop {
            if data.len() < PCAP_RECORD_HEADER_LEN {
                break;
            }
            let captured_len = self.read_u32(data, 8);
            if captured_len > MAX_CAPTURED_LEN {
                return Err(AppError::decode_error(
                    format!("pcap record claims {} captured bytes", captured_len),
                    None,
                ));
            }
            let total = PCAP_RECORD_HEADER_LEN + captured_len as usize;
            if data.len() < total {
                break; // 记录跨分块，进位接续
            }

            let frame = &data[PCAP_RECORD_HEADER_LEN..total];
            let flow = self.dissect_flow(frame);
            let record = PacketRecord {
                index: self.packet_index,
                ts_sec: self.read_u32(data, 0),
                ts_frac: self.read_u32(data, 4),
                captured_len,
                original_len: self.read_u32(data, 12),
                flow,
            };

            // 关联缓存：同一连接跨捕获文件累计
            if let Some(key) = flow {
                let stats = ctx
                    .flows()
                    .get_with(key, || Arc::new(FlowStats::default()));
                stats.packets.fetch_add(1, Ordering::Relaxed);
                stats.bytes.fetch_add(captured_len as u64, Ordering::Relaxed);
            }

            records.push(record);
            self.packet_index += 1;
            data = &data[total..];
        }

        self.carry = data.to_vec();
        meta.put(META_PACKETS, MetaFact::Packets(Arc::new(records)));
        Ok(())
    }

    fn finish(&mut self, ctx: &mut FinishContext<'_>) -> Result<()> {
        if !matches!(self.gate, Gate::Active) {
            return Ok(());
        }
        if !self.carry.is_empty() {
            warn!(
                address = %self.address,
                trailing = self.carry.len(),
                "pcap ends inside a record"
            );
            return Err(AppError::decode_error(
                "truncated pcap record at end of capture",
                None,
            ));
        }

        ctx.ctx().store().kv_put(
            &format!("pcap.packets:{}", self.address),
            &self.packet_index.to_string(),
        )?;
        debug!(address = %self.address, packets = self.packet_index, "pcap scan finished");
        Ok(())
    }
}
