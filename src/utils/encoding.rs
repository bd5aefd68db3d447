//! 字符编码转换工具
//!
//! 归档条目的文件名不保证是 UTF-8（老 Windows 打包器常见 GBK /
//! Windows-1252）。解码策略：
//!
//! 1. UTF-8 快速路径
//! 2. chardetng 检测 + encoding_rs 解码
//! 3. Windows-1252 兜底（永不失败）

use chardetng::EncodingDetector;

/// 解码归档条目文件名字节序列
///
/// # 参数
///
/// - `bytes` - 原始字节序列
///
/// # 返回值
///
/// 解码后的字符串；无法确定编码时按 Windows-1252 兜底解码，
/// 保证总能得到可展示的名字。
pub fn decode_entry_name(bytes: &[u8]) -> String {
    // 尝试 UTF-8
    let (cow, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if !had_errors {
        return cow.into_owned();
    }

    // chardetng 检测（中文 Windows 打包器 → GBK 等）
    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    let (cow, _, had_errors) = encoding.decode(bytes);
    if !had_errors {
        return cow.into_owned();
    }

    // Windows-1252 兜底（单字节编码，解码不会失败）
    let (cow, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    cow.into_owned()
}
