//! 虚拟 inode 寻址
//!
//! 任何证据对象（根证据或容器内派生对象）都由一个结构化地址标识：
//! 根定位符加上一串派生步骤。地址序列化为单个分隔字符串写入持久
//! 存储，并可无损解析回来。
//!
//! # 地址文法（版本 1）
//!
//! ```text
//! address  = root *( "|" step )
//! root     = 1*( ALPHA / DIGIT / "." / "_" / "-" )
//! step     = specifier params
//! specifier= ALPHA                ; 一个字符，区分大小写，查驱动表
//! params   = ""                   ; 无参数（如 gzip 单流）
//!          / offset ":" length    ; 规范形式：父流内重定位参数
//!          / "#" index            ; 仅用于旧案导入的成员序号形式
//! ```
//!
//! 数字一律为无前导零的十进制，保证 parse 与 format 互为逆运算、
//! 字节精确。两个地址相等当且仅当步骤序列逐项相等。
//!
//! 新驱动通过注册新的说明符字符扩展文法，旧地址不受影响。

pub mod drivers;
pub mod spool;


pub use drivers::{ByteStream, DriverRegistry, RootOpener, StepDriver};
pub use spool::SpoolingReader;

use crate::error::{AppError, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 步骤分隔符
pub const STEP_DELIMITER: char = '|';

/// 单个派生步骤的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepParams {
    /// 无参数
    Empty,
    /// 规范形式：父流内偏移 + 长度（足以重定位，无需重新解析整个容器）
    Span { offset: u64, length: u64 },
    /// 旧式成员序号（仅导入旧案时出现，容器扫描器不再产生）
    LegacyIndex(u64),
}

/// 单个派生步骤：一字符驱动说明符 + 参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressStep {
    pub specifier: char,
    pub params: StepParams,
}

impl AddressStep {
    pub fn span(specifier: char, offset: u64, length: u64) -> Self {
        Self {
            specifier,
            params: StepParams::Span { offset, length },
        }
    }

    pub fn bare(specifier: char) -> Self {
        Self {
            specifier,
            params: StepParams::Empty,
        }
    }
}

impl fmt::Display for AddressStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.params {
            StepParams::Empty => write!(f, "{}", self.specifier),
            StepParams::Span { offset, length } => {
                write!(f, "{}{}:{}", self.specifier, offset, length)
            }
            StepParams::LegacyIndex(index) => write!(f, "{}#{}", self.specifier, index),
        }
    }
}

/// 虚拟地址：根定位符 + 有序派生步骤序列
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VirtualAddress {
    root: String,
    steps: Vec<AddressStep>,
}

impl VirtualAddress {
    /// 创建根证据地址
    ///
    /// # 错误
    ///
    /// 定位符为空或含非法字符时返回 `AddressSyntax`。
    pub fn root(locator: impl Into<String>) -> Result<Self> {
        let locator = locator.into();
        validate_root_locator(&locator)?;
        Ok(Self {
            root: locator,
            steps: Vec::new(),
        })
    }

    /// 追加一个派生步骤，得到子地址
    pub fn child(&self, step: AddressStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self {
            root: self.root.clone(),
            steps,
        }
    }

    /// 父地址（去掉最后一个步骤）；根地址没有父亲
    pub fn parent(&self) -> Option<Self> {
        if self.steps.is_empty() {
            return None;
        }
        let mut steps = self.steps.clone();
        steps.pop();
        Some(Self {
            root: self.root.clone(),
            steps,
        })
    }

    pub fn root_locator(&self) -> &str {
        &self.root
    }

    pub fn steps(&self) -> &[AddressStep] {
        &self.steps
    }

    /// 最后一个步骤（派生对象才有）
    pub fn last_step(&self) -> Option<&AddressStep> {
        self.steps.last()
    }

    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// 嵌套深度（根为 0）
    pub fn depth(&self) -> usize {
        self.steps.len()
    }
}

// Display 即 format：地址的字符串形式是唯一规范序列化
impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)?;
        for step in &self.steps {
            write!(f, "{}{}", STEP_DELIMITER, step)?;
        }
        Ok(())
    }
}

impl FromStr for VirtualAddress {
    type Err = AppError;

    /// 解析地址字符串
    ///
    /// 解析是全函数：任何输入要么得到唯一地址，要么得到
    /// `AddressSyntax` 错误，绝不部分成功。
    fn from_str(s: &str) -> Result<Self> {
        let mut segments = s.split(STEP_DELIMITER);

        let root = segments
            .next()
            .expect("split yields at least one segment")
            .to_string();
        validate_root_locator(&root).map_err(|e| remap_syntax(e, s))?;

        let mut steps = Vec::new();
        for segment in segments {
            steps.push(parse_step(segment).map_err(|e| remap_syntax(e, s))?);
        }

        Ok(Self { root, steps })
    }
}

impl Serialize for VirtualAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VirtualAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

fn validate_root_locator(locator: &str) -> Result<()> {
    if locator.is_empty() {
        return Err(AppError::address_syntax("empty root locator", locator));
    }
    if let Some(bad) = locator
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(AppError::address_syntax(
            format!("invalid character {:?} in root locator", bad),
            locator,
        ));
    }
    Ok(())
}

fn parse_step(segment: &str) -> Result<AddressStep> {
    let mut chars = segment.chars();
    let specifier = chars
        .next()
        .ok_or_else(|| AppError::address_syntax("empty step", segment))?;
    if !specifier.is_ascii_alphabetic() {
        return Err(AppError::address_syntax(
            format!("step specifier {:?} is not a letter", specifier),
            segment,
        ));
    }

    let params = chars.as_str();
    let params = if params.is_empty() {
        StepParams::Empty
    } else if let Some(index) = params.strip_prefix('#') {
        StepParams::LegacyIndex(parse_decimal(index, segment)?)
    } else if let Some((offset, length)) = params.split_once(':') {
        StepParams::Span {
            offset: parse_decimal(offset, segment)?,
            length: parse_decimal(length, segment)?,
        }
    } else {
        return Err(AppError::address_syntax(
            "step parameters must be empty, `offset:length` or `#index`",
            segment,
        ));
    };

    Ok(AddressStep { specifier, params })
}

/// 无前导零的十进制解析：保证 format(parse(s)) == s
fn parse_decimal(text: &str, segment: &str) -> Result<u64> {
    if text.is_empty() {
        return Err(AppError::address_syntax("empty number", segment));
    }
    if text.len() > 1 && text.starts_with('0') {
        return Err(AppError::address_syntax(
            format!("non-canonical number {:?} (leading zero)", text),
            segment,
        ));
    }
    if !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AppError::address_syntax(
            format!("invalid number {:?}", text),
            segment,
        ));
    }
    text.parse::<u64>()
        .map_err(|_| AppError::address_syntax(format!("number {:?} out of range", text), segment))
}

fn remap_syntax(err: AppError, full_input: &str) -> AppError {
    match err {
        AppError::AddressSyntax { message, .. } => AppError::AddressSyntax {
            message,
            input: full_input.to_string(),
        },
        other => other,
    }
}
