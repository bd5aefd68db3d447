//! 索引字典
//!
//! 字典是与单次运行无关的独立结构：词条 -> (词 id, 分类)。
//! 词匹配自动机从字典构建一次、整个运行期共享——构建成本不小，
//! 绝不能按对象重建。

use crate::error::{AppError, Result};
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Read;
use tracing::info;

/// 字典词条
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub word: String,
    pub id: u32,
    /// 分类（报表层的展示分桶，引擎不解释）
    #[serde(default)]
    pub class: String,
}

/// 索引字典
#[derive(Debug)]
pub struct Dictionary {
    entries: Vec<DictionaryEntry>,
    by_word: HashMap<String, u32>,
}

impl Dictionary {
    /// 从词条列表构建
    ///
    /// # 错误
    ///
    /// 空词、重复词或重复 id 返回 `Validation` 错误。
    pub fn new(entries: Vec<DictionaryEntry>) -> Result<Self> {
        let mut by_word = HashMap::with_capacity(entries.len());
        let mut seen_ids = HashMap::with_capacity(entries.len());
        for entry in &entries {
            if entry.word.is_empty() {
                return Err(AppError::validation_error("empty dictionary word"));
            }
            if by_word.insert(entry.word.clone(), entry.id).is_some() {
                return Err(AppError::validation_error(format!(
                    "duplicate dictionary word {:?}",
                    entry.word
                )));
            }
            if let Some(prev) = seen_ids.insert(entry.id, entry.word.clone()) {
                return Err(AppError::validation_error(format!(
                    "dictionary id {} assigned to both {:?} and {:?}",
                    entry.id, prev, entry.word
                )));
            }
        }
        Ok(Self { entries, by_word })
    }

    /// 便捷构造：按出现顺序分配 id
    pub fn from_words<I, S>(words: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let entries = words
            .into_iter()
            .enumerate()
            .map(|(i, w)| DictionaryEntry {
                word: w.into(),
                id: i as u32,
                class: String::new(),
            })
            .collect();
        Self::new(entries)
    }

    /// 从 JSON 读取（词条数组）
    pub fn load_json(reader: impl Read) -> Result<Self> {
        let entries: Vec<DictionaryEntry> = serde_json::from_reader(reader)
            .map_err(|e| AppError::validation_error(format!("invalid dictionary: {}", e)))?;
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 词 -> id
    pub fn lookup(&self, word: &str) -> Option<u32> {
        self.by_word.get(word).copied()
    }

    /// 自动机模式序号 -> 词 id
    pub fn word_id(&self, pattern_index: usize) -> u32 {
        self.entries[pattern_index].id
    }

    /// id -> 词条
    pub fn entry_by_id(&self, id: u32) -> Option<&DictionaryEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// 构建词匹配自动机（每次运行一次）
    ///
    /// 字典按词典定义是大小写无关的，自动机用 ASCII 大小写不敏感
    /// 匹配；标准匹配语义保证命中按流内偏移升序产出。
    pub fn build_automaton(&self) -> Result<AhoCorasick> {
        info!(words = self.entries.len(), "building dictionary automaton");
        AhoCorasickBuilder::new()
            .match_kind(MatchKind::Standard)
            .ascii_case_insensitive(true)
            .build(self.entries.iter().map(|e| e.word.as_bytes()))
            .map_err(|e| {
                AppError::config_error(format!("failed to build dictionary automaton: {}", e))
            })
    }
}
