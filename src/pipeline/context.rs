//! 扫描运行上下文
//!
//! 基线实现把跨对象协调状态放在全局/类级变量里（跨包关联缓存、
//! 在途文件登记表），这里全部收进一个由运行拥有的上下文对象，
//! 显式传入每次扫描调用：
//! - `RunContext`：整个运行共享——配置、存储、驱动表、字典
//!   自动机（每次运行构建一次）、有界 TTL 关联缓存、缓冲工件存储
//! - `ScanContext`：单对象视图——地址 + 截止/取消令牌
//! - `FinishContext`：`finish` 专用——唯一允许登记派生对象的入口

use crate::error::{AppError, Result};
use crate::index::Dictionary;
use crate::models::{DerivedObjectRecord, EngineConfig, ObjectAttrs};
use crate::scanners::{FlowKey, FlowStats};
use crate::storage::{ArtifactStore, CaseStore};
use crate::vfs::{AddressStep, DriverRegistry, VirtualAddress};
use aho_corasick::AhoCorasick;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;
use uuid::Uuid;

/// 跨对象流量关联缓存（显式有界 + 按存活时间驱逐）
pub type FlowCache = moka::sync::Cache<FlowKey, Arc<FlowStats>>;

/// 单对象取消令牌
///
/// 截止时间在令牌创建时固定；`check` 同时观察显式取消和超时。
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// 不设截止时间
    pub fn unbounded() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: None,
        }
    }

    /// 从现在起 `timeout` 后到期
    pub fn with_deadline(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// 配置秒数；0 表示不限
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::unbounded()
        } else {
            Self::with_deadline(Duration::from_secs(secs))
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    /// 到期/被取消时返回 `Cancelled` 错误
    pub fn check(&self, what: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(AppError::Cancelled(what.to_string()));
        }
        Ok(())
    }
}

/// 整个运行共享的上下文
pub struct RunContext {
    config: Arc<EngineConfig>,
    store: Arc<dyn CaseStore>,
    drivers: Arc<DriverRegistry>,
    artifacts: ArtifactStore,
    dictionary: Arc<Dictionary>,
    automaton: AhoCorasick,
    flows: FlowCache,
    run_id: Uuid,
}

impl RunContext {
    /// # 参数
    ///
    /// * `drivers` - None 时使用内置驱动表
    pub fn new(
        config: Arc<EngineConfig>,
        store: Arc<dyn CaseStore>,
        dictionary: Arc<Dictionary>,
        drivers: Option<Arc<DriverRegistry>>,
    ) -> Result<Self> {
        config.validate()?;

        // 自动机每次运行构建一次，所有对象共享
        let automaton = dictionary.build_automaton()?;
        let artifacts = ArtifactStore::new(config.spool_dir.as_deref())?;
        let flows = moka::sync::Cache::builder()
            .max_capacity(config.correlation_cache.capacity)
            .time_to_live(Duration::from_secs(config.correlation_cache.ttl_secs))
            .build();
        let run_id = Uuid::new_v4();

        info!(%run_id, words = dictionary.len(), "run context initialized");
        Ok(Self {
            config,
            store,
            drivers: drivers.unwrap_or_else(|| Arc::new(DriverRegistry::with_builtin())),
            artifacts,
            dictionary,
            automaton,
            flows,
            run_id,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn automaton(&self) -> &AhoCorasick {
        &self.automaton
    }

    pub fn flows(&self) -> &FlowCache {
        &self.flows
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

/// 单对象扫描上下文
///
/// 实例在 `process`/`finish` 里拿到的只读视图。
pub struct ScanContext {
    run: Arc<RunContext>,
    address: VirtualAddress,
    cancel: CancelToken,
}

impl ScanContext {
    pub fn for_object(run: Arc<RunContext>, address: VirtualAddress) -> Self {
        let cancel = CancelToken::from_secs(run.config().object_deadline_secs);
        Self {
            run,
            address,
            cancel,
        }
    }

    pub fn run(&self) -> &Arc<RunContext> {
        &self.run
    }

    pub fn address(&self) -> &VirtualAddress {
        &self.address
    }

    pub fn config(&self) -> &EngineConfig {
        self.run.config()
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        self.run.store()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.run.artifacts()
    }

    pub fn dictionary(&self) -> &Dictionary {
        self.run.dictionary()
    }

    pub fn automaton(&self) -> &AhoCorasick {
        self.run.automaton()
    }

    pub fn flows(&self) -> &FlowCache {
        self.run.flows()
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }
}

/// `finish` 阶段上下文
///
/// 登记的子对象先记到待办列表；流水线在整列车 finish 结束后把
/// 它们交给有界工作队列（深度/展开字节数在那里裁决）。
pub struct FinishContext<'a> {
    ctx: &'a ScanContext,
    pending: &'a mut Vec<DerivedObjectRecord>,
}

impl<'a> FinishContext<'a> {
    pub fn new(ctx: &'a ScanContext, pending: &'a mut Vec<DerivedObjectRecord>) -> Self {
        Self { ctx, pending }
    }

    pub fn ctx(&self) -> &ScanContext {
        self.ctx
    }

    /// 登记一个派生对象并安排递归扫描
    ///
    /// 展示名逐段清理后入库；同一地址重复登记是幂等的。
    pub fn register_child(
        &mut self,
        step: AddressStep,
        display_name: &str,
        attrs: ObjectAttrs,
    ) -> Result<VirtualAddress> {
        let name = sanitize_display_name(display_name);
        let address = self.ctx.store().create_derived_object(
            self.ctx.address(),
            step,
            &name,
            &attrs,
        )?;
        self.pending.push(DerivedObjectRecord {
            parent: self.ctx.address().clone(),
            address: address.clone(),
            display_name: name,
            attrs,
        });
        Ok(address)
    }
}

/// 逐路径段清理展示名（保留归档内的目录结构）
fn sanitize_display_name(raw: &str) -> String {
    let cleaned: Vec<String> = raw
        .split('/')
        .filter(|seg| !seg.is_empty() && *seg != "." && *seg != "..")
        .map(|seg| sanitize_filename::sanitize(seg))
        .filter(|seg| !seg.is_empty())
        .collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_deadline() {
        let token = CancelToken::with_deadline(Duration::from_millis(5));
        assert!(!token.is_cancelled() || token.check("t").is_err());
        std::thread::sleep(Duration::from_millis(10));
        assert!(token.is_cancelled());
        assert!(matches!(
            token.check("scan img0"),
            Err(AppError::Cancelled(_))
        ));
    }

    #[test]
    fn test_cancel_token_explicit() {
        let token = CancelToken::unbounded();
        assert!(token.check("t").is_ok());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_sanitize_display_name() {
        assert_eq!(sanitize_display_name("dir/a.jpg"), "dir/a.jpg");
        assert_eq!(sanitize_display_name("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_display_name("a//b"), "a/b");
        assert_eq!(sanitize_display_name(""), "unnamed");
        assert_eq!(sanitize_display_name("../.."), "unnamed");
    }
}
