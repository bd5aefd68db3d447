//! 引擎门面
//!
//! 把配置、案件存储、驱动表、扫描器注册表、字典自动机和工作线程
//! 池接成一个入口。顶层对象经由作业队列扇出；每棵递归树内部仍是
//! 单工作者顺序扫描。

use crate::error::{AppError, Result};
use crate::index::{Dictionary, OffsetDecoder};
use crate::models::EngineConfig;
use crate::pipeline::{RunContext, ScanPipeline, TreeStats};
use crate::registry::{ScannerRegistry, Selection};
use crate::scanners::builtin_definitions;
use crate::storage::{CaseStore, JobOutcome, JobQueue, LocalJobQueue};
use crate::vfs::{ByteStream, DriverRegistry, VirtualAddress};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// 证据分析引擎
pub struct AnalysisEngine {
    config: Arc<EngineConfig>,
    store: Arc<dyn CaseStore>,
    registry: ScannerRegistry,
    drivers: Arc<DriverRegistry>,
    dictionary: Arc<Dictionary>,
}

impl AnalysisEngine {
    /// 组装引擎
    ///
    /// 扫描器注册表和驱动表在这里一次性建好；任何重名/重说明符
    /// 都是启动期致命错误。
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn CaseStore>,
        dictionary: Dictionary,
    ) -> Result<Self> {
        config.validate()?;
        let registry = ScannerRegistry::with_definitions(builtin_definitions())?;
        Ok(Self {
            config: Arc::new(config),
            store,
            registry,
            drivers: Arc::new(DriverRegistry::with_builtin()),
            dictionary: Arc::new(dictionary),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CaseStore> {
        &self.store
    }

    pub fn registry(&self) -> &ScannerRegistry {
        &self.registry
    }

    /// 查询侧偏移解码器（搜索/报表层用）
    pub fn offset_decoder(&self) -> OffsetDecoder {
        OffsetDecoder::new(Arc::clone(&self.store), self.config.index_block_bits)
    }

    /// 打开任意地址的字节流
    ///
    /// 任何嵌套深度的对象都能仅凭地址打开。
    pub fn open(&self, address: &str) -> Result<ByteStream> {
        let address: VirtualAddress = address.parse()?;
        self.drivers.open(self.store.as_ref(), &address)
    }

    fn build_run(&self) -> Result<Arc<RunContext>> {
        Ok(Arc::new(RunContext::new(
            Arc::clone(&self.config),
            Arc::clone(&self.store),
            Arc::clone(&self.dictionary),
            Some(Arc::clone(&self.drivers)),
        )?))
    }

    /// 扫描单个顶层对象及其整棵派生树（当前线程执行）
    pub fn scan(&self, root: &str, selection: &Selection) -> Result<TreeStats> {
        let address: VirtualAddress = root.parse()?;
        let train = self.registry.resolve(selection)?;
        let pipeline = ScanPipeline::new(self.build_run()?, train);
        pipeline.scan_tree(&address)
    }

    /// 并发扫描多个顶层对象
    ///
    /// 运行上下文（含字典自动机）只构建一次、全部工作者共享；
    /// 每个顶层对象恰由一个工作者扫描。
    pub fn scan_roots(&self, roots: &[String], selection: &Selection) -> Result<Vec<JobOutcome>> {
        // 地址语法错误在投递前就失败，不浪费工作者
        for root in roots {
            root.parse::<VirtualAddress>()?;
        }

        let train = self.registry.resolve(selection)?;
        let pipeline = Arc::new(ScanPipeline::new(self.build_run()?, train));

        let handler_pipeline = Arc::clone(&pipeline);
        let queue = LocalJobQueue::new(
            self.config.effective_workers(),
            Arc::new(move |command: &str, args: &[String]| -> Result<()> {
                match command {
                    "scan" => {
                        let address: VirtualAddress = args
                            .first()
                            .ok_or_else(|| AppError::Internal("scan job without address".into()))?
                            .parse()?;
                        handler_pipeline.scan_tree(&address).map(|_| ())
                    }
                    other => Err(AppError::Internal(format!("unknown job command '{}'", other))),
                }
            }),
        );

        let cookies: Vec<String> = roots
            .iter()
            .map(|root| {
                let cookie = Uuid::new_v4().to_string();
                queue
                    .enqueue("scan", vec![root.clone()], cookie.clone())
                    .map(|_| cookie)
            })
            .collect::<Result<_>>()?;

        let outcomes: Vec<JobOutcome> = cookies
            .iter()
            .map(|cookie| queue.wait_for(cookie))
            .collect::<Result<_>>()?;

        info!(
            roots = roots.len(),
            failed = outcomes.iter().filter(|o| !o.ok).count(),
            "root scan batch complete"
        );
        Ok(outcomes)
    }
}
