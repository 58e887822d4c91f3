//! 批量专利处理器 - 编排层
//!
//! ## 职责
//!
//! 负责把专利列表切分成批次，逐批并发处理，并汇总统计。
//!
//! ## 核心功能
//!
//! 1. **分批**：位置 i 的专利属于第 ⌊i / batch_size⌋ 批，重跑时结果落在相同位置
//! 2. **并发控制**：每个专利一个 tokio 任务，Semaphore 限制同时执行的数量
//! 3. **批次屏障**：本批全部结束后才开始下一批
//! 4. **节奏控制**：成功批次之后等待 pacing，失败批次之后等待 cooldown，
//!    最后一批之后不等待；等待可以被停止信号打断
//! 5. **故障隔离**：单个专利的错误不越过批次，单个批次的错误不越过整次运行
//!
//! ## 设计特点
//!
//! - **顶层编排**：不处理单个专利的细节，委托给 `workflow::ItemFlow`
//! - **无共享可变状态**：输出路径按 类别 / 批次 / 标识符 划分，任务之间只共享 Semaphore

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::fs;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{BatchError, ExecutionError};
use crate::infrastructure::PipelineExecutor;
use crate::models::{partition, Batch, WorkItem};
use crate::services::{ResultValidator, ResultWriter};
use crate::utils::logging::{
    log_batch_complete, log_batch_start, log_items_loaded, print_final_stats,
};
use crate::workflow::{ItemCtx, ItemFlow, ItemOutcome, ItemState};

/// 调度参数
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// 批内并发上限
    pub concurrency: usize,
    /// 成功批次之后的等待时间
    pub pacing: Duration,
    /// 失败批次之后的冷却时间
    pub cooldown: Duration,
    /// 单个专利的最大尝试次数
    pub max_attempts: usize,
    /// 重试间隔
    pub retry_delay: Duration,
    /// 结果文件后缀
    pub result_suffix: String,
}

impl SchedulerOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.effective_concurrency(),
            pacing: config.pacing(),
            cooldown: config.cooldown(),
            max_attempts: config.max_attempts,
            retry_delay: config.retry_delay(),
            result_suffix: config.result_suffix.clone(),
        }
    }
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// 批次状态
#[derive(Debug)]
pub enum BatchStatus {
    /// 所有任务都到达了终态
    Completed,
    /// 批次级错误（目录创建失败、任务异常退出、不可恢复错误）
    Failed(Vec<BatchError>),
}

/// 单个批次的处理结果
#[derive(Debug)]
pub struct BatchReport {
    /// 批次序号（从 0 开始）
    pub index: usize,
    /// 本批专利数量
    pub size: usize,
    /// 实际提交执行的专利数量
    pub attempted: usize,
    /// 到达终态的专利
    pub outcomes: Vec<ItemOutcome>,
    pub status: BatchStatus,
    pub elapsed: Duration,
}

impl BatchReport {
    fn new(batch: &Batch<'_>) -> Self {
        Self {
            index: batch.index,
            size: batch.len(),
            attempted: 0,
            outcomes: Vec::with_capacity(batch.len()),
            status: BatchStatus::Completed,
            elapsed: Duration::ZERO,
        }
    }

    fn fail(&mut self, err: BatchError) {
        error!("[批次 {}] 💥 {}", self.index + 1, err);
        match &mut self.status {
            BatchStatus::Failed(errors) => errors.push(err),
            status => *status = BatchStatus::Failed(vec![err]),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, BatchStatus::Failed(_))
    }

    pub fn count(&self, state: ItemState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn validated(&self) -> usize {
        self.count(ItemState::Validated)
    }

    pub fn rejected(&self) -> usize {
        self.count(ItemState::Rejected)
    }

    /// 执行失败的数量（包括异常退出、不可恢复的专利）
    pub fn failed(&self) -> usize {
        self.attempted - self.validated() - self.rejected()
    }
}

/// 一次运行的处理结果
#[derive(Debug, Default)]
pub struct RunReport {
    pub total_items: usize,
    pub total_batches: usize,
    /// 已处理的批次（按顺序）
    pub batches: Vec<BatchReport>,
    /// 没有提交执行的专利数量（超出 max_batches、被停止或目录创建失败）
    pub not_attempted: usize,
    /// 是否被停止信号打断
    pub interrupted: bool,
}

impl RunReport {
    pub fn attempted(&self) -> usize {
        self.batches.iter().map(|b| b.attempted).sum()
    }

    pub fn validated(&self) -> usize {
        self.batches.iter().map(BatchReport::validated).sum()
    }

    pub fn rejected(&self) -> usize {
        self.batches.iter().map(BatchReport::rejected).sum()
    }

    pub fn failed(&self) -> usize {
        self.batches.iter().map(BatchReport::failed).sum()
    }

    /// 失败批次的序号（从 0 开始）
    pub fn failed_batches(&self) -> Vec<usize> {
        self.batches
            .iter()
            .filter(|b| b.is_failed())
            .map(|b| b.index)
            .collect()
    }

    /// 所有到达终态的专利
    pub fn outcomes(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.batches.iter().flat_map(|b| b.outcomes.iter())
    }
}

/// 批次调度器
pub struct BatchScheduler {
    executor: Arc<dyn PipelineExecutor>,
    validator: Arc<ResultValidator>,
    options: SchedulerOptions,
    shutdown: Option<watch::Receiver<bool>>,
}

impl BatchScheduler {
    pub fn new(
        executor: Arc<dyn PipelineExecutor>,
        validator: ResultValidator,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            executor,
            validator: Arc::new(validator),
            options,
            shutdown: None,
        }
    }

    /// 接入停止信号：值变为 `true` 后不再开始新的批次，正在进行的等待立即结束
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// 分批处理所有专利
    ///
    /// # 参数
    /// - `items`: 有序的专利列表
    /// - `batch_size`: 每批数量
    /// - `max_batches`: 最多处理的批次数，`None` 表示全部
    /// - `output_root`: 结果输出根目录
    ///
    /// # 返回
    /// 运行报告。单个专利或批次的失败都记录在报告中，不会中断运行。
    pub async fn run_batches(
        &self,
        items: &[WorkItem],
        batch_size: usize,
        max_batches: Option<usize>,
        output_root: &Path,
    ) -> RunReport {
        let batches = partition(items, batch_size);
        let total_batches = batches.len();
        let planned = max_batches.map_or(total_batches, |max| max.min(total_batches));

        log_items_loaded(items.len(), total_batches, planned);

        let writer = Arc::new(ResultWriter::new(output_root, &self.options.result_suffix));
        let flow = ItemFlow::new(self.executor.clone(), self.validator.clone(), writer)
            .with_max_attempts(self.options.max_attempts)
            .with_retry_delay(self.options.retry_delay);
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));

        let mut report = RunReport {
            total_items: items.len(),
            total_batches,
            ..Default::default()
        };

        for batch in batches.iter().take(planned) {
            if self.is_shutdown() {
                warn!("🛑 收到停止信号，不再开始新的批次");
                report.interrupted = true;
                break;
            }

            let batch_report = self
                .process_batch(batch, &flow, &semaphore, total_batches, items.len())
                .await;
            let failed = batch_report.is_failed();
            report.batches.push(batch_report);

            if batch.index + 1 >= planned {
                break;
            }

            let wait = if failed {
                warn!(
                    "[批次 {}] 🧊 批次失败，冷却 {} 秒后继续",
                    batch.index + 1,
                    self.options.cooldown.as_secs()
                );
                self.options.cooldown
            } else {
                info!(
                    "⏳ 等待 {} 秒后开始下一批",
                    self.options.pacing.as_secs()
                );
                self.options.pacing
            };

            if !self.pause(wait).await {
                warn!("🛑 等待期间收到停止信号，剩余批次不再处理");
                report.interrupted = true;
                break;
            }
        }

        report.not_attempted = items.len() - report.attempted();

        print_final_stats(
            report.attempted(),
            report.validated(),
            report.rejected(),
            report.failed(),
            report.failed_batches().len(),
        );
        if report.not_attempted > 0 {
            info!("⏭️ 未处理: {} 个专利", report.not_attempted);
        }

        report
    }

    /// 处理单个批次
    async fn process_batch(
        &self,
        batch: &Batch<'_>,
        flow: &ItemFlow,
        semaphore: &Arc<Semaphore>,
        total_batches: usize,
        total_items: usize,
    ) -> BatchReport {
        let started = Instant::now();
        let mut report = BatchReport::new(batch);

        log_batch_start(
            batch.index + 1,
            total_batches,
            batch.offset + 1,
            batch.offset + batch.len(),
            total_items,
        );

        // 为本批涉及的每个类别创建输出目录
        let categories: BTreeSet<&str> = batch.items.iter().map(|i| i.category.as_str()).collect();
        for category in categories {
            let path = flow.writer().batch_dir(category, batch.index);
            if let Err(source) = fs::create_dir_all(&path).await {
                report.fail(BatchError::DirectoryCreation { path, source });
            }
        }
        if report.is_failed() {
            report.elapsed = started.elapsed();
            return report;
        }

        // 为本批创建并发任务
        let handles: Vec<_> = batch
            .items
            .iter()
            .enumerate()
            .map(|(offset, item)| {
                let ctx = ItemCtx::new(batch.index, batch.offset + offset, &item.identifier);
                let item = item.clone();
                let flow = flow.clone();
                let semaphore = semaphore.clone();

                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| ExecutionError::Unrecoverable(e.to_string()))?;
                    flow.run(&item, &ctx).await
                })
            })
            .collect();
        report.attempted = handles.len();

        // 等待本批所有任务完成
        let results = join_all(handles).await;

        for (item, joined) in batch.items.iter().zip(results) {
            match joined {
                Ok(Ok(outcome)) => report.outcomes.push(outcome),
                Ok(Err(source)) => report.fail(BatchError::Unrecoverable {
                    identifier: item.identifier.clone(),
                    source,
                }),
                Err(e) => report.fail(BatchError::TaskAborted {
                    identifier: item.identifier.clone(),
                    reason: e.to_string(),
                }),
            }
        }

        report.elapsed = started.elapsed();
        log_batch_complete(
            batch.index + 1,
            report.validated(),
            report.attempted,
            report.elapsed,
        );

        report
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// 等待指定时间
    ///
    /// # 返回
    /// 正常等待结束返回 `true`，被停止信号打断返回 `false`
    async fn pause(&self, wait: Duration) -> bool {
        let Some(mut shutdown) = self.shutdown.clone() else {
            tokio::time::sleep(wait).await;
            return true;
        };

        if *shutdown.borrow() {
            return false;
        }

        let deadline = tokio::time::Instant::now() + wait;
        let stopped = tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return true,
            changed = shutdown.wait_for(|stop| *stop) => changed.is_ok(),
        };
        if stopped {
            return false;
        }

        // 发送端已关闭，不会再有停止信号
        tokio::time::sleep_until(deadline).await;
        true
    }
}
