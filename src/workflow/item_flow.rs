//! 专利处理流程 - 流程层
//!
//! 核心职责：定义"一个专利"的完整处理流程
//!
//! 状态流转：
//! `PENDING → EXECUTING → {VALIDATED, REJECTED, EXECUTION_FAILED}`
//!
//! 1. 调用执行器（可恢复的失败最多尝试 `max_attempts` 次）
//! 2. 校验结果
//! 3. 写入结果文件

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::ExecutionError;
use crate::infrastructure::PipelineExecutor;
use crate::models::WorkItem;
use crate::services::{ResultValidator, ResultWriter};
use crate::workflow::item_ctx::ItemCtx;

/// 专利在一次运行中的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Executing,
    /// 通过校验并已写入
    Validated,
    /// 执行成功但结果未通过校验
    Rejected,
    /// 重试耗尽或写入失败
    ExecutionFailed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemState::Pending => "PENDING",
            ItemState::Executing => "EXECUTING",
            ItemState::Validated => "VALIDATED",
            ItemState::Rejected => "REJECTED",
            ItemState::ExecutionFailed => "EXECUTION_FAILED",
        };
        f.write_str(name)
    }
}

/// 单个专利的最终结果
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub identifier: String,
    pub state: ItemState,
    /// 实际调用执行器的次数
    pub attempts: usize,
    /// 结果文件路径（仅 VALIDATED）
    pub path: Option<PathBuf>,
    /// 失败原因（REJECTED / EXECUTION_FAILED）
    pub reason: Option<String>,
}

impl ItemOutcome {
    fn new(ctx: &ItemCtx, state: ItemState, attempts: usize) -> Self {
        Self {
            identifier: ctx.identifier.clone(),
            state,
            attempts,
            path: None,
            reason: None,
        }
    }

    fn validated(ctx: &ItemCtx, attempts: usize, path: PathBuf) -> Self {
        Self {
            path: Some(path),
            ..Self::new(ctx, ItemState::Validated, attempts)
        }
    }

    fn rejected(ctx: &ItemCtx, attempts: usize, reason: String) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(ctx, ItemState::Rejected, attempts)
        }
    }

    fn failed(ctx: &ItemCtx, attempts: usize, reason: String) -> Self {
        Self {
            reason: Some(reason),
            ..Self::new(ctx, ItemState::ExecutionFailed, attempts)
        }
    }
}

/// 专利处理流程
///
/// - 编排 执行 → 校验 → 写入
/// - 决定何时重试、何时放弃
/// - 可以 clone 到并发任务中（内部全部是 Arc）
#[derive(Clone)]
pub struct ItemFlow {
    executor: Arc<dyn PipelineExecutor>,
    validator: Arc<ResultValidator>,
    writer: Arc<ResultWriter>,
    max_attempts: usize,
    retry_delay: Duration,
}

impl ItemFlow {
    pub fn new(
        executor: Arc<dyn PipelineExecutor>,
        validator: Arc<ResultValidator>,
        writer: Arc<ResultWriter>,
    ) -> Self {
        Self {
            executor,
            validator,
            writer,
            max_attempts: 3,
            retry_delay: Duration::ZERO,
        }
    }

    /// 设置最大尝试次数（至少 1 次）
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 设置重试间隔，第 n 次重试前等待 n 倍间隔
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn writer(&self) -> &ResultWriter {
        &self.writer
    }

    /// 处理一个专利
    ///
    /// # 返回
    /// - `Ok(outcome)`: 专利到达终态（包括失败）
    /// - `Err(e)`: 执行器报告了不可恢复的错误，需要由批次处理
    pub async fn run(&self, item: &WorkItem, ctx: &ItemCtx) -> Result<ItemOutcome, ExecutionError> {
        let mut attempts = 0;

        let raw = loop {
            attempts += 1;
            debug!(
                "{} {} → {} (第 {}/{} 次)",
                ctx,
                ItemState::Pending,
                ItemState::Executing,
                attempts,
                self.max_attempts
            );

            match self.executor.execute(item).await {
                Ok(raw) => break raw,
                Err(e) if !e.is_recoverable() => {
                    error!("{} 💥 {}", ctx, e);
                    return Err(e);
                }
                Err(e) if attempts < self.max_attempts => {
                    warn!(
                        "{} ⚠️ 第 {} 次执行失败: {}，准备重试",
                        ctx, attempts, e
                    );
                    if !self.retry_delay.is_zero() {
                        tokio::time::sleep(backoff(self.retry_delay, attempts)).await;
                    }
                }
                Err(e) => {
                    error!("{} ❌ 已尝试 {} 次，放弃: {}", ctx, attempts, e);
                    return Ok(ItemOutcome::failed(ctx, attempts, e.to_string()));
                }
            }
        };

        let validated = match self.validator.validate_raw(raw) {
            Ok(validated) => validated,
            Err(e) => {
                warn!("{} 🚫 {}: {}", ctx, ItemState::Rejected, e);
                return Ok(ItemOutcome::rejected(ctx, attempts, e.to_string()));
            }
        };

        match self
            .writer
            .write(&item.category, ctx.batch_index, &validated)
            .await
        {
            Ok(path) => {
                info!("{} ✓ 结果已保存: {}", ctx, path.display());
                Ok(ItemOutcome::validated(ctx, attempts, path))
            }
            Err(e) => {
                error!("{} ❌ 结果写入失败: {}", ctx, e);
                Ok(ItemOutcome::failed(
                    ctx,
                    attempts,
                    format!("结果写入失败: {}", e),
                ))
            }
        }
    }
}

/// 第 n 次重试前等待 n 倍的间隔，溢出时取最大值
fn backoff(retry_delay: Duration, attempts: usize) -> Duration {
    retry_delay.saturating_mul(u32::try_from(attempts).unwrap_or(u32::MAX))
}
