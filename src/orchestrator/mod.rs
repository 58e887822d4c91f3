//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和流程调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批次调度器
//! - 切分批次（位置决定批次序号）
//! - 控制批内并发数量（Semaphore）
//! - 批次屏障、pacing / cooldown、停止信号
//! - 输出全局统计信息（RunReport）
//!
//! ### `result_compiler` - 结果汇编器
//! - 递归查找单个结果文件
//! - 重新校验、去重、排序
//! - 写出 JSONL 数据集并给出差异报告
//!
//! ### `rewrite_processor` - 结果改写处理器
//! - 对已有结果做一遍缩写，护栏检查 + 重试
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<WorkItem>)
//!     ↓
//! workflow::ItemFlow (处理单个 WorkItem)
//!     ↓
//! services (能力层：validator / writer / llm)
//!     ↓
//! infrastructure (基础设施：PipelineExecutor / RecordRewriter)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管执行，result_compiler 管汇编
//! 2. **向下依赖**：编排层 → workflow → services → infrastructure
//! 3. **无业务逻辑**：只做调度和统计，字段约束全部交给 ResultValidator

pub mod batch_processor;
pub mod result_compiler;
pub mod rewrite_processor;

// 重新导出主要类型
pub use batch_processor::{BatchReport, BatchScheduler, BatchStatus, RunReport, SchedulerOptions};
pub use result_compiler::{CompileReport, ResultCompiler};
pub use rewrite_processor::{ResultRewriter, RewriteReport};
