//! # Patent Batch
//!
//! 把专利文档（JSON 元数据、PDF / 正文、页面图片）批量转换成结构化"产品概念"的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部资源（模型客户端），只暴露能力
//! - `PipelineExecutor` - 对一个专利执行完整转换，可能耗时很长、可能失败
//! - `RecordRewriter` - 把一条已有结果改写得更短
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单个专利
//! - `ResultValidator` - 字段约束检查（纯函数）
//! - `ResultWriter` - 写单个结果文件
//! - `LlmService` - 模型调用与回复解析
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个专利"的完整处理流程
//! - `ItemCtx` - 上下文封装（批次 + 位置 + 标识符）
//! - `ItemFlow` - 流程编排（执行 → 重试 → 校验 → 写入）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 批次调度器，管理并发和节奏
//! - `orchestrator/result_compiler` - 结果汇编器，生成数据集和差异报告
//! - `orchestrator/rewrite_processor` - 结果改写处理器
//!
//! ## 模块结构

pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use infrastructure::{PipelineExecutor, RecordRewriter};
pub use models::{RawResult, ValidatedResult, WorkItem};
pub use orchestrator::{
    BatchScheduler, CompileReport, ResultCompiler, ResultRewriter, RewriteReport, RunReport,
    SchedulerOptions,
};
pub use services::{FieldLimit, ResultValidator, Schema};
pub use workflow::{ItemCtx, ItemFlow, ItemOutcome, ItemState};
