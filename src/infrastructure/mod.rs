//! 基础设施层
//!
//! 持有外部资源（模型客户端），只暴露"执行一个专利" / "改写一条结果"的能力

pub mod pipeline_executor;
pub mod record_rewriter;

pub use pipeline_executor::{LlmPipelineExecutor, PipelineExecutor};
pub use record_rewriter::{LlmRewriter, RecordRewriter};
