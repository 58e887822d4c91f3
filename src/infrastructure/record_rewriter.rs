//! 结果改写器 - 基础设施层
//!
//! 把已经生成的产品概念交给模型改写得更短。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::error::ExecutionError;
use crate::models::{RawResult, ValidatedResult};
use crate::services::{LlmService, Schema};

/// 结果改写器
#[async_trait]
pub trait RecordRewriter: Send + Sync {
    async fn rewrite(&self, record: &ValidatedResult) -> Result<RawResult, ExecutionError>;
}

/// 基于 LLM 的结果改写器
pub struct LlmRewriter {
    llm: Arc<LlmService>,
    schema: Schema,
    timeout: Duration,
}

impl LlmRewriter {
    /// `schema` 为改写后的约束（用于在提示词中说明长度上限）
    pub fn new(llm: Arc<LlmService>, schema: Schema, timeout: Duration) -> Self {
        Self {
            llm,
            schema,
            timeout,
        }
    }
}

#[async_trait]
impl RecordRewriter for LlmRewriter {
    async fn rewrite(&self, record: &ValidatedResult) -> Result<RawResult, ExecutionError> {
        let call = self.llm.rewrite_concept(&self.schema, record);
        let mut fields = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ExecutionError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        // 标识符不允许被改写
        fields.insert(
            self.schema.identifier_field().to_string(),
            JsonValue::String(record.identifier().to_string()),
        );

        Ok(RawResult::new(record.identifier(), fields))
    }
}
