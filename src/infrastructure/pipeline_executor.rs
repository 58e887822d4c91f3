//! 流水线执行器 - 基础设施层
//!
//! 外部多阶段转换（模型调用）的适配边界。编排层只知道：
//! - 一次执行可能耗时很长
//! - 可能因为不透明的原因失败
//! - 可以安全地并发执行多个实例

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::{debug, warn};

use crate::error::ExecutionError;
use crate::models::{is_remote, RawResult, WorkItem};
use crate::services::{LlmService, Schema};

/// 内联到提示词中的正文最大字符数
const MAX_INLINE_TEXT_CHARS: usize = 20_000;

/// 流水线执行器
///
/// 对一个专利执行完整的转换，返回原始结果或失败原因。
#[async_trait]
pub trait PipelineExecutor: Send + Sync {
    async fn execute(&self, item: &WorkItem) -> Result<RawResult, ExecutionError>;
}

/// 基于 LLM 的流水线执行器
///
/// 职责：
/// - 读取专利 JSON 元数据和正文
/// - 页面图片走 Vision 输入：远程图片直接给 URL，本地图片编码为 `data:` URL
/// - 为每次调用加上超时
pub struct LlmPipelineExecutor {
    llm: Arc<LlmService>,
    schema: Schema,
    timeout: Duration,
}

impl LlmPipelineExecutor {
    pub fn new(llm: Arc<LlmService>, schema: Schema, timeout: Duration) -> Self {
        Self {
            llm,
            schema,
            timeout,
        }
    }
}

#[async_trait]
impl PipelineExecutor for LlmPipelineExecutor {
    async fn execute(&self, item: &WorkItem) -> Result<RawResult, ExecutionError> {
        let document = fs::read_to_string(&item.document_path)
            .await
            .map_err(|source| ExecutionError::Io {
                path: item.document_path.clone(),
                source,
            })?;

        let raw_text = match item.raw_text_path.as_deref() {
            Some(path) => read_inline_text(path).await,
            None => None,
        };

        let image_urls = image_inputs(item).await;

        debug!(
            "[专利 {}] 调用模型 {} (正文 {}，图片 {} 张)",
            item.identifier,
            self.llm.model_name(),
            if raw_text.is_some() { "已内联" } else { "未内联" },
            image_urls.len()
        );

        let call = self.llm.generate_concept(
            &self.schema,
            item,
            &document,
            raw_text.as_deref(),
            &image_urls,
        );

        let mut fields = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| ExecutionError::Timeout {
                secs: self.timeout.as_secs(),
            })??;

        fields
            .entry(self.schema.identifier_field().to_string())
            .or_insert_with(|| JsonValue::String(item.identifier.clone()));

        Ok(RawResult::new(item.identifier.clone(), fields))
    }
}

/// 读取可以内联的正文
///
/// PDF 等二进制文件不是合法的 UTF-8，此时只在提示词中给出路径。
async fn read_inline_text(path: &Path) -> Option<String> {
    let bytes = fs::read(path).await.ok()?;
    let text = String::from_utf8(bytes).ok()?;
    Some(crate::utils::logging::truncate_text(&text, MAX_INLINE_TEXT_CHARS))
}

/// 把附件转换成 Vision 输入
///
/// 读取失败或格式不支持的本地图片跳过并告警，不影响本次执行。
pub(crate) async fn image_inputs(item: &WorkItem) -> Vec<String> {
    let mut urls = Vec::with_capacity(item.attachments.len());
    for path in &item.attachments {
        if is_remote(path) {
            urls.push(path.display().to_string());
            continue;
        }

        let Some(mime) = image_mime(path) else {
            warn!(
                "[专利 {}] ⚠️ 不支持的图片格式，跳过: {}",
                item.identifier,
                path.display()
            );
            continue;
        };

        match fs::read(path).await {
            Ok(bytes) => urls.push(format!("data:{};base64,{}", mime, STANDARD.encode(bytes))),
            Err(e) => warn!(
                "[专利 {}] ⚠️ 无法读取图片 {}: {}",
                item.identifier,
                path.display(),
                e
            ),
        }
    }
    urls
}

fn image_mime(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
