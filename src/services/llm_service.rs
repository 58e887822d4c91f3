//! LLM 服务 - 业务能力层
//!
//! 只负责"调用模型并拿回一个 JSON 对象"，不关心流程
//!
//! ## 技术栈
//! - 使用 `async-openai` crate 进行 API 调用
//! - 支持自定义 API 端点和模型
//! - 兼容 OpenAI API 的服务（如 Azure, Gemini, Doubao 等）

use std::sync::LazyLock;

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
        ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageDetail,
        ImageUrl,
    },
    Client,
};
use regex::Regex;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ExecutionError;
use crate::models::{FieldMap, ValidatedResult, WorkItem};
use crate::services::validator::{FieldLimit, Schema};

static FENCED_JSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("fenced json pattern")
});

/// LLM 服务
///
/// 职责：
/// - 调用 LLM API 生成 / 改写产品概念
/// - 从回复中提取 JSON 对象
/// - 不出现批次、不关心重试
pub struct LlmService {
    client: Client<OpenAIConfig>,
    model_name: String,
    temperature: f32,
}

impl LlmService {
    /// 创建新的 LLM 服务
    pub fn new(config: &Config) -> Self {
        // 配置 OpenAI 客户端（兼容 OpenAI API 的服务）
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.llm_api_key)
            .with_api_base(&config.llm_api_base_url);

        Self {
            client: Client::with_config(openai_config),
            model_name: config.llm_model_name.clone(),
            temperature: config.llm_temperature,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// 通用的 LLM 调用函数
    ///
    /// # 参数
    /// - `user_message`: 用户消息内容
    /// - `system_message`: 系统消息（可选）
    /// - `imgs`: 图片 URL 列表（可选），会追加到用户消息中
    ///
    /// # 返回
    /// 返回 LLM 的响应内容（字符串）
    pub async fn send_to_llm(
        &self,
        user_message: &str,
        system_message: Option<&str>,
        imgs: Option<&[String]>,
    ) -> Result<String, ExecutionError> {
        debug!("调用 LLM API，模型: {}", self.model_name);
        debug!("用户消息长度: {} 字符", user_message.len());

        let messages = build_request_messages(user_message, system_message, imgs)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model_name)
            .messages(messages)
            .temperature(self.temperature)
            .max_tokens(2048u32)
            .build()
            .map_err(ExecutionError::upstream)?;

        let response = self.client.chat().create(request).await.map_err(|e| {
            warn!("LLM API 调用失败: {}", e);
            ExecutionError::upstream(e)
        })?;

        debug!("LLM API 调用成功");

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| ExecutionError::MalformedResponse("LLM 返回内容为空".to_string()))?;

        Ok(content.trim().to_string())
    }

    /// 为一个专利生成产品概念
    ///
    /// # 参数
    /// - `schema`: 输出字段约束，用于在提示词中说明字段和长度
    /// - `item`: 专利
    /// - `document`: 专利 JSON 元数据原文
    /// - `raw_text`: 专利正文（可能为空）
    /// - `image_urls`: 页面图片（远程 URL 或 `data:` URL），作为 Vision 输入
    pub async fn generate_concept(
        &self,
        schema: &Schema,
        item: &WorkItem,
        document: &str,
        raw_text: Option<&str>,
        image_urls: &[String],
    ) -> Result<FieldMap, ExecutionError> {
        let (user_message, system_message) =
            build_concept_messages(schema, item, document, raw_text, image_urls.len());
        let reply = self
            .send_to_llm(&user_message, Some(&system_message), Some(image_urls))
            .await?;
        parse_json_reply(&reply)
    }

    /// 把已有的产品概念改写得更短
    pub async fn rewrite_concept(
        &self,
        schema: &Schema,
        record: &ValidatedResult,
    ) -> Result<FieldMap, ExecutionError> {
        let (user_message, system_message) = build_rewrite_messages(schema, record);
        let reply = self
            .send_to_llm(&user_message, Some(&system_message), None)
            .await?;
        parse_json_reply(&reply)
    }
}

/// 构建请求消息
///
/// 有图片时用户消息使用 Vision 格式（文本 + 图片），否则是纯文本。
pub(crate) fn build_request_messages(
    user_message: &str,
    system_message: Option<&str>,
    imgs: Option<&[String]>,
) -> Result<Vec<ChatCompletionRequestMessage>, ExecutionError> {
    let mut messages = Vec::new();

    if let Some(sys_msg) = system_message {
        let system_msg = ChatCompletionRequestSystemMessageArgs::default()
            .content(sys_msg)
            .build()
            .map_err(ExecutionError::upstream)?;
        messages.push(ChatCompletionRequestMessage::System(system_msg));
    }

    let user_msg = match imgs {
        Some(img_urls) if !img_urls.is_empty() => {
            // Vision API：文本 + 图片
            let mut content_parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: user_message.to_string(),
                },
            )];

            for url in img_urls {
                content_parts.push(ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: Some(ImageDetail::Auto),
                        },
                    },
                ));
            }

            debug!("使用 Vision API，包含 {} 张图片", img_urls.len());

            ChatCompletionRequestUserMessageArgs::default()
                .content(ChatCompletionRequestUserMessageContent::Array(content_parts))
                .build()
                .map_err(ExecutionError::upstream)?
        }
        _ => ChatCompletionRequestUserMessageArgs::default()
            .content(user_message)
            .build()
            .map_err(ExecutionError::upstream)?,
    };

    messages.push(ChatCompletionRequestMessage::User(user_msg));
    Ok(messages)
}

/// 字段说明：`- title: at most 100 characters`
fn describe_fields(schema: &Schema, names: &[String]) -> String {
    names
        .iter()
        .map(|name| match schema.limit_of(name) {
            Some(FieldLimit::Max(max)) => format!("- {}: at most {} characters", name, max),
            _ => format!("- {}", name),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// 构建产品概念生成的消息
///
/// 返回 (user_message, system_message)
pub fn build_concept_messages(
    schema: &Schema,
    item: &WorkItem,
    document: &str,
    raw_text: Option<&str>,
    image_count: usize,
) -> (String, String) {
    let system_message = "You are a managing partner turning patents into product concepts. \
                          Answer with a single JSON object and nothing else."
        .to_string();

    let field_names = concept_field_names(schema);

    let image_info = match image_count {
        0 => "none".to_string(),
        n => format!("{} attached to this message, in page order", n),
    };

    let raw_text_info = match (raw_text, item.raw_text_path.as_ref()) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => format!("(not inlined, source file: {})", path.display()),
        (None, None) => "(not available)".to_string(),
    };

    let user_message = format!(
        r#"Analyse patent {identifier} (category: {category}) and define one product built on it.

Patent metadata (JSON):
{document}

Patent text:
{raw_text}

Page images:
{images}

Return a JSON object with exactly these fields:
- {id_field}: "{identifier}"
{fields}"#,
        identifier = item.identifier,
        category = item.category,
        document = document,
        raw_text = raw_text_info,
        images = image_info,
        id_field = schema.identifier_field(),
        fields = describe_fields(schema, &field_names),
    );

    (user_message, system_message)
}

/// 构建产品概念改写的消息
///
/// 返回 (user_message, system_message)
pub fn build_rewrite_messages(schema: &Schema, record: &ValidatedResult) -> (String, String) {
    let system_message = "You rewrite product concepts to be concise without losing meaning. \
                          Answer with a single JSON object and nothing else."
        .to_string();

    let original = serde_json::to_string_pretty(record.fields()).unwrap_or_default();
    let field_names = concept_field_names(schema);

    let user_message = format!(
        r#"Rewrite this product concept so every field respects its limit.
Keep "{id_field}" unchanged.

Original:
{original}

Limits:
{fields}"#,
        id_field = schema.identifier_field(),
        original = original,
        fields = describe_fields(schema, &field_names),
    );

    (user_message, system_message)
}

fn concept_field_names(schema: &Schema) -> Vec<String> {
    schema
        .field_names()
        .filter(|name| *name != schema.identifier_field())
        .map(str::to_string)
        .collect()
}

/// 从 LLM 回复中提取 JSON 对象
///
/// 支持 ```json 代码块，也支持前后夹杂说明文字的裸 JSON。
pub fn parse_json_reply(reply: &str) -> Result<FieldMap, ExecutionError> {
    let candidate = match FENCED_JSON.captures(reply).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => match (reply.find('{'), reply.rfind('}')) {
            (Some(start), Some(end)) if start < end => &reply[start..=end],
            _ => {
                return Err(ExecutionError::MalformedResponse(format!(
                    "回复中没有 JSON 对象: {}",
                    crate::utils::logging::truncate_text(reply, 80)
                )))
            }
        },
    };

    match serde_json::from_str::<JsonValue>(candidate) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(other) => Err(ExecutionError::MalformedResponse(format!(
            "回复不是 JSON 对象: {}",
            other
        ))),
        Err(e) => Err(ExecutionError::MalformedResponse(format!(
            "JSON 解析失败: {}",
            e
        ))),
    }
}
