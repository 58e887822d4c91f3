use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

/// 字段名 → 值
pub type FieldMap = Map<String, JsonValue>;

/// 一次流水线执行的原始输出（尚未校验）
#[derive(Debug, Clone, PartialEq)]
pub struct RawResult {
    /// 来源专利的标识
    pub identifier: String,
    pub fields: FieldMap,
}

impl RawResult {
    pub fn new(identifier: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            identifier: identifier.into(),
            fields,
        }
    }
}

/// 已通过校验的结果，只能由 `ResultValidator` 构造
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ValidatedResult {
    #[serde(skip)]
    identifier: String,
    fields: FieldMap,
}

impl ValidatedResult {
    pub(crate) fn new(identifier: String, fields: FieldMap) -> Self {
        Self { identifier, fields }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(JsonValue::as_str)
    }
}

impl fmt::Display for ValidatedResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.text("title") {
            Some(title) => write!(f, "{}: {}", self.identifier, title),
            None => write!(f, "{}", self.identifier),
        }
    }
}
