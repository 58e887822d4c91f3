//! 结果校验服务 - 业务能力层
//!
//! 只负责"结果是否符合约束"这一判断，没有任何 IO。
//! 在两个时间点被调用：流水线执行之后（写入前）和汇编之前。

use serde_json::Value as JsonValue;

use crate::error::{ValidationError, Violation};
use crate::models::{FieldMap, RawResult, ValidatedResult};

/// 字段长度上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLimit {
    /// 最多 n 个字符
    Max(usize),
    /// 不限长度（用于标识符一类的字段）
    Unlimited,
}

/// 结果约束：标识符字段 + 必需字段列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    identifier_field: String,
    fields: Vec<(String, FieldLimit)>,
}

impl Schema {
    pub fn new(identifier_field: impl Into<String>) -> Self {
        Self {
            identifier_field: identifier_field.into(),
            fields: Vec::new(),
        }
    }

    /// 追加一个必需字段，同名字段会被替换
    pub fn field(mut self, name: impl Into<String>, limit: FieldLimit) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = limit,
            None => self.fields.push((name, limit)),
        }
        self
    }

    pub fn identifier_field(&self) -> &str {
        &self.identifier_field
    }

    pub fn limit_of(&self, name: &str) -> Option<FieldLimit> {
        if name == self.identifier_field {
            return Some(FieldLimit::Unlimited);
        }
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, limit)| *limit)
    }

    /// 必需字段名（标识符在最前）
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.required().map(|(name, _)| name)
    }

    /// 所有必需字段（标识符在最前）
    fn required(&self) -> impl Iterator<Item = (&str, FieldLimit)> {
        std::iter::once((self.identifier_field.as_str(), FieldLimit::Unlimited)).chain(
            self.fields
                .iter()
                .filter(|(name, _)| *name != self.identifier_field)
                .map(|(name, limit)| (name.as_str(), *limit)),
        )
    }
}

/// 结果校验器
#[derive(Debug, Clone)]
pub struct ResultValidator {
    schema: Schema,
}

impl ResultValidator {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// 校验一个字段集合
    ///
    /// 检查所有字段并一次性报告全部违规项；通过时原样返回（多余字段保留）。
    pub fn validate(&self, fields: FieldMap) -> Result<ValidatedResult, ValidationError> {
        let violations = self.check(&fields);
        let identifier = fields
            .get(self.schema.identifier_field())
            .and_then(JsonValue::as_str)
            .map(str::to_string);

        match (violations.is_empty(), identifier) {
            (true, Some(identifier)) => Ok(ValidatedResult::new(identifier, fields)),
            (_, identifier) => Err(ValidationError {
                identifier,
                violations,
            }),
        }
    }

    /// 校验一次流水线执行的输出
    ///
    /// 额外要求输出中的标识符与来源专利一致。
    pub fn validate_raw(&self, raw: RawResult) -> Result<ValidatedResult, ValidationError> {
        let expected = raw.identifier;
        let mut violations = self.check(&raw.fields);

        if let Some(found) = raw
            .fields
            .get(self.schema.identifier_field())
            .and_then(JsonValue::as_str)
        {
            if found != expected {
                violations.push(Violation::IdentifierMismatch {
                    expected: expected.clone(),
                    found: found.to_string(),
                });
            }
        }

        if violations.is_empty() {
            Ok(ValidatedResult::new(expected, raw.fields))
        } else {
            Err(ValidationError {
                identifier: Some(expected),
                violations,
            })
        }
    }

    fn check(&self, fields: &FieldMap) -> Vec<Violation> {
        let mut violations = Vec::new();

        for (name, limit) in self.schema.required() {
            let value = match fields.get(name) {
                None | Some(JsonValue::Null) => {
                    violations.push(Violation::MissingField(name.to_string()));
                    continue;
                }
                Some(value) => value,
            };

            let Some(text) = value.as_str() else {
                violations.push(Violation::NotText(name.to_string()));
                continue;
            };

            if let FieldLimit::Max(limit) = limit {
                let length = text.chars().count();
                if length > limit {
                    violations.push(Violation::FieldTooLong {
                        field: name.to_string(),
                        length,
                        limit,
                    });
                }
            }
        }

        violations
    }
}
