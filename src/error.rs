//! 错误类型
//!
//! 按照传播范围分层：
//! - `ConfigError` / `CompileIoError::SearchRootMissing` 会终止整个运行
//! - `SourceParseError` 只跳过一行索引
//! - `ExecutionError` / `ValidationError` 只影响单个专利
//! - `BatchError` 只影响单个批次

use std::path::PathBuf;

use thiserror::Error;

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必需的输入路径不存在
    #[error("必需的路径不存在: {}", .path.display())]
    MissingPath { path: PathBuf },
    /// 配置值不合法
    #[error("配置项 {key} 的值 '{value}' 不合法: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    /// 配置文件读取失败
    #[error("无法读取配置文件 {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// TOML 解析失败
    #[error("TOML 配置解析失败 ({}): {source}", .path.display())]
    TomlParseFailed {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    /// 环境变量解析失败
    #[error("环境变量 {var_name} 解析失败: 值 '{value}' 无法转换为 {expected_type}")]
    EnvVarParseFailed {
        var_name: String,
        value: String,
        expected_type: String,
    },
}

/// 索引文件中单行记录的解析错误
#[derive(Debug, Error)]
pub enum SourceParseError {
    /// 不是合法的 JSON
    #[error("第 {line} 行不是合法的 JSON: {source}")]
    MalformedLine {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
    /// 缺少必需字段
    #[error("第 {line} 行缺少字段 '{field}'")]
    MissingField { line: usize, field: &'static str },
    /// 标识符重复（后出现的覆盖先出现的）
    #[error("第 {line} 行的标识符 {identifier} 重复，覆盖之前的记录")]
    DuplicateIdentifier { line: usize, identifier: String },
}

/// 流水线执行错误
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// 超时
    #[error("执行超时 ({secs} 秒)")]
    Timeout { secs: u64 },
    /// 上游服务调用失败
    #[error("上游服务调用失败: {0}")]
    Upstream(String),
    /// 上游返回内容无法解析
    #[error("上游返回内容无法解析: {0}")]
    MalformedResponse(String),
    /// 读取输入文件失败
    #[error("读取输入失败 ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 不可恢复的错误，会导致整个批次被标记为失败
    #[error("不可恢复的错误: {0}")]
    Unrecoverable(String),
}

impl ExecutionError {
    /// 是否值得重试
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ExecutionError::Unrecoverable(_))
    }
}

/// 单个字段的校验失败原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("缺少字段 '{0}'")]
    MissingField(String),
    #[error("字段 '{field}' 过长: {length} 字符 (上限 {limit})")]
    FieldTooLong {
        field: String,
        length: usize,
        limit: usize,
    },
    #[error("字段 '{0}' 不是字符串")]
    NotText(String),
    #[error("标识符不一致: 期望 {expected}, 实际 {found}")]
    IdentifierMismatch { expected: String, found: String },
}

/// 结果校验错误，包含全部违规项
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} 校验失败: {}", .identifier.as_deref().unwrap_or("<未知>"), describe(.violations))]
pub struct ValidationError {
    pub identifier: Option<String>,
    pub violations: Vec<Violation>,
}

impl ValidationError {
    /// 是否包含指定字段的违规
    pub fn mentions(&self, field: &str) -> bool {
        self.violations.iter().any(|v| match v {
            Violation::MissingField(name) | Violation::NotText(name) => name == field,
            Violation::FieldTooLong { field: name, .. } => name == field,
            Violation::IdentifierMismatch { .. } => false,
        })
    }
}

fn describe(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// 批次级错误
#[derive(Debug, Error)]
pub enum BatchError {
    /// 创建批次输出目录失败
    #[error("无法创建批次目录 {}: {source}", .path.display())]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 某个任务 panic 或被取消
    #[error("专利 {identifier} 的任务异常退出: {reason}")]
    TaskAborted { identifier: String, reason: String },
    /// 执行器报告了不可恢复的错误
    #[error("专利 {identifier} 触发不可恢复错误: {source}")]
    Unrecoverable {
        identifier: String,
        #[source]
        source: ExecutionError,
    },
}

/// 汇编阶段的文件错误
#[derive(Debug, Error)]
pub enum CompileIoError {
    /// 搜索根目录不存在（致命）
    #[error("搜索目录不存在: {}", .path.display())]
    SearchRootMissing { path: PathBuf },
    /// 读取结果文件失败
    #[error("读取文件失败 ({}): {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// 结果文件不是合法的 JSON 对象
    #[error("JSON 解析失败 ({}): {reason}", .path.display())]
    MalformedJson { path: PathBuf, reason: String },
    /// 写入汇编文件失败
    #[error("写入文件失败 ({}): {source}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

// ========== 便捷构造函数 ==========

impl ExecutionError {
    /// 创建上游调用失败错误
    pub fn upstream(source: impl std::fmt::Display) -> Self {
        ExecutionError::Upstream(source.to_string())
    }
}
