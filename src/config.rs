use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ConfigError;
use crate::services::validator::{FieldLimit, Schema};

/// 程序配置
///
/// 加载顺序：`Default` → TOML 配置文件（可选）→ 环境变量覆盖。
/// 核心逻辑只接收已经构造好的值，不直接读取环境变量。
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 当前处理的专利类别（nlp / computer_science / material_chemistry）
    pub category: String,
    /// 知识库根目录
    pub knowledge_root: String,
    /// 结果输出根目录
    pub output_root: String,
    /// 索引文件路径，未设置时使用 `<knowledge_root>/<category>/<category>.jsonl`
    pub index_path: Option<String>,
    /// 每批处理的专利数量
    pub batch_size: usize,
    /// 最多处理的批次数（None 表示全部，配置文件中写 0 也表示全部）
    #[serde(deserialize_with = "deserialize_batch_limit")]
    pub max_batches: Option<usize>,
    /// 批内并发上限，0 表示与批大小相同
    pub max_concurrency: usize,
    /// 批次成功后的等待秒数
    pub pacing_secs: u64,
    /// 批次失败后的冷却秒数
    pub cooldown_secs: u64,
    /// 单个专利的最大尝试次数
    pub max_attempts: usize,
    /// 重试间隔秒数（第 n 次重试前等待 n 倍）
    pub retry_delay_secs: u64,
    /// 单次 LLM 请求超时秒数
    pub request_timeout_secs: u64,
    /// 单个结果文件的后缀
    pub result_suffix: String,
    /// 改写结果文件的后缀
    pub rewrite_suffix: String,
    /// 改写后每个字段的字符上限
    pub rewrite_max_chars: usize,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 结果字段约束
    pub schema: SchemaConfig,
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    pub llm_temperature: f32,
}

/// 结果字段约束配置
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// 标识符字段名
    pub identifier_field: String,
    /// 必需字段及其长度上限
    pub fields: Vec<FieldSpec>,
}

/// 单个字段约束，`max_chars` 缺省表示不限长度
#[derive(Clone, Debug, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

impl FieldSpec {
    fn new(name: &str, max_chars: usize) -> Self {
        Self {
            name: name.to_string(),
            max_chars: Some(max_chars),
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            identifier_field: "publication_number".to_string(),
            fields: vec![
                FieldSpec::new("title", 100),
                FieldSpec::new("product_description", 300),
                FieldSpec::new("implementation", 300),
                FieldSpec::new("differentiation", 300),
            ],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            category: "nlp".to_string(),
            knowledge_root: "knowledge".to_string(),
            output_root: "output".to_string(),
            index_path: None,
            batch_size: 5,
            max_batches: Some(2),
            max_concurrency: 0,
            pacing_secs: 30,
            cooldown_secs: 30,
            max_attempts: 3,
            retry_delay_secs: 5,
            request_timeout_secs: 180,
            result_suffix: "_output.json".to_string(),
            rewrite_suffix: "_output_short.json".to_string(),
            rewrite_max_chars: 350,
            verbose_logging: false,
            schema: SchemaConfig::default(),
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            llm_temperature: 0.2,
        }
    }
}

impl Config {
    /// 按 默认值 → 配置文件 → 环境变量 的顺序加载配置
    pub fn load(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match config_file {
            Some(path) => Self::from_toml_file(path)?,
            None => Self::default(),
        };
        base.apply_overrides(|name| std::env::var(name).ok())
    }

    /// 从 TOML 文件读取配置，未出现的字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::TomlParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 只读取环境变量覆盖
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_overrides(|name| std::env::var(name).ok())
    }

    /// 使用给定的查找函数覆盖配置项
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        if let Some(v) = lookup("PATENT_CATEGORY") {
            self.category = v;
        }
        if let Some(v) = lookup("KNOWLEDGE_ROOT") {
            self.knowledge_root = v;
        }
        if let Some(v) = lookup("OUTPUT_ROOT") {
            self.output_root = v;
        }
        if let Some(v) = lookup("INDEX_PATH") {
            self.index_path = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "BATCH_SIZE")? {
            self.batch_size = v;
        }
        if let Some(v) = parse_var::<usize>(&lookup, "MAX_BATCHES")? {
            self.max_batches = batch_limit(v);
        }
        if let Some(v) = parse_var(&lookup, "MAX_CONCURRENCY")? {
            self.max_concurrency = v;
        }
        if let Some(v) = parse_var(&lookup, "PACING_SECS")? {
            self.pacing_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "COOLDOWN_SECS")? {
            self.cooldown_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "MAX_ATTEMPTS")? {
            self.max_attempts = v;
        }
        if let Some(v) = parse_var(&lookup, "RETRY_DELAY_SECS")? {
            self.retry_delay_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "REQUEST_TIMEOUT_SECS")? {
            self.request_timeout_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "VERBOSE_LOGGING")? {
            self.verbose_logging = v;
        }
        if let Some(v) = lookup("LLM_API_KEY") {
            self.llm_api_key = v;
        }
        if let Some(v) = lookup("LLM_API_BASE_URL") {
            self.llm_api_base_url = v;
        }
        if let Some(v) = lookup("LLM_MODEL_NAME") {
            self.llm_model_name = v;
        }
        Ok(self)
    }

    /// 检查配置值是否可用
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(invalid("batch_size", self.batch_size, "必须大于 0"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", self.max_attempts, "必须大于 0"));
        }
        if self.result_suffix.is_empty() {
            return Err(invalid("result_suffix", "", "不能为空"));
        }
        if self.rewrite_suffix.is_empty() || self.rewrite_suffix == self.result_suffix {
            return Err(invalid(
                "rewrite_suffix",
                &self.rewrite_suffix,
                "不能为空且不能与 result_suffix 相同",
            ));
        }
        if self.schema.identifier_field.is_empty() {
            return Err(invalid("schema.identifier_field", "", "不能为空"));
        }
        Ok(())
    }

    /// 索引文件路径
    pub fn index_path(&self) -> PathBuf {
        match &self.index_path {
            Some(path) => PathBuf::from(path),
            None => Path::new(&self.knowledge_root)
                .join(&self.category)
                .join(format!("{}.jsonl", self.category)),
        }
    }

    /// 当前类别的输出目录
    pub fn category_output_dir(&self) -> PathBuf {
        Path::new(&self.output_root).join(&self.category)
    }

    /// 汇编文件路径
    pub fn compiled_output_path(&self) -> PathBuf {
        self.category_output_dir()
            .join(format!("{}_output.jsonl", self.category))
    }

    /// 实际生效的批内并发上限
    pub fn effective_concurrency(&self) -> usize {
        if self.max_concurrency == 0 {
            self.batch_size.max(1)
        } else {
            self.max_concurrency
        }
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs(self.pacing_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 主流程使用的结果约束
    pub fn schema(&self) -> Schema {
        let mut schema = Schema::new(&self.schema.identifier_field);
        for spec in &self.schema.fields {
            let limit = match spec.max_chars {
                Some(max) => FieldLimit::Max(max),
                None => FieldLimit::Unlimited,
            };
            schema = schema.field(&spec.name, limit);
        }
        schema
    }

    /// 改写流程使用的结果约束：字段相同，上限统一为 `rewrite_max_chars`
    pub fn rewrite_schema(&self) -> Schema {
        let mut schema = Schema::new(&self.schema.identifier_field);
        for spec in &self.schema.fields {
            schema = schema.field(&spec.name, FieldLimit::Max(self.rewrite_max_chars));
        }
        schema
    }
}

/// 批次数上限：0 表示全部
pub fn batch_limit(max_batches: usize) -> Option<usize> {
    (max_batches > 0).then_some(max_batches)
}

fn deserialize_batch_limit<'de, D>(deserializer: D) -> Result<Option<usize>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<usize>::deserialize(deserializer)?.and_then(batch_limit))
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::EnvVarParseFailed {
                var_name: name.to_string(),
                value: raw.clone(),
                expected_type: std::any::type_name::<T>().to_string(),
            }),
    }
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
