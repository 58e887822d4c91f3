//! 结果改写处理器 - 编排层
//!
//! 对已经生成的结果做第二遍处理：交给改写器缩短每个字段，
//! 用更严格的约束（护栏）检查改写结果，不通过就重试，
//! 最终写到输入文件旁边、带改写后缀的文件中。
//!
//! 单个文件的失败只记录，不影响其他文件；搜索目录不存在时报错。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::error::CompileIoError;
use crate::infrastructure::RecordRewriter;
use crate::models::ValidatedResult;
use crate::orchestrator::result_compiler::{discover_result_files, read_record};
use crate::services::result_writer::write_atomic;
use crate::services::ResultValidator;

/// 改写报告
#[derive(Debug, Default)]
pub struct RewriteReport {
    /// 找到的输入文件数量
    pub discovered: usize,
    /// 改写成功后写出的文件
    pub rewritten: Vec<PathBuf>,
    /// 输入文件本身无法读取或未通过校验
    pub skipped: usize,
    /// 改写失败的标识符及原因
    pub failed: Vec<(String, String)>,
}

/// 结果改写处理器
pub struct ResultRewriter {
    rewriter: Arc<dyn RecordRewriter>,
    input_validator: ResultValidator,
    guardrail: ResultValidator,
    input_suffix: String,
    output_suffix: String,
    max_attempts: usize,
}

impl ResultRewriter {
    /// # 参数
    /// - `input_validator`: 输入文件的约束
    /// - `guardrail`: 改写结果的约束
    pub fn new(
        rewriter: Arc<dyn RecordRewriter>,
        input_validator: ResultValidator,
        guardrail: ResultValidator,
    ) -> Self {
        Self {
            rewriter,
            input_validator,
            guardrail,
            input_suffix: "_output.json".to_string(),
            output_suffix: "_output_short.json".to_string(),
            max_attempts: 3,
        }
    }

    pub fn with_suffixes(
        mut self,
        input_suffix: impl Into<String>,
        output_suffix: impl Into<String>,
    ) -> Self {
        self.input_suffix = input_suffix.into();
        self.output_suffix = output_suffix.into();
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// 改写目录下的所有结果
    ///
    /// # 参数
    /// - `search_root`: 递归查找输入文件的根目录
    /// - `target`: 只改写该标识符对应的结果
    pub async fn rewrite_all(
        &self,
        search_root: &Path,
        target: Option<&str>,
    ) -> Result<RewriteReport, CompileIoError> {
        let files = discover_result_files(search_root, &self.input_suffix)?;
        let mut report = RewriteReport {
            discovered: files.len(),
            ..Default::default()
        };
        let mut matched = false;

        for path in files {
            let record = match read_record(&path).await {
                Ok(fields) => match self.input_validator.validate(fields) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!("🚫 {} 未通过校验，跳过: {}", path.display(), e);
                        report.skipped += 1;
                        continue;
                    }
                },
                Err(e) => {
                    warn!("⚠️ {}，跳过", e);
                    report.skipped += 1;
                    continue;
                }
            };

            if target.is_some_and(|t| t != record.identifier()) {
                continue;
            }
            matched = true;

            let identifier = record.identifier().to_string();
            match self.rewrite_one(&record).await {
                Ok(short) => {
                    let output = self.output_path(&path);
                    let written = match serde_json::to_string_pretty(&short) {
                        Ok(content) => write_atomic(&output, content.as_bytes()).await,
                        Err(e) => Err(e.into()),
                    };
                    match written {
                        Ok(()) => {
                            info!("[专利 {}] ✓ 改写结果已保存: {}", identifier, output.display());
                            report.rewritten.push(output);
                        }
                        Err(e) => {
                            error!("[专利 {}] ❌ 改写结果写入失败: {}", identifier, e);
                            report.failed.push((identifier, e.to_string()));
                        }
                    }
                }
                Err(reason) => {
                    error!("[专利 {}] ❌ 改写失败: {}", identifier, reason);
                    report.failed.push((identifier, reason));
                }
            }
        }

        if let Some(target) = target {
            if !matched {
                warn!("⚠️ 没有找到标识符为 {} 的结果", target);
            }
        }

        info!(
            "📊 改写完成: 成功 {} / 失败 {} / 跳过 {}",
            report.rewritten.len(),
            report.failed.len(),
            report.skipped
        );
        Ok(report)
    }

    /// 改写一个结果，执行失败或护栏不通过都会重试
    async fn rewrite_one(&self, record: &ValidatedResult) -> Result<ValidatedResult, String> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.rewriter.rewrite(record).await {
                Ok(raw) => match self.guardrail.validate_raw(raw) {
                    Ok(short) => return Ok(short),
                    Err(e) => {
                        warn!(
                            "[专利 {}] ⚠️ 第 {}/{} 次改写未通过检查: {}",
                            record.identifier(),
                            attempt,
                            self.max_attempts,
                            e
                        );
                        last_error = e.to_string();
                    }
                },
                Err(e) if !e.is_recoverable() => return Err(e.to_string()),
                Err(e) => {
                    warn!(
                        "[专利 {}] ⚠️ 第 {}/{} 次改写失败: {}",
                        record.identifier(),
                        attempt,
                        self.max_attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(last_error)
    }

    /// 输入文件旁边的改写文件路径
    fn output_path(&self, input: &Path) -> PathBuf {
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let stem = name.strip_suffix(&self.input_suffix).unwrap_or(&name);
        input.with_file_name(format!("{}{}", stem, self.output_suffix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FieldLimit, Schema};

    struct Unused;

    #[async_trait::async_trait]
    impl RecordRewriter for Unused {
        async fn rewrite(
            &self,
            _record: &ValidatedResult,
        ) -> Result<crate::models::RawResult, crate::error::ExecutionError> {
            Err(crate::error::ExecutionError::Unrecoverable("unused".into()))
        }
    }

    #[test]
    fn test_output_path_replaces_suffix() {
        let validator = ResultValidator::new(Schema::new("id").field("title", FieldLimit::Max(10)));
        let rewriter = ResultRewriter::new(Arc::new(Unused), validator.clone(), validator);

        assert_eq!(
            rewriter.output_path(Path::new("output/nlp/0/US-1_output.json")),
            PathBuf::from("output/nlp/0/US-1_output_short.json")
        );
    }
}
