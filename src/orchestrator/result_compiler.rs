//! 结果汇编器 - 编排层
//!
//! ## 职责
//!
//! 把散落在各批次目录中的单个结果文件汇编成一个 JSONL 数据集：
//!
//! 1. 读取索引中的期望标识符（读取失败只告警）
//! 2. 递归查找结果文件（按路径排序，纯数字的批次目录按数值排序）
//! 3. 解析并重新校验（JSON 损坏与校验不通过分别统计）
//! 4. 按标识符去重（排序靠后的文件覆盖靠前的）
//! 5. 按标识符排序写出 JSONL（临时文件 + 重命名）
//! 6. 计算 缺失 / 多余 的标识符
//!
//! 每次都完整重建，重复运行得到字节相同的输出；没有有效记录时删除旧的汇编文件。

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CompileIoError, ValidationError};
use crate::models::{load_expected_identifiers, FieldMap, ValidatedResult};
use crate::services::result_writer::write_atomic;
use crate::services::ResultValidator;

/// 汇编报告
#[derive(Debug, Default)]
pub struct CompileReport {
    /// 写出的汇编文件，没有有效记录时为 `None`
    pub output_path: Option<PathBuf>,
    /// 找到的结果文件数量
    pub discovered: usize,
    /// 写入汇编文件的记录数
    pub compiled: usize,
    /// 读取失败或不是合法 JSON 对象的文件
    pub malformed: Vec<CompileIoError>,
    /// 没有通过重新校验的文件
    pub rejected: Vec<(PathBuf, ValidationError)>,
    /// 被后出现的文件覆盖的重复记录数
    pub duplicates: usize,
    /// 索引中有但没有产出的标识符
    pub missing: BTreeSet<String>,
    /// 产出了但索引中没有的标识符
    pub unexpected: BTreeSet<String>,
}

/// 结果汇编器
pub struct ResultCompiler {
    validator: ResultValidator,
    suffix: String,
}

impl ResultCompiler {
    pub fn new(validator: ResultValidator, suffix: impl Into<String>) -> Self {
        Self {
            validator,
            suffix: suffix.into(),
        }
    }

    /// 汇编结果
    ///
    /// # 参数
    /// - `search_root`: 递归查找结果文件的根目录
    /// - `index_path`: 索引文件，`None` 时不计算差异
    /// - `output_path`: 汇编文件路径
    ///
    /// # 返回
    /// 只有搜索目录不存在或汇编文件写入失败时返回错误
    pub async fn compile(
        &self,
        search_root: &Path,
        index_path: Option<&Path>,
        output_path: &Path,
    ) -> Result<CompileReport, CompileIoError> {
        let expected = match index_path {
            Some(path) => Some(load_expected_identifiers(path).await),
            None => None,
        };

        let files = discover_result_files(search_root, &self.suffix)?;
        info!(
            "📁 在 {} 中找到 {} 个结果文件",
            search_root.display(),
            files.len()
        );

        let mut report = CompileReport {
            discovered: files.len(),
            ..Default::default()
        };
        let mut records: BTreeMap<String, ValidatedResult> = BTreeMap::new();

        for path in files {
            let fields = match read_record(&path).await {
                Ok(fields) => fields,
                Err(e) => {
                    warn!("⚠️ {}", e);
                    report.malformed.push(e);
                    continue;
                }
            };

            match self.validator.validate(fields) {
                Ok(record) => {
                    let identifier = record.identifier().to_string();
                    if records.insert(identifier.clone(), record).is_some() {
                        warn!(
                            "⚠️ 标识符 {} 重复，使用 {} 中的记录",
                            identifier,
                            path.display()
                        );
                        report.duplicates += 1;
                    }
                }
                Err(e) => {
                    warn!("🚫 {} 未通过校验: {}", path.display(), e);
                    report.rejected.push((path, e));
                }
            }
        }

        if let Some(expected) = &expected {
            let produced: BTreeSet<String> = records.keys().cloned().collect();
            report.missing = expected.difference(&produced).cloned().collect();
            report.unexpected = produced.difference(expected).cloned().collect();
        }

        report.compiled = records.len();

        if records.is_empty() {
            warn!("⚠️ 没有任何有效记录，不写入汇编文件");
            remove_stale_output(output_path).await?;
        } else {
            let mut content = String::new();
            for record in records.values() {
                let line = serde_json::to_string(record).map_err(|e| CompileIoError::WriteFailed {
                    path: output_path.to_path_buf(),
                    source: e.into(),
                })?;
                content.push_str(&line);
                content.push('\n');
            }

            write_atomic(output_path, content.as_bytes())
                .await
                .map_err(|source| CompileIoError::WriteFailed {
                    path: output_path.to_path_buf(),
                    source,
                })?;
            info!(
                "✓ 已汇编 {} 条记录到 {}",
                report.compiled,
                output_path.display()
            );
            report.output_path = Some(output_path.to_path_buf());
        }

        log_compile_summary(&report, expected.is_some());
        Ok(report)
    }
}

/// 递归查找以 `suffix` 结尾的文件，按路径排序
pub(crate) fn discover_result_files(
    search_root: &Path,
    suffix: &str,
) -> Result<Vec<PathBuf>, CompileIoError> {
    if !search_root.is_dir() {
        return Err(CompileIoError::SearchRootMissing {
            path: search_root.to_path_buf(),
        });
    }

    let mut files: Vec<PathBuf> = WalkDir::new(search_root)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("⚠️ 无法访问: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(suffix))
        .map(|entry| entry.into_path())
        .collect();

    files.sort_by_cached_key(|path| path_sort_key(path));
    debug!("找到 {} 个 *{} 文件", files.len(), suffix);
    Ok(files)
}

/// 路径中的一级：纯数字的部分排在前面并按数值比较
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey {
    Number(u64, OsString),
    Text(OsString),
}

fn path_sort_key(path: &Path) -> Vec<SortKey> {
    path.components()
        .map(|component| {
            let part = component.as_os_str();
            let number = part
                .to_str()
                .filter(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|s| s.parse().ok());
            match number {
                Some(n) => SortKey::Number(n, part.to_os_string()),
                None => SortKey::Text(part.to_os_string()),
            }
        })
        .collect()
}

/// 删除上一次留下的汇编文件
async fn remove_stale_output(output_path: &Path) -> Result<(), CompileIoError> {
    match fs::remove_file(output_path).await {
        Ok(()) => {
            warn!("🗑️ 已删除过期的汇编文件 {}", output_path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CompileIoError::WriteFailed {
            path: output_path.to_path_buf(),
            source,
        }),
    }
}

/// 读取一个结果文件，必须是 JSON 对象
pub(crate) async fn read_record(path: &Path) -> Result<FieldMap, CompileIoError> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| CompileIoError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;

    match serde_json::from_str::<JsonValue>(&content) {
        Ok(JsonValue::Object(fields)) => Ok(fields),
        Ok(_) => Err(CompileIoError::MalformedJson {
            path: path.to_path_buf(),
            reason: "顶层不是 JSON 对象".to_string(),
        }),
        Err(e) => Err(CompileIoError::MalformedJson {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

// ========== 日志辅助函数 ==========

fn log_compile_summary(report: &CompileReport, with_index: bool) {
    info!("\n{}", "=".repeat(60));
    info!("📊 汇编统计");
    info!("{}", "=".repeat(60));
    info!("📄 结果文件: {}", report.discovered);
    info!("✅ 有效记录: {}", report.compiled);
    info!("💔 JSON 损坏: {}", report.malformed.len());
    info!("🚫 校验未通过: {}", report.rejected.len());
    if report.duplicates > 0 {
        info!("🔁 重复记录: {}", report.duplicates);
    }
    if with_index {
        info!("❓ 缺失: {}", report.missing.len());
        for identifier in &report.missing {
            warn!("   缺失: {}", identifier);
        }
        info!("➕ 多余: {}", report.unexpected.len());
        for identifier in &report.unexpected {
            warn!("   多余: {}", identifier);
        }
    }
    info!("{}", "=".repeat(60));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{FieldLimit, Schema};
    use serde_json::json;
    use tempfile::TempDir;

    fn compiler() -> ResultCompiler {
        ResultCompiler::new(
            ResultValidator::new(Schema::new("id").field("title", FieldLimit::Max(10))),
            "_output.json",
        )
    }

    fn put(root: &Path, relative: &str, value: serde_json::Value) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_missing_search_root_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = compiler()
            .compile(&dir.path().join("absent"), None, &dir.path().join("out.jsonl"))
            .await
            .unwrap_err();
        assert!(matches!(err, CompileIoError::SearchRootMissing { .. }));
    }

    #[tokio::test]
    async fn test_malformed_and_rejected_are_counted_separately() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nlp");
        put(&root, "0/B_output.json", json!({"id": "B", "title": "b"}));
        put(&root, "0/C_output.json", json!({"id": "C", "title": "far too long title"}));
        put(&root, "1/D_output.json", json!(["not", "an", "object"]));
        std::fs::write(root.join("1/E_output.json"), "{ broken").unwrap();
        put(&root, "1/F_output_short.json", json!({"id": "F", "title": "f"}));

        let output = root.join("nlp_output.jsonl");
        let report = compiler().compile(&root, None, &output).await.unwrap();

        assert_eq!(report.discovered, 4);
        assert_eq!(report.compiled, 1);
        assert_eq!(report.malformed.len(), 2);
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(std::fs::read_to_string(output).unwrap().lines().count(), 1);
    }

    #[tokio::test]
    async fn test_later_path_wins_for_duplicate_identifier() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nlp");
        put(&root, "0/A_output.json", json!({"id": "A", "title": "first"}));
        put(&root, "1/A_output.json", json!({"id": "A", "title": "second"}));

        let output = root.join("nlp_output.jsonl");
        let report = compiler().compile(&root, None, &output).await.unwrap();

        assert_eq!(report.duplicates, 1);
        let content = std::fs::read_to_string(output).unwrap();
        assert_eq!(content.lines().count(), 1);
        assert!(content.contains("second"));
    }

    #[tokio::test]
    async fn test_batch_directories_sort_numerically() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nlp");
        put(&root, "10/A_output.json", json!({"id": "A", "title": "ten"}));
        put(&root, "9/A_output.json", json!({"id": "A", "title": "nine"}));
        put(&root, "2/B_output.json", json!({"id": "B", "title": "two"}));

        let files = discover_result_files(&root, "_output.json").unwrap();
        assert_eq!(
            files,
            vec![
                root.join("2/B_output.json"),
                root.join("9/A_output.json"),
                root.join("10/A_output.json"),
            ]
        );

        let output = root.join("nlp_output.jsonl");
        compiler().compile(&root, None, &output).await.unwrap();
        let content = std::fs::read_to_string(output).unwrap();
        assert!(content.contains("ten"));
        assert!(!content.contains("nine"));
    }

    #[tokio::test]
    async fn test_stale_output_removed_when_nothing_valid() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nlp");
        put(&root, "0/A_output.json", json!({"id": "A", "title": "a"}));
        let output = root.join("nlp_output.jsonl");

        let first = compiler().compile(&root, None, &output).await.unwrap();
        assert_eq!(first.compiled, 1);
        assert!(output.exists());

        std::fs::remove_file(root.join("0/A_output.json")).unwrap();
        let second = compiler().compile(&root, None, &output).await.unwrap();

        assert_eq!(second.compiled, 0);
        assert!(second.output_path.is_none());
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_nothing_written_without_valid_records() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nlp");
        put(&root, "0/A_output.json", json!({"title": "no id"}));

        let output = root.join("nlp_output.jsonl");
        let report = compiler().compile(&root, None, &output).await.unwrap();

        assert_eq!(report.compiled, 0);
        assert!(report.output_path.is_none());
        assert!(!output.exists());
    }
}
