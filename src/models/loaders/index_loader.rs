use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, SourceParseError};
use crate::models::work_item::{is_remote, WorkItem};

/// 索引文件中的一行
///
/// 同时兼容知识库索引（`publication_number` / `json_file_path` /
/// `pdf_file_path` / `image_file_paths`）和通用写法。
#[derive(Debug, Deserialize)]
struct IndexEntry {
    #[serde(alias = "publication_number")]
    identifier: Option<String>,
    #[serde(alias = "json_file_path")]
    document_path: Option<String>,
    #[serde(alias = "pdf_file_path")]
    raw_text_path: Option<String>,
    #[serde(alias = "image_file_paths")]
    attachments: Option<Vec<String>>,
    category: Option<String>,
}

/// 索引解析结果
#[derive(Debug, Default)]
pub struct IndexLoad {
    /// 按首次出现顺序排列的专利
    pub items: Vec<WorkItem>,
    /// 被跳过或被覆盖的行
    pub skipped: Vec<SourceParseError>,
}

/// 从索引文件加载所有待处理专利
///
/// 索引文件不存在属于配置错误；单行解析失败只记录警告。
pub async fn load_work_items(
    index_path: &Path,
    default_category: &str,
) -> Result<Vec<WorkItem>, ConfigError> {
    if !fs::try_exists(index_path).await.unwrap_or(false) {
        return Err(ConfigError::MissingPath {
            path: index_path.to_path_buf(),
        });
    }

    let content = fs::read_to_string(index_path)
        .await
        .map_err(|source| ConfigError::ReadFailed {
            path: index_path.to_path_buf(),
            source,
        })?;

    let load = parse_index(&content, default_category);
    for problem in &load.skipped {
        warn!("⚠️ 索引 {}: {}", index_path.display(), problem);
    }
    info!(
        "✓ 从 {} 加载 {} 个专利 (跳过 {} 行)",
        index_path.display(),
        load.items.len(),
        load.skipped.len()
    );

    Ok(load.items)
}

/// 解析索引内容
///
/// 重复的标识符：内容以最后一行为准，位置保留第一次出现的位置，
/// 这样批次划分不会因为重复行而整体偏移。
pub fn parse_index(content: &str, default_category: &str) -> IndexLoad {
    let mut load = IndexLoad::default();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (idx, line) in content.lines().enumerate() {
        let line_number = idx + 1;
        let entry = match parse_line(line, line_number) {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(e) => {
                load.skipped.push(e);
                continue;
            }
        };

        let item = match into_work_item(entry, line_number, default_category) {
            Ok(item) => item,
            Err(e) => {
                load.skipped.push(e);
                continue;
            }
        };

        match positions.get(&item.identifier) {
            Some(&position) => {
                load.skipped.push(SourceParseError::DuplicateIdentifier {
                    line: line_number,
                    identifier: item.identifier.clone(),
                });
                load.items[position] = item;
            }
            None => {
                positions.insert(item.identifier.clone(), load.items.len());
                load.items.push(item);
            }
        }
    }

    load
}

/// 读取索引中应当存在的所有标识符
///
/// 用于汇编阶段的差异报告。文件无法读取时返回空集合并记录警告。
pub async fn load_expected_identifiers(index_path: &Path) -> BTreeSet<String> {
    let content = match fs::read_to_string(index_path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(
                "⚠️ 无法读取索引文件 {}: {}，差异报告将为空",
                index_path.display(),
                e
            );
            return BTreeSet::new();
        }
    };

    let mut expected = BTreeSet::new();
    for (idx, line) in content.lines().enumerate() {
        match parse_line(line, idx + 1) {
            Ok(Some(entry)) => {
                if let Some(identifier) = entry.identifier {
                    expected.insert(identifier);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("⚠️ 索引 {}: {}", index_path.display(), e),
        }
    }

    debug!("索引中共有 {} 个标识符", expected.len());
    expected
}

/// 解析单行，空行返回 None；缺少标识符视为错误
fn parse_line(line: &str, line_number: usize) -> Result<Option<IndexEntry>, SourceParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut entry: IndexEntry =
        serde_json::from_str(line).map_err(|source| SourceParseError::MalformedLine {
            line: line_number,
            source,
        })?;

    entry.identifier = entry
        .identifier
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());

    if entry.identifier.is_none() {
        return Err(SourceParseError::MissingField {
            line: line_number,
            field: "identifier",
        });
    }

    Ok(Some(entry))
}

fn into_work_item(
    entry: IndexEntry,
    line_number: usize,
    default_category: &str,
) -> Result<WorkItem, SourceParseError> {
    let identifier = entry.identifier.unwrap_or_default();
    let document_path = entry
        .document_path
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .ok_or(SourceParseError::MissingField {
            line: line_number,
            field: "document_path",
        })?;

    let raw_text_path = entry
        .raw_text_path
        .map(PathBuf::from)
        .unwrap_or_else(|| document_path.with_extension("pdf"));

    let attachments = entry
        .attachments
        .unwrap_or_default()
        .into_iter()
        .map(PathBuf::from)
        .filter(|path| usable_attachment(&identifier, path))
        .collect();

    let category = entry
        .category
        .unwrap_or_else(|| default_category.to_string());

    Ok(WorkItem::new(identifier, category)
        .with_document(document_path)
        .with_raw_text(raw_text_path)
        .with_attachments(attachments))
}

/// 附件必须是远程 URL，或者存在的绝对路径
fn usable_attachment(identifier: &str, path: &Path) -> bool {
    if is_remote(path) {
        return true;
    }
    if !path.is_absolute() {
        warn!("[专利 {}] ⚠️ 图片路径不是绝对路径: {}", identifier, path.display());
        return false;
    }
    if !path.exists() {
        warn!("[专利 {}] ⚠️ 图片路径不存在: {}", identifier, path.display());
        return false;
    }
    true
}
