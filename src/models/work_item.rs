use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 一个待处理的专利
///
/// 由索引文件加载后不再修改，并发任务中以 clone 的方式传递。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// 唯一标识（专利公开号，如 `US-2020073983-A1`）
    pub identifier: String,
    /// 所属类别
    pub category: String,
    /// 主文档（专利 JSON 元数据）
    pub document_path: PathBuf,
    /// 原文来源（PDF 或提取出的文本）
    pub raw_text_path: Option<PathBuf>,
    /// 附件（页面图片）
    #[serde(default)]
    pub attachments: Vec<PathBuf>,
}

impl WorkItem {
    pub fn new(identifier: impl Into<String>, category: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let document_path = PathBuf::from(format!("{}.json", identifier));
        Self {
            identifier,
            category: category.into(),
            document_path,
            raw_text_path: None,
            attachments: Vec::new(),
        }
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>) -> Self {
        self.document_path = path.into();
        self
    }

    pub fn with_raw_text(mut self, path: impl Into<PathBuf>) -> Self {
        self.raw_text_path = Some(path.into());
        self
    }

    pub fn with_attachments(mut self, paths: Vec<PathBuf>) -> Self {
        self.attachments = paths;
        self
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.identifier, self.category)
    }
}

/// 附件是否是远程图片（http / https URL）
pub fn is_remote(path: &Path) -> bool {
    path.to_str()
        .is_some_and(|p| p.starts_with("http://") || p.starts_with("https://"))
}

/// 一个批次：工作列表中连续的一段
///
/// 位置 i 的专利属于第 ⌊i / batch_size⌋ 批。
#[derive(Debug, Clone, Copy)]
pub struct Batch<'a> {
    /// 批次序号（从 0 开始，用于输出目录）
    pub index: usize,
    /// 本批第一个专利在整个列表中的位置
    pub offset: usize,
    pub items: &'a [WorkItem],
}

impl<'a> Batch<'a> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// 将工作列表按固定大小切分为批次
///
/// `batch_size` 必须大于 0，由 `Config::validate` 保证。
pub fn partition(items: &[WorkItem], batch_size: usize) -> Vec<Batch<'_>> {
    let batch_size = batch_size.max(1);
    items
        .chunks(batch_size)
        .enumerate()
        .map(|(index, chunk)| Batch {
            index,
            offset: index * batch_size,
            items: chunk,
        })
        .collect()
}
