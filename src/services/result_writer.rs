//! 结果写入服务 - 业务能力层
//!
//! 只负责"把一个已校验结果写到磁盘"，不关心流程。
//! 输出位置：`<output_root>/<category>/<batch_index>/<identifier><suffix>`

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use crate::models::ValidatedResult;

/// 结果写入服务
///
/// 职责：
/// - 按 类别 / 批次 / 标识符 计算结果文件路径
/// - 先写临时文件再重命名，读者不会看到写了一半的文件
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_root: PathBuf,
    suffix: String,
}

impl ResultWriter {
    pub fn new(output_root: impl Into<PathBuf>, suffix: impl Into<String>) -> Self {
        Self {
            output_root: output_root.into(),
            suffix: suffix.into(),
        }
    }

    /// 批次输出目录
    pub fn batch_dir(&self, category: &str, batch_index: usize) -> PathBuf {
        self.output_root
            .join(category)
            .join(batch_index.to_string())
    }

    /// 单个结果文件路径
    pub fn result_path(&self, category: &str, batch_index: usize, identifier: &str) -> PathBuf {
        self.batch_dir(category, batch_index)
            .join(format!("{}{}", file_stem(identifier), self.suffix))
    }

    /// 写入一个已校验结果
    ///
    /// # 返回
    /// 返回写入的文件路径
    pub async fn write(
        &self,
        category: &str,
        batch_index: usize,
        result: &ValidatedResult,
    ) -> std::io::Result<PathBuf> {
        let path = self.result_path(category, batch_index, result.identifier());
        let content = serde_json::to_string_pretty(result)?;
        write_atomic(&path, content.as_bytes()).await?;
        debug!("[专利 {}] 结果已写入 {}", result.identifier(), path.display());
        Ok(path)
    }
}

/// 先写入同目录下的临时文件，再重命名到目标路径
pub async fn write_atomic(path: &Path, content: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    fs::write(&tmp_path, content).await?;
    if let Err(e) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}

/// 标识符 → 文件名
///
/// 路径分隔符和 `%` 本身按百分号编码，不同的标识符总是得到不同的文件名。
fn file_stem(identifier: &str) -> String {
    let mut stem = String::with_capacity(identifier.len());
    for c in identifier.chars() {
        match c {
            '%' => stem.push_str("%25"),
            '/' => stem.push_str("%2F"),
            '\\' => stem.push_str("%5C"),
            c => stem.push(c),
        }
    }
    stem
}
