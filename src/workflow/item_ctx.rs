//! 专利处理上下文
//!
//! 封装"我正在处理第几批的哪个专利"这一信息

use std::fmt::Display;

/// 专利处理上下文
#[derive(Debug, Clone)]
pub struct ItemCtx {
    /// 批次序号（从 0 开始，决定输出目录）
    pub batch_index: usize,

    /// 专利在整个列表中的位置（从 0 开始）
    pub position: usize,

    /// 专利标识
    pub identifier: String,
}

impl ItemCtx {
    pub fn new(batch_index: usize, position: usize, identifier: impl Into<String>) -> Self {
        Self {
            batch_index,
            position,
            identifier: identifier.into(),
        }
    }
}

impl Display for ItemCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[批次 {} 专利#{} {}]",
            self.batch_index + 1,
            self.position + 1,
            self.identifier
        )
    }
}
