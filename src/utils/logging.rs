//! 日志工具模块
//!
//! 提供日志初始化和格式化输出的辅助函数

use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// 优先使用 `RUST_LOG`，否则根据 `verbose` 选择 `debug` 或 `info`。
/// 重复初始化（例如测试中）会被忽略。
pub fn init_logger(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
///
/// # 参数
/// - `category`: 专利类别
/// - `batch_size`: 每批数量
/// - `max_concurrent`: 批内最大并发数
pub fn log_startup(category: &str, batch_size: usize, max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 专利批量处理模式");
    info!("📂 类别: {}", category);
    info!("📊 每批数量: {} | 最大并发数: {}", batch_size, max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录专利加载信息
///
/// # 参数
/// - `total`: 专利总数
/// - `total_batches`: 批次总数
/// - `planned_batches`: 本次计划处理的批次数
pub fn log_items_loaded(total: usize, total_batches: usize, planned_batches: usize) {
    info!("✓ 找到 {} 个待处理的专利，共 {} 批", total, total_batches);
    if planned_batches < total_batches {
        info!("📋 本次只处理前 {} 批", planned_batches);
    }
    info!("💡 每批完成后再开始下一批\n");
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号（从 1 开始）
/// - `total_batches`: 批次总数
/// - `start`: 起始专利编号
/// - `end`: 结束专利编号
/// - `total`: 专利总数
pub fn log_batch_start(
    batch_num: usize,
    total_batches: usize,
    start: usize,
    end: usize,
    total: usize,
) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批", batch_num, total_batches);
    info!("📄 本批专利: {}-{} / 共 {} 个", start, end, total);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
///
/// # 参数
/// - `batch_num`: 批次编号（从 1 开始）
/// - `validated`: 通过校验的数量
/// - `attempted`: 本批数量
/// - `elapsed`: 批次耗时
pub fn log_batch_complete(batch_num: usize, validated: usize, attempted: usize, elapsed: Duration) {
    let average = if attempted > 0 {
        elapsed.as_secs_f64() / attempted as f64
    } else {
        0.0
    };
    info!("\n{}", "─".repeat(60));
    info!("✓ 第 {} 批完成: 成功 {}/{}", batch_num, validated, attempted);
    info!(
        "⏱️ 耗时 {:.2} 秒，平均每个专利 {:.2} 秒",
        elapsed.as_secs_f64(),
        average
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `attempted`: 尝试数量
/// - `validated`: 成功数量
/// - `rejected`: 校验未通过数量
/// - `failed`: 执行失败数量
/// - `failed_batches`: 失败的批次数
pub fn print_final_stats(
    attempted: usize,
    validated: usize,
    rejected: usize,
    failed: usize,
    failed_batches: usize,
) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", validated, attempted);
    info!("🚫 校验未通过: {}", rejected);
    info!("❌ 执行失败: {}", failed);
    if failed_batches > 0 {
        info!("💥 失败批次: {}", failed_batches);
    }
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（字符数）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
