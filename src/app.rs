//! 应用装配
//!
//! 把配置转换成具体的组件（模型客户端、执行器、校验器、调度器），
//! 供命令行的三个子命令使用。核心模块只接收这里构造好的值。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;
use crate::infrastructure::{LlmPipelineExecutor, LlmRewriter};
use crate::models::load_work_items;
use crate::orchestrator::{
    BatchScheduler, CompileReport, ResultCompiler, ResultRewriter, RewriteReport, RunReport,
    SchedulerOptions,
};
use crate::services::{LlmService, ResultValidator};
use crate::utils::logging::log_startup;

/// 应用主结构
pub struct App {
    config: Config,
}

impl App {
    /// 初始化应用，配置不合法时直接返回错误
    pub fn initialize(config: Config) -> Result<Self> {
        config.validate().context("配置检查失败")?;
        Ok(Self { config })
    }

    /// 分批生成产品概念
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<RunReport> {
        let config = &self.config;
        log_startup(
            &config.category,
            config.batch_size,
            config.effective_concurrency(),
        );

        info!("\n📁 正在读取索引文件...");
        let items = load_work_items(&config.index_path(), &config.category)
            .await
            .context("加载专利列表失败")?;

        if items.is_empty() {
            warn!("⚠️ 索引中没有待处理的专利，程序结束");
            return Ok(RunReport::default());
        }

        if config.llm_api_key.is_empty() {
            warn!("⚠️ 未设置 LLM_API_KEY，模型调用可能会失败");
        }

        let llm = Arc::new(LlmService::new(config));
        let executor = Arc::new(LlmPipelineExecutor::new(
            llm,
            config.schema(),
            config.request_timeout(),
        ));
        let scheduler = BatchScheduler::new(
            executor,
            ResultValidator::new(config.schema()),
            SchedulerOptions::from_config(config),
        )
        .with_shutdown(shutdown);

        Ok(scheduler
            .run_batches(
                &items,
                config.batch_size,
                config.max_batches,
                Path::new(&config.output_root),
            )
            .await)
    }

    /// 汇编当前类别的结果
    ///
    /// 未给出的路径使用配置中的默认位置。
    pub async fn compile(
        &self,
        search_root: Option<PathBuf>,
        index_path: Option<PathBuf>,
        output_path: Option<PathBuf>,
    ) -> Result<CompileReport> {
        let config = &self.config;
        let search_root = search_root.unwrap_or_else(|| config.category_output_dir());
        let index_path = index_path.unwrap_or_else(|| config.index_path());
        let output_path = output_path.unwrap_or_else(|| config.compiled_output_path());

        info!(
            "🧩 汇编 {} → {}",
            search_root.display(),
            output_path.display()
        );

        ResultCompiler::new(ResultValidator::new(config.schema()), &config.result_suffix)
            .compile(&search_root, Some(index_path.as_path()), &output_path)
            .await
            .with_context(|| format!("汇编 {} 失败", search_root.display()))
    }

    /// 缩写当前类别的结果
    pub async fn rewrite(
        &self,
        search_root: Option<PathBuf>,
        target: Option<&str>,
    ) -> Result<RewriteReport> {
        let config = &self.config;
        let search_root = search_root.unwrap_or_else(|| config.category_output_dir());

        let llm = Arc::new(LlmService::new(config));
        let rewriter = Arc::new(LlmRewriter::new(
            llm,
            config.rewrite_schema(),
            config.request_timeout(),
        ));

        ResultRewriter::new(
            rewriter,
            ResultValidator::new(config.schema()),
            ResultValidator::new(config.rewrite_schema()),
        )
        .with_suffixes(&config.result_suffix, &config.rewrite_suffix)
        .with_max_attempts(config.max_attempts)
        .rewrite_all(&search_root, target)
        .await
        .with_context(|| format!("改写 {} 失败", search_root.display()))
    }
}
