use anyhow::{Context, Result};
use clap::Parser as _;
use tokio::sync::watch;
use tracing::{info, warn};

use patent_batch::cli::{Cli, Commands};
use patent_batch::utils::init_logger;
use patent_batch::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置：默认值 → 配置文件 → 环境变量 → 命令行
    let mut config = Config::load(cli.config.as_deref()).context("加载配置失败")?;
    cli.command.apply_to(&mut config);
    if cli.verbose {
        config.verbose_logging = true;
    }

    // 初始化日志
    init_logger(config.verbose_logging);

    let app = App::initialize(config)?;

    match cli.command {
        Commands::Run { .. } => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("🛑 收到 Ctrl-C，当前批次结束后停止");
                    let _ = shutdown_tx.send(true);
                }
            });

            let report = app.run(shutdown_rx).await?;
            if !report.failed_batches().is_empty() {
                warn!("💥 失败批次: {:?}", report.failed_batches());
            }
        }
        Commands::Compile {
            search_root,
            index,
            output,
            ..
        } => {
            let report = app.compile(search_root, index, output).await?;
            if let Some(path) = report.output_path {
                info!("\n数据集已保存至: {}", path.display());
            }
        }
        Commands::Rewrite {
            search_root,
            target,
            ..
        } => {
            app.rewrite(search_root, target.as_deref()).await?;
        }
    }

    Ok(())
}
