use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{batch_limit, Config};

#[derive(Parser)]
#[command(name = "patent_batch")]
#[command(about = "专利 → 产品概念 批量处理工具", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "TOML 配置文件")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "显示调试日志")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "分批生成产品概念")]
    Run {
        #[arg(long, help = "专利类别（覆盖配置）")]
        category: Option<String>,

        #[arg(long, help = "每批数量")]
        batch_size: Option<usize>,

        #[arg(long, help = "最多处理的批次数，0 表示全部")]
        max_batches: Option<usize>,
    },

    #[command(about = "把单个结果汇编成 JSONL 数据集")]
    Compile {
        #[arg(long, help = "专利类别（覆盖配置）")]
        category: Option<String>,

        #[arg(long, help = "结果搜索目录")]
        search_root: Option<PathBuf>,

        #[arg(long, help = "索引文件")]
        index: Option<PathBuf>,

        #[arg(short, long, help = "汇编文件路径")]
        output: Option<PathBuf>,
    },

    #[command(about = "缩写已有结果")]
    Rewrite {
        #[arg(long, help = "专利类别（覆盖配置）")]
        category: Option<String>,

        #[arg(long, help = "结果搜索目录")]
        search_root: Option<PathBuf>,

        #[arg(long, help = "只改写该标识符")]
        target: Option<String>,
    },
}

impl Commands {
    /// 把命令行参数覆盖到配置上
    pub fn apply_to(&self, config: &mut Config) {
        match self {
            Commands::Run {
                category,
                batch_size,
                max_batches,
            } => {
                if let Some(category) = category {
                    config.category = category.clone();
                }
                if let Some(batch_size) = batch_size {
                    config.batch_size = *batch_size;
                }
                if let Some(max_batches) = max_batches {
                    config.max_batches = batch_limit(*max_batches);
                }
            }
            Commands::Compile { category, .. } | Commands::Rewrite { category, .. } => {
                if let Some(category) = category {
                    config.category = category.clone();
                }
            }
        }
    }
}
