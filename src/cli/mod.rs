use crate::config::{Config, DocStyle};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// 默认配置文件名，位于当前工作目录
pub const DEFAULT_CONFIG_FILE: &str = "docagent.toml";

/// docagent - 由多Agent流水线驱动的代码文档生成引擎
#[derive(Parser, Debug)]
#[command(name = "docagent")]
#[command(
    about = "Agent-based documentation generator. Runs Reader, Searcher, Writer, Verifier and Diagram agents over a single source file or a whole repository, with cloud, local and offline inference fallback."
)]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// 配置文件路径
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// 输出路径：file模式为JSON文件，repo模式为输出目录
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    /// 云端推理API KEY
    #[arg(long, global = true)]
    pub cloud_api_key: Option<String>,

    /// 云端推理API基地址
    #[arg(long, global = true)]
    pub cloud_base_url: Option<String>,

    /// 本地推理服务（Ollama）基地址
    #[arg(long, global = true)]
    pub local_base_url: Option<String>,

    /// 温度参数
    #[arg(long, global = true)]
    pub temperature: Option<f64>,

    /// 同一任务内最多并行处理的文件数
    #[arg(long, global = true)]
    pub max_parallel_files: Option<usize>,

    /// 是否禁用缓存
    #[arg(long, global = true)]
    pub no_cache: bool,

    /// 是否启用详细日志
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// 为单个源码文件生成文档，输出合并后的JSON记录
    File {
        /// 源码文件路径
        path: PathBuf,

        /// 源码语言，默认按扩展名识别
        #[arg(short, long)]
        language: Option<String>,

        /// 文档风格 (google, numpy, sphinx, jsdoc)
        #[arg(short, long)]
        style: Option<DocStyle>,

        /// Diagram Agent的首选图表类型，如 sequenceDiagram
        #[arg(long)]
        diagram_type: Option<String>,
    },
    /// 为整个项目目录生成文档
    Repo {
        /// 项目目录
        #[arg(default_value = ".")]
        dir: PathBuf,

        /// 项目名称，默认使用目录名
        #[arg(short, long)]
        name: Option<String>,
    },
}

impl Args {
    /// 加载配置文件并用命令行参数覆盖
    pub fn build_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            // 显式指定的配置文件必须可读
            Some(config_path) => Config::from_file(config_path)?,
            None => {
                let default_config_path = std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(DEFAULT_CONFIG_FILE);

                if default_config_path.exists() {
                    Config::from_file(&default_config_path)?
                } else {
                    Config::default()
                }
            }
        };

        self.apply_overrides(&mut config);
        Ok(config)
    }

    /// 命令行参数优先级高于配置文件
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }

        if let Some(cloud_api_key) = &self.cloud_api_key {
            config.inference.cloud_api_key = cloud_api_key.clone();
        }
        if let Some(cloud_base_url) = &self.cloud_base_url {
            config.inference.cloud_api_base_url = cloud_base_url.clone();
        }
        if let Some(local_base_url) = &self.local_base_url {
            config.inference.local_api_base_url = local_base_url.clone();
        }
        if let Some(temperature) = self.temperature {
            config.inference.temperature = temperature;
        }
        if let Some(max_parallel_files) = self.max_parallel_files {
            config.pipeline.max_parallel_files = max_parallel_files.max(1);
        }

        match &self.command {
            Command::File {
                style: Some(style), ..
            } => config.pipeline.doc_style = *style,
            Command::Repo {
                name: Some(name), ..
            } => config.project_name = Some(name.clone()),
            _ => {}
        }

        if self.no_cache {
            config.cache.enabled = false;
        }
        config.verbose = self.verbose;
    }
}
