use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;

use crate::generator::agents::AgentType;

/// 文档风格
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum DocStyle {
    #[serde(rename = "google")]
    #[default]
    Google,
    #[serde(rename = "numpy")]
    Numpy,
    #[serde(rename = "sphinx")]
    Sphinx,
    #[serde(rename = "jsdoc")]
    JsDoc,
}

impl std::fmt::Display for DocStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocStyle::Google => write!(f, "google"),
            DocStyle::Numpy => write!(f, "numpy"),
            DocStyle::Sphinx => write!(f, "sphinx"),
            DocStyle::JsDoc => write!(f, "jsdoc"),
        }
    }
}

impl std::str::FromStr for DocStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "google" => Ok(DocStyle::Google),
            "numpy" => Ok(DocStyle::Numpy),
            "sphinx" | "rst" => Ok(DocStyle::Sphinx),
            "jsdoc" => Ok(DocStyle::JsDoc),
            _ => Err(format!("Unknown doc style: {}", s)),
        }
    }
}

impl DocStyle {
    /// 写入Writer系统提示词的风格说明
    pub fn style_guide(&self) -> &'static str {
        match self {
            DocStyle::Google => "Google style docstrings with Args, Returns, Raises sections",
            DocStyle::Numpy => "NumPy style with Parameters, Returns, Examples sections",
            DocStyle::Sphinx => "Sphinx/reStructuredText format",
            DocStyle::JsDoc => "JSDoc format for JavaScript/TypeScript",
        }
    }
}

/// 应用程序配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct Config {
    /// 项目名称，为空时从项目路径推断
    pub project_name: Option<String>,

    /// 输出路径
    pub output_path: PathBuf,

    /// 推理后端配置
    pub inference: InferenceConfig,

    /// 流水线配置
    pub pipeline: PipelineConfig,

    /// 缓存配置
    pub cache: CacheConfig,

    /// 是否启用详细日志
    pub verbose: bool,
}

/// 推理后端配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    /// 云端推理API基地址
    pub cloud_api_base_url: String,

    /// 云端推理API KEY，为空时跳过云端
    pub cloud_api_key: String,

    /// 本地推理服务基地址（Ollama）
    pub local_api_base_url: String,

    /// 单次HTTP请求超时时间（秒）
    pub request_timeout_seconds: u64,

    /// 本地服务存活探测超时时间（秒）
    pub local_probe_timeout_seconds: u64,

    /// 遇到429时的额外重试次数
    pub rate_limit_retries: u32,

    /// 429退避基数（秒），第n次重试前等待 n × backoff
    pub rate_limit_backoff_seconds: u64,

    /// 温度
    pub temperature: f64,

    /// 各Agent使用的模型
    pub models: AgentModels,
}

/// 单个Agent的模型设置
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AgentModelConfig {
    pub model_id: String,
    pub max_tokens: u32,
}

impl AgentModelConfig {
    fn new(model_id: &str, max_tokens: u32) -> Self {
        Self {
            model_id: model_id.to_string(),
            max_tokens,
        }
    }
}

/// 五个Agent的模型表
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct AgentModels {
    pub reader: AgentModelConfig,
    pub searcher: AgentModelConfig,
    pub writer: AgentModelConfig,
    pub verifier: AgentModelConfig,
    pub diagram: AgentModelConfig,
}

impl AgentModels {
    pub fn for_agent(&self, agent: AgentType) -> &AgentModelConfig {
        match agent {
            AgentType::Reader => &self.reader,
            AgentType::Searcher => &self.searcher,
            AgentType::Writer => &self.writer,
            AgentType::Verifier => &self.verifier,
            AgentType::Diagram => &self.diagram,
        }
    }
}

/// 流水线配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// 文档风格
    pub doc_style: DocStyle,

    /// 同一任务内并行处理的文件数上限，1表示严格串行
    pub max_parallel_files: usize,

    /// 单个任务最多处理的源码文件数
    pub max_files: usize,

    /// 最大文件大小限制（字节）
    pub max_file_size: u64,

    /// 只包含指定的文件扩展名，为空时使用内置的源码扩展名表
    pub included_extensions: Vec<String>,

    /// 要排除的目录
    pub excluded_dirs: Vec<String>,

    /// 要排除的文件（glob）
    pub excluded_files: Vec<String>,
}

/// 缓存配置
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    /// 是否启用缓存
    pub enabled: bool,

    /// 缓存目录
    pub cache_dir: PathBuf,

    /// 缓存过期时间（小时）
    pub expire_hours: u64,
}

impl Config {
    /// 从文件加载配置
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let mut file =
            File::open(path).context(format!("Failed to open config file: {:?}", path))?;
        let mut content = String::new();
        file.read_to_string(&mut content)
            .context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// 获取项目名称，优先使用配置的project_name，否则使用给定路径的目录名
    pub fn get_project_name(&self, project_path: &std::path::Path) -> String {
        if let Some(ref name) = self.project_name {
            if !name.trim().is_empty() {
                return name.clone();
            }
        }

        project_path
            .canonicalize()
            .unwrap_or_else(|_| project_path.to_path_buf())
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "repository".to_string())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_name: None,
            output_path: PathBuf::from("./docagent.docs"),
            inference: InferenceConfig::default(),
            pipeline: PipelineConfig::default(),
            cache: CacheConfig::default(),
            verbose: false,
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            cloud_api_base_url: String::from("https://api.bytez.com/models/v2"),
            cloud_api_key: std::env::var("DOCAGENT_CLOUD_API_KEY")
                .or_else(|_| std::env::var("BYTEZ_API_KEY"))
                .unwrap_or_default(),
            local_api_base_url: String::from("http://localhost:11434"),
            request_timeout_seconds: 120,
            local_probe_timeout_seconds: 5,
            rate_limit_retries: 2,
            rate_limit_backoff_seconds: 5,
            temperature: 0.5,
            models: AgentModels::default(),
        }
    }
}

impl Default for AgentModels {
    fn default() -> Self {
        Self {
            reader: AgentModelConfig::new("Qwen/Qwen2.5-Coder-7B-Instruct", 500),
            searcher: AgentModelConfig::new("Qwen/Qwen2.5-Coder-7B-Instruct", 500),
            writer: AgentModelConfig::new("Qwen/Qwen2.5-Coder-3B-Instruct", 2000),
            verifier: AgentModelConfig::new("meta-llama/Meta-Llama-3.1-8B-Instruct", 500),
            diagram: AgentModelConfig::new("meta-llama/Meta-Llama-3.1-8B-Instruct", 800),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            doc_style: DocStyle::default(),
            max_parallel_files: 1,
            max_files: 50,
            max_file_size: 64 * 1024, // 64KB
            included_extensions: vec![],
            excluded_dirs: vec![
                ".docagent".to_string(),
                "docagent.docs".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
                ".git".to_string(),
                "build".to_string(),
                "dist".to_string(),
                "venv".to_string(),
                "__pycache__".to_string(),
            ],
            excluded_files: vec![
                "docagent.toml".to_string(),
                "*.min.js".to_string(),
                "*.lock".to_string(),
                "package-lock.json".to_string(),
                "*.log".to_string(),
            ],
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cache_dir: PathBuf::from(".docagent/cache"),
            expire_hours: 720,
        }
    }
}
