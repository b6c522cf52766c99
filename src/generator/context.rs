use anyhow::Result;

use crate::{config::Config, llm::client::InferenceClient};

#[derive(Clone)]
pub struct GeneratorContext {
    /// 推理客户端，用于与模型通信。
    pub inference: InferenceClient,
    /// 配置
    pub config: Config,
}

impl GeneratorContext {
    /// 根据配置创建生成器上下文
    pub fn new(config: Config) -> Result<Self> {
        let inference = InferenceClient::new(&config.inference, &config.cache)?;
        Ok(Self { inference, config })
    }

    /// 使用外部注入的推理客户端
    pub fn with_inference(config: Config, inference: InferenceClient) -> Self {
        Self { inference, config }
    }
}
