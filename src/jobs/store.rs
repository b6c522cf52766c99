//! 任务持久化，内存中的任务被清除后仍可查询状态

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::jobs::Job;

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn save(&self, job: &Job) -> Result<()>;

    async fn load(&self, job_id: &str) -> Result<Option<Job>>;

    /// 保存后能否再读回；为true时已持久化的任务会从内存中移除
    fn is_persistent(&self) -> bool {
        true
    }
}

/// 不做任何持久化
#[derive(Debug, Default, Clone, Copy)]
pub struct NullJobStore;

#[async_trait]
impl JobStore for NullJobStore {
    async fn save(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn load(&self, _job_id: &str) -> Result<Option<Job>> {
        Ok(None)
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// 以JSON文件保存任务记录，保存时去掉文件源码
#[derive(Debug, Clone)]
pub struct DiskJobStore {
    root: PathBuf,
}

impl DiskJobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// 任务记录路径；id中含路径分隔符时返回None
    pub fn job_path(&self, job_id: &str) -> Option<PathBuf> {
        let valid = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| self.root.join(format!("{}.json", job_id)))
    }
}

#[async_trait]
impl JobStore for DiskJobStore {
    async fn save(&self, job: &Job) -> Result<()> {
        let path = self
            .job_path(&job.job_id)
            .with_context(|| format!("Invalid job id: {}", job.job_id))?;

        let mut stripped = job.clone();
        for file in &mut stripped.file_results {
            file.content.clear();
        }

        fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create job store directory: {:?}", self.root))?;
        let content = serde_json::to_string_pretty(&stripped)?;
        fs::write(&path, content)
            .await
            .with_context(|| format!("Failed to write job record: {:?}", path))?;

        debug!("Job {} saved to {:?}", job.job_id, path);
        Ok(())
    }

    async fn load(&self, job_id: &str) -> Result<Option<Job>> {
        let Some(path) = self.job_path(job_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read job record: {:?}", path))?;
        let job = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse job record: {:?}", path))?;
        Ok(Some(job))
    }
}
