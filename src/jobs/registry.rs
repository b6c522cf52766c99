//! 任务注册表与单写者进度跟踪器

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::generator::agents::AgentType;
use crate::jobs::{
    AgentRun, AgentStatus, FileResult, FileStatus, Job, JobError, JobStatus, JobStatusSnapshot,
    ProgressEvent, ProgressSink,
};
use crate::types::documentation::DocSection;

#[derive(Clone)]
struct JobEntry {
    job: Arc<RwLock<Job>>,
    cancel: CancellationToken,
    status: watch::Receiver<JobStatus>,
}

/// 按任务id索引的注册表，不同任务之间只共享这张表
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobEntry>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新任务，返回该任务唯一的写入句柄
    pub async fn create(
        &self,
        name: &str,
        total_files: usize,
        sink: Arc<dyn ProgressSink>,
    ) -> JobProgressTracker {
        let job_id = Uuid::new_v4().to_string();
        let job = Arc::new(RwLock::new(Job::new(job_id.clone(), name, total_files)));
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(JobStatus::Starting);

        self.jobs.write().await.insert(
            job_id.clone(),
            JobEntry {
                job: job.clone(),
                cancel: cancel.clone(),
                status: status_rx,
            },
        );
        info!("Job {} created for {} ({} files)", job_id, name, total_files);

        JobProgressTracker {
            job_id,
            job,
            cancel,
            status: Arc::new(status_tx),
            sink,
        }
    }

    async fn entry(&self, job_id: &str) -> Result<JobEntry, JobError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    pub async fn contains(&self, job_id: &str) -> bool {
        self.jobs.read().await.contains_key(job_id)
    }

    pub async fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// 任务记录的副本
    pub async fn job(&self, job_id: &str) -> Option<Job> {
        let entry = self.entry(job_id).await.ok()?;
        let job = entry.job.read().await.clone();
        Some(job)
    }

    pub async fn snapshot(&self, job_id: &str) -> Option<JobStatusSnapshot> {
        let entry = self.entry(job_id).await.ok()?;
        let job = entry.job.read().await;
        Some(JobStatusSnapshot::from_job(&job))
    }

    /// 请求取消；任务在下一个Agent开始前观察到取消。
    /// 所有文件都已处理完后取消不再生效，返回Finalizing
    pub async fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let entry = self.entry(job_id).await?;
        // 持有写锁，与跟踪器进入synthesizing互斥
        let job = entry.job.write().await;
        match job.status {
            status if status.is_terminal() => Err(JobError::AlreadyFinished {
                job_id: job_id.to_string(),
                status,
            }),
            JobStatus::Synthesizing => Err(JobError::Finalizing(job_id.to_string())),
            JobStatus::Processing
                if job.total_files > 0 && job.files_completed >= job.total_files =>
            {
                Err(JobError::Finalizing(job_id.to_string()))
            }
            _ => {
                entry.cancel.cancel();
                info!("Cancellation requested for job {}", job_id);
                Ok(())
            }
        }
    }

    /// 等待任务进入终态并返回最终记录
    pub async fn wait(&self, job_id: &str) -> Result<Job, JobError> {
        let entry = self.entry(job_id).await?;
        let mut status = entry.status.clone();
        if status.wait_for(JobStatus::is_terminal).await.is_err() {
            warn!("Job {} tracker dropped before reaching a terminal state", job_id);
        }
        let job = entry.job.read().await.clone();
        Ok(job)
    }

    /// 从内存中移除任务
    pub async fn evict(&self, job_id: &str) -> Option<Job> {
        let entry = self.jobs.write().await.remove(job_id)?;
        let job = entry.job.read().await.clone();
        Some(job)
    }
}

/// 文件所在任务的上下文，用于组装Agent事件
struct AgentEventContext {
    file: String,
    total_files: usize,
    files_completed: usize,
}

/// 单个任务的写入句柄，由持有该任务的编排任务独占使用
#[derive(Clone)]
pub struct JobProgressTracker {
    job_id: String,
    job: Arc<RwLock<Job>>,
    cancel: CancellationToken,
    status: Arc<watch::Sender<JobStatus>>,
    sink: Arc<dyn ProgressSink>,
}

impl JobProgressTracker {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn job(&self) -> Job {
        self.job.read().await.clone()
    }

    pub async fn snapshot(&self) -> JobStatusSnapshot {
        JobStatusSnapshot::from_job(&*self.job.read().await)
    }

    pub async fn start(&self) {
        let total_files = {
            let mut job = self.job.write().await;
            job.status = JobStatus::Processing;
            job.total_files
        };
        self.status.send_replace(JobStatus::Processing);
        info!("Job {} processing {} files", self.job_id, total_files);
    }

    /// 文件开始处理：创建FileResult并广播文件级进度
    pub async fn begin_file(&self, index: usize, path: &str, content: &str) {
        let (total_files, progress) = {
            let mut job = self.job.write().await;
            job.current_file = Some(path.to_string());
            job.current_file_index = index;
            job.progress = job.completion_ratio();
            job.insert_file(FileResult::new(index, path, content));
            (job.total_files, job.progress)
        };

        self.sink
            .broadcast(ProgressEvent::FileProgress {
                job_id: self.job_id.clone(),
                file: path.to_string(),
                file_index: index,
                total_files,
                progress,
                status: "processing_file".to_string(),
            })
            .await;
    }

    async fn update_agent<F>(
        &self,
        index: usize,
        agent: AgentType,
        update: F,
    ) -> Option<AgentEventContext>
    where
        F: FnOnce(&mut AgentRun),
    {
        let mut job = self.job.write().await;
        let total_files = job.total_files;
        let files_completed = job.files_completed;
        let Some(file) = job.file_mut(index) else {
            warn!(
                "Job {}: no file result at index {} for agent {}",
                self.job_id, index, agent
            );
            return None;
        };

        update(file.agents.entry(agent).or_default());
        Some(AgentEventContext {
            file: file.path.clone(),
            total_files,
            files_completed,
        })
    }

    async fn emit_agent(
        &self,
        context: AgentEventContext,
        index: usize,
        agent: AgentType,
        status: AgentStatus,
        error: Option<String>,
    ) {
        self.sink
            .broadcast(ProgressEvent::AgentProgress {
                job_id: self.job_id.clone(),
                file: context.file,
                file_index: index,
                total_files: context.total_files,
                files_completed: context.files_completed,
                agent,
                status,
                error,
            })
            .await;
    }

    pub async fn agent_started(&self, index: usize, agent: AgentType) {
        let context = self
            .update_agent(index, agent, |run| {
                *run = AgentRun {
                    status: AgentStatus::Running,
                    started_at: Some(Utc::now()),
                    ..AgentRun::default()
                };
            })
            .await;
        if let Some(context) = context {
            self.emit_agent(context, index, agent, AgentStatus::Running, None)
                .await;
        }
    }

    pub async fn agent_completed(&self, index: usize, agent: AgentType, output: Value) {
        let context = self
            .update_agent(index, agent, |run| {
                run.status = AgentStatus::Completed;
                run.completed_at = Some(Utc::now());
                run.output = Some(output);
            })
            .await;
        if let Some(context) = context {
            self.emit_agent(context, index, agent, AgentStatus::Completed, None)
                .await;
        }
    }

    pub async fn agent_failed(&self, index: usize, agent: AgentType, message: String) {
        error!(
            "Job {}: agent '{}' failed on file #{}: {}",
            self.job_id, agent, index, message
        );
        let recorded = message.clone();
        let context = self
            .update_agent(index, agent, |run| {
                run.status = AgentStatus::Error;
                run.completed_at = Some(Utc::now());
                run.error = Some(recorded);
            })
            .await;
        if let Some(context) = context {
            self.emit_agent(context, index, agent, AgentStatus::Error, Some(message))
                .await;
        }
    }

    /// 文件处理结束：记录最终文档并推进完成计数
    pub async fn finish_file(&self, index: usize, documentation: Option<Value>) {
        let mut job = self.job.write().await;
        if let Some(file) = job.file_mut(index) {
            file.documentation = documentation;
            file.status = FileStatus::Completed;
        }
        job.files_completed += 1;
        job.progress = job.completion_ratio();
    }

    /// 文件循环结束后调用。取消导致有文件未处理完时返回false，
    /// 否则进入synthesizing，此后的取消请求会被拒绝
    pub async fn synthesizing(&self) -> bool {
        let total_files = {
            let mut job = self.job.write().await;
            let unfinished = job.total_files == 0 || job.files_completed < job.total_files;
            if self.cancel.is_cancelled() && unfinished {
                return false;
            }
            job.status = JobStatus::Synthesizing;
            job.current_file = None;
            job.total_files
        };
        self.status.send_replace(JobStatus::Synthesizing);

        self.sink
            .broadcast(ProgressEvent::JobProgress {
                job_id: self.job_id.clone(),
                status: JobStatus::Synthesizing.to_string(),
                progress: 95.0,
                total_files,
                message: Some("Assembling project-level documentation sections...".to_string()),
                error: None,
            })
            .await;
        true
    }

    pub async fn complete(&self, sections: Vec<DocSection>) {
        let total_files = {
            let mut job = self.job.write().await;
            job.sections = sections;
            job.status = JobStatus::Completed;
            job.files_completed = job.total_files;
            job.progress = 100.0;
            job.current_file = None;
            job.completed_at = Some(Utc::now());
            job.total_files
        };
        self.status.send_replace(JobStatus::Completed);
        info!("Job {} completed", self.job_id);

        self.sink
            .broadcast(ProgressEvent::JobProgress {
                job_id: self.job_id.clone(),
                status: JobStatus::Completed.to_string(),
                progress: 100.0,
                total_files,
                message: None,
                error: None,
            })
            .await;
    }

    /// 编排任务观察到取消后调用
    pub async fn mark_cancelled(&self) {
        let (total_files, progress) = {
            let mut job = self.job.write().await;
            job.status = JobStatus::Cancelled;
            job.current_file = None;
            job.completed_at = Some(Utc::now());
            (job.total_files, job.progress)
        };
        self.status.send_replace(JobStatus::Cancelled);
        info!("Job {} cancelled", self.job_id);

        self.sink
            .broadcast(ProgressEvent::JobProgress {
                job_id: self.job_id.clone(),
                status: JobStatus::Cancelled.to_string(),
                progress,
                total_files,
                message: Some("Job cancelled".to_string()),
                error: None,
            })
            .await;
    }

    /// 任务记录无法持久化时，至少释放内存中的文件源码
    pub async fn release_sources(&self) {
        let mut job = self.job.write().await;
        for file in &mut job.file_results {
            file.content = String::new();
        }
    }

    /// 文件循环之外的失败，整个任务标记为error，已完成的文件结果保留
    pub async fn fail(&self, message: String) {
        let (total_files, progress) = {
            let mut job = self.job.write().await;
            job.status = JobStatus::Error;
            job.error = Some(message.clone());
            (job.total_files, job.progress)
        };
        self.status.send_replace(JobStatus::Error);
        error!("Job {} failed: {}", self.job_id, message);

        self.sink
            .broadcast(ProgressEvent::JobProgress {
                job_id: self.job_id.clone(),
                status: JobStatus::Error.to_string(),
                progress,
                total_files,
                message: None,
                error: Some(message),
            })
            .await;
    }
}
