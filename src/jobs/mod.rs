//! 多文件文档任务：任务记录、逐文件逐Agent的状态、状态快照

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use thiserror::Error;

use crate::generator::agents::AgentType;
use crate::types::documentation::DocSection;

pub mod events;
pub mod registry;
pub mod store;

pub use events::{BroadcastSink, CollectingSink, NullSink, ProgressEvent, ProgressSink};
pub use registry::{JobProgressTracker, JobRegistry};
pub use store::{DiskJobStore, JobStore, NullJobStore};

/// 任务级状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Starting,
    Processing,
    /// 文件已全部处理完，正在组装项目级章节，不再接受取消
    Synthesizing,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Starting => "starting",
            JobStatus::Processing => "processing",
            JobStatus::Synthesizing => "synthesizing",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// 单个文件上某个Agent的状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
}

impl AgentStatus {
    /// completed和error都算该Agent已结束
    pub fn is_finished(&self) -> bool {
        matches!(self, AgentStatus::Completed | AgentStatus::Error)
    }
}

/// 文件中一个Agent的执行记录
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRun {
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Processing,
    Completed,
}

/// 单个文件的处理结果，文件开始处理时创建
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    pub index: usize,
    pub path: String,
    #[serde(default)]
    pub content: String,
    pub status: FileStatus,
    pub agents: BTreeMap<AgentType, AgentRun>,
    /// Writer输出，Writer缺失时取Diagram输出
    pub documentation: Option<Value>,
}

impl FileResult {
    pub fn new(index: usize, path: &str, content: &str) -> Self {
        Self {
            index,
            path: path.to_string(),
            content: content.to_string(),
            status: FileStatus::Processing,
            agents: AgentType::ALL
                .iter()
                .map(|agent| (*agent, AgentRun::default()))
                .collect(),
            documentation: None,
        }
    }

    pub fn agent(&self, agent: AgentType) -> Option<&AgentRun> {
        self.agents.get(&agent)
    }

    pub fn agent_status(&self, agent: AgentType) -> AgentStatus {
        self.agent(agent).map(|run| run.status).unwrap_or_default()
    }

    /// 某个Agent成功时的输出
    pub fn agent_output(&self, agent: AgentType) -> Option<&Value> {
        self.agent(agent).and_then(|run| run.output.as_ref())
    }
}

/// 多文件文档任务
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub total_files: usize,
    pub files_completed: usize,
    pub current_file: Option<String>,
    pub current_file_index: usize,
    /// 百分比，保留两位小数
    pub progress: f64,
    /// 按文件下标排序
    pub file_results: Vec<FileResult>,
    #[serde(default)]
    pub sections: Vec<DocSection>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(job_id: String, name: &str, total_files: usize) -> Self {
        Self {
            job_id,
            name: name.to_string(),
            status: JobStatus::Starting,
            total_files,
            files_completed: 0,
            current_file: None,
            current_file_index: 0,
            progress: 0.0,
            file_results: Vec::new(),
            sections: Vec::new(),
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn file(&self, index: usize) -> Option<&FileResult> {
        self.file_results
            .binary_search_by_key(&index, |file| file.index)
            .ok()
            .map(|position| &self.file_results[position])
    }

    pub fn file_mut(&mut self, index: usize) -> Option<&mut FileResult> {
        self.file_results
            .binary_search_by_key(&index, |file| file.index)
            .ok()
            .map(|position| &mut self.file_results[position])
    }

    /// 按下标有序插入，已存在时替换
    pub fn insert_file(&mut self, file: FileResult) {
        match self
            .file_results
            .binary_search_by_key(&file.index, |existing| existing.index)
        {
            Ok(position) => self.file_results[position] = file,
            Err(position) => self.file_results.insert(position, file),
        }
    }

    /// 按已完成文件数计算的进度
    pub fn completion_ratio(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        round2(self.files_completed as f64 / self.total_files as f64 * 100.0)
    }
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 跨文件汇总后的Agent阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    Pending,
    Processing,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub status: AgentPhase,
    pub progress: u32,
}

impl AgentSummary {
    const DONE: AgentSummary = AgentSummary {
        status: AgentPhase::Completed,
        progress: 100,
    };
}

/// 任务状态快照，读取方拿到的是副本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusSnapshot {
    pub job_id: String,
    pub name: String,
    pub status: JobStatus,
    pub total_files: usize,
    pub files_completed: usize,
    pub current_file: Option<String>,
    pub current_agent: Option<AgentType>,
    pub overall_progress: f64,
    pub agents: BTreeMap<AgentType, AgentSummary>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusSnapshot {
    /// 汇总各文件上的Agent状态：completed或error都计为完成，
    /// 任务完成时所有Agent强制为100%
    pub fn from_job(job: &Job) -> Self {
        let total = job.total_files.max(1);
        let mut current_agent = None;
        let mut agents = BTreeMap::new();

        for agent in AgentType::ALL {
            let mut finished = 0usize;
            let mut running = false;
            for file in &job.file_results {
                match file.agent_status(agent) {
                    status if status.is_finished() => finished += 1,
                    AgentStatus::Running => running = true,
                    _ => {}
                }
            }

            let summary = if finished >= total {
                AgentSummary::DONE
            } else if running || finished > 0 {
                current_agent.get_or_insert(agent);
                AgentSummary {
                    status: AgentPhase::Processing,
                    progress: (finished as f64 / total as f64 * 100.0).round() as u32,
                }
            } else {
                AgentSummary {
                    status: AgentPhase::Pending,
                    progress: 0,
                }
            };
            agents.insert(agent, summary);
        }

        let mut overall_progress = job.progress;
        if job.status == JobStatus::Completed {
            overall_progress = 100.0;
            for summary in agents.values_mut() {
                *summary = AgentSummary::DONE;
            }
        }

        Self {
            job_id: job.job_id.clone(),
            name: job.name.clone(),
            status: job.status,
            total_files: job.total_files,
            files_completed: job.files_completed,
            current_file: job.current_file.clone(),
            current_agent,
            overall_progress,
            agents,
            error: job.error.clone(),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

/// 任务注册表操作错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("Job '{0}' not found")]
    NotFound(String),

    #[error("Job '{job_id}' already finished with status {status}")]
    AlreadyFinished { job_id: String, status: JobStatus },

    #[error("Job '{0}' has finished processing files and can no longer be cancelled")]
    Finalizing(String),
}
