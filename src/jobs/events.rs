//! 进度事件与订阅者

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast};
use tracing::trace;

use crate::generator::agents::AgentType;
use crate::jobs::AgentStatus;

/// 推送给订阅者的进度事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 开始处理某个文件
    FileProgress {
        job_id: String,
        file: String,
        file_index: usize,
        total_files: usize,
        progress: f64,
        status: String,
    },
    /// 某个文件上的Agent状态变化
    AgentProgress {
        job_id: String,
        file: String,
        file_index: usize,
        total_files: usize,
        files_completed: usize,
        agent: AgentType,
        status: AgentStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// 任务级状态变化
    JobProgress {
        job_id: String,
        status: String,
        progress: f64,
        total_files: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl ProgressEvent {
    pub fn job_id(&self) -> &str {
        match self {
            ProgressEvent::FileProgress { job_id, .. }
            | ProgressEvent::AgentProgress { job_id, .. }
            | ProgressEvent::JobProgress { job_id, .. } => job_id,
        }
    }
}

/// 进度广播出口，发出即忘，不保证送达
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn broadcast(&self, event: ProgressEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl ProgressSink for NullSink {
    async fn broadcast(&self, _event: ProgressEvent) {}
}

/// 基于tokio broadcast通道的出口，慢订阅者只会丢消息，不会阻塞任务
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ProgressEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl ProgressSink for BroadcastSink {
    async fn broadcast(&self, event: ProgressEvent) {
        if self.sender.send(event).is_err() {
            trace!("No progress subscribers, event dropped");
        }
    }
}

/// 记录所有事件，便于检查事件序列
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl ProgressSink for CollectingSink {
    async fn broadcast(&self, event: ProgressEvent) {
        self.events.lock().await.push(event);
    }
}
