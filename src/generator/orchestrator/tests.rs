#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use tempfile::TempDir;
    use tokio::sync::{Notify, mpsc};

    use crate::config::Config;
    use crate::generator::agents::{AgentInput, AgentType, PipelineAgent, WriterAgent};
    use crate::generator::context::GeneratorContext;
    use crate::generator::orchestrator::{PipelineOrchestrator, RepoJobRequest};
    use crate::generator::sections::{SectionAssembler, SectionInput};
    use crate::jobs::{
        AgentStatus, CollectingSink, DiskJobStore, FileStatus, JobError, JobStatus,
        NullJobStore, ProgressEvent,
    };
    use crate::llm::client::InferenceClient;
    use crate::types::documentation::{DocSection, WriterDraft};
    use crate::utils::sources::SourceFile;

    fn mock_context(max_parallel_files: usize) -> GeneratorContext {
        let mut config = Config::default();
        config.pipeline.max_parallel_files = max_parallel_files;
        GeneratorContext::with_inference(config, InferenceClient::mock_only())
    }

    fn files(paths: &[&str]) -> Vec<SourceFile> {
        paths
            .iter()
            .map(|path| SourceFile::new(*path, format!("def {}():\n    return 1", path.replace('.', "_"))))
            .collect()
    }

    /// 对指定文件抛错，其余文件交给真实Writer
    struct FailingWriter {
        failing_path: &'static str,
    }

    #[async_trait]
    impl PipelineAgent for FailingWriter {
        fn agent_type(&self) -> AgentType {
            AgentType::Writer
        }

        async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value> {
            if input.path == self.failing_path {
                return Err(anyhow!("writer exploded on {}", input.path));
            }
            WriterAgent.execute(context, input).await
        }
    }

    /// 通知已开始，然后等待放行
    struct GatedAgent {
        agent_type: AgentType,
        output: Value,
        started: mpsc::UnboundedSender<()>,
        gate: Arc<Notify>,
    }

    impl GatedAgent {
        fn new(
            agent_type: AgentType,
            output: Value,
        ) -> (Self, mpsc::UnboundedReceiver<()>, Arc<Notify>) {
            let (started, started_rx) = mpsc::unbounded_channel();
            let gate = Arc::new(Notify::new());
            let agent = Self {
                agent_type,
                output,
                started,
                gate: gate.clone(),
            };
            (agent, started_rx, gate)
        }
    }

    #[async_trait]
    impl PipelineAgent for GatedAgent {
        fn agent_type(&self) -> AgentType {
            self.agent_type
        }

        async fn execute(&self, _context: &GeneratorContext, _input: &AgentInput<'_>) -> Result<Value> {
            let _ = self.started.send(());
            self.gate.notified().await;
            Ok(self.output.clone())
        }
    }

    /// 对指定文件panic，其余文件交给真实Writer
    struct PanickingWriter {
        panicking_path: &'static str,
    }

    #[async_trait]
    impl PipelineAgent for PanickingWriter {
        fn agent_type(&self) -> AgentType {
            AgentType::Writer
        }

        async fn execute(&self, context: &GeneratorContext, input: &AgentInput<'_>) -> Result<Value> {
            if input.path == self.panicking_path {
                panic!("invariant violated in writer");
            }
            WriterAgent.execute(context, input).await
        }
    }

    /// 记录同时在执行的文件数
    #[derive(Default)]
    struct ConcurrencyGauge {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl PipelineAgent for ConcurrencyGauge {
        fn agent_type(&self) -> AgentType {
            AgentType::Reader
        }

        async fn execute(&self, _context: &GeneratorContext, _input: &AgentInput<'_>) -> Result<Value> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(json!({"architecture_type": "function"}))
        }
    }

    struct BrokenAssembler;

    /// 通知已开始组装，然后等待放行
    struct GatedAssembler {
        started: mpsc::UnboundedSender<()>,
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl SectionAssembler for GatedAssembler {
        async fn assemble(
            &self,
            _context: &GeneratorContext,
            _input: &SectionInput<'_>,
        ) -> Result<Vec<DocSection>> {
            let _ = self.started.send(());
            self.gate.notified().await;
            Ok(vec![DocSection::new(
                "Project Information",
                "project_info",
                "demo".to_string(),
            )])
        }
    }

    #[async_trait]
    impl SectionAssembler for BrokenAssembler {
        async fn assemble(
            &self,
            _context: &GeneratorContext,
            _input: &SectionInput<'_>,
        ) -> Result<Vec<DocSection>> {
            Err(anyhow!("summary backend unavailable"))
        }
    }

    #[tokio::test]
    async fn test_run_single_with_mock_backend() {
        let orchestrator = PipelineOrchestrator::new(mock_context(1));

        let result = orchestrator
            .run_single("def add(a, b):\n    return a + b", "python")
            .await;

        assert_eq!(result.status, "completed");
        assert_eq!(result.stages.analysis.architecture_type, "function");
        assert!(!result.stages.context.patterns.is_empty());
        assert!(result.documentation.docstring.contains("Auto-generated documentation"));
        assert_eq!(result.documentation.quality_score, 87.5);
        assert!(result.documentation.diagram.mermaid_code.starts_with("flowchart TD"));
    }

    #[tokio::test]
    async fn test_run_single_substitutes_fallback_for_failed_agent() {
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_agent(Arc::new(
            FailingWriter {
                failing_path: "snippet",
            },
        ));

        let source = "def parse(x): pass";
        let result = orchestrator.run_single(source, "python").await;

        assert_eq!(result.status, "completed");
        assert_eq!(result.stages.documentation, WriterDraft::fallback(source, "python"));
        assert_eq!(result.documentation.quality_score, 87.5);
    }

    #[tokio::test]
    async fn test_run_single_substitutes_fallback_for_panicking_agent() {
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_agent(Arc::new(
            PanickingWriter {
                panicking_path: "snippet",
            },
        ));

        let source = "def parse(x): pass";
        let result = orchestrator.run_single(source, "python").await;

        assert_eq!(result.status, "completed");
        assert_eq!(result.stages.documentation, WriterDraft::fallback(source, "python"));
        assert!(result.documentation.diagram.mermaid_code.starts_with("flowchart TD"));
    }

    #[tokio::test]
    async fn test_agent_failure_is_isolated_to_its_file() {
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_agent(Arc::new(
            FailingWriter {
                failing_path: "b.py",
            },
        ));

        let job = orchestrator
            .run_repo_job(RepoJobRequest::new("demo", files(&["a.py", "b.py", "c.py"])))
            .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.files_completed, 3);
        assert_eq!(job.progress, 100.0);
        assert!(job.error.is_none());
        assert_eq!(job.file_results.len(), 3);

        let failed = job.file(1).unwrap();
        let writer = failed.agent(AgentType::Writer).unwrap();
        assert_eq!(writer.status, AgentStatus::Error);
        assert_eq!(writer.error.as_deref(), Some("writer exploded on b.py"));
        for agent in [
            AgentType::Reader,
            AgentType::Searcher,
            AgentType::Verifier,
            AgentType::Diagram,
        ] {
            assert_eq!(failed.agent_status(agent), AgentStatus::Completed, "{}", agent);
        }
        // 没有Writer输出时用图表作为文件文档
        assert!(failed.documentation.as_ref().unwrap()["mermaid_code"].is_string());

        for index in [0, 2] {
            let file = job.file(index).unwrap();
            assert_eq!(file.status, FileStatus::Completed);
            assert!(AgentType::ALL
                .iter()
                .all(|agent| file.agent_status(*agent) == AgentStatus::Completed));
            assert!(file.documentation.as_ref().unwrap()["docstring"].is_string());
        }

        let types: Vec<&str> = job.sections.iter().map(|s| s.section_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "project_info",
                "executive_summary",
                "scope",
                "source_code",
                "diagrams",
                "quality_report"
            ]
        );
    }

    #[tokio::test]
    async fn test_events_follow_agent_order() {
        let sink = Arc::new(CollectingSink::new());
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_sink(sink.clone());

        let job = orchestrator
            .run_repo_job(RepoJobRequest::new("demo", files(&["only.py"])))
            .await;
        let events = sink.events().await;

        assert_eq!(events.len(), 13);
        assert!(events.iter().all(|event| event.job_id() == job.job_id));
        assert!(matches!(&events[0], ProgressEvent::FileProgress { file, .. } if file == "only.py"));

        let agent_events: Vec<(AgentType, AgentStatus)> = events
            .iter()
            .filter_map(|event| match event {
                ProgressEvent::AgentProgress { agent, status, .. } => Some((*agent, *status)),
                _ => None,
            })
            .collect();
        let expected: Vec<(AgentType, AgentStatus)> = AgentType::ALL
            .iter()
            .flat_map(|agent| {
                [
                    (*agent, AgentStatus::Running),
                    (*agent, AgentStatus::Completed),
                ]
            })
            .collect();
        assert_eq!(agent_events, expected);

        assert!(matches!(
            &events[11],
            ProgressEvent::JobProgress { status, progress, .. } if status == "synthesizing" && *progress == 95.0
        ));
        assert!(matches!(
            &events[12],
            ProgressEvent::JobProgress { status, progress, .. } if status == "completed" && *progress == 100.0
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_before_next_agent() {
        let (reader, mut started_rx, gate) =
            GatedAgent::new(AgentType::Reader, json!({"architecture_type": "module"}));
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_agent(Arc::new(reader));

        let job_id = orchestrator
            .start_repo_job(RepoJobRequest::new("demo", files(&["a.py", "b.py"])))
            .await;
        started_rx.recv().await.unwrap();

        orchestrator.cancel_job(&job_id).await.unwrap();
        gate.notify_one();
        let job = orchestrator.wait_for_job(&job_id).await.unwrap();

        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.sections.is_empty());
        assert_eq!(job.file_results.len(), 1);

        let file = job.file(0).unwrap();
        assert_eq!(file.status, FileStatus::Processing);
        assert_eq!(file.agent_status(AgentType::Reader), AgentStatus::Completed);
        for agent in &AgentType::ALL[1..] {
            assert_eq!(file.agent_status(*agent), AgentStatus::Pending);
        }

        assert!(matches!(
            orchestrator.cancel_job(&job_id).await,
            Err(JobError::AlreadyFinished {
                status: JobStatus::Cancelled,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_cancel_during_last_agent_still_completes() {
        let (diagram, mut started_rx, gate) = GatedAgent::new(
            AgentType::Diagram,
            json!({"mermaid_code": "flowchart TD\n    A --> B", "diagram_type": "flowchart"}),
        );
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_agent(Arc::new(diagram));

        let job_id = orchestrator
            .start_repo_job(RepoJobRequest::new("demo", files(&["only.py"])))
            .await;
        started_rx.recv().await.unwrap();

        // 没有后续Agent可跳过，取消不会丢弃已处理完的文件
        orchestrator.cancel_job(&job_id).await.unwrap();
        gate.notify_one();
        let job = orchestrator.wait_for_job(&job_id).await.unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.files_completed, 1);
        assert_eq!(job.sections.len(), 6);
        assert_eq!(
            job.file(0).unwrap().agent_status(AgentType::Diagram),
            AgentStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_cancel_rejected_while_synthesizing() {
        let (started, mut started_rx) = mpsc::unbounded_channel();
        let gate = Arc::new(Notify::new());
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_assembler(Arc::new(
            GatedAssembler {
                started,
                gate: gate.clone(),
            },
        ));

        let job_id = orchestrator
            .start_repo_job(RepoJobRequest::new("demo", files(&["a.py"])))
            .await;
        started_rx.recv().await.unwrap();

        let snapshot = orchestrator.job_status(&job_id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Synthesizing);
        assert_eq!(
            orchestrator.cancel_job(&job_id).await,
            Err(JobError::Finalizing(job_id.clone()))
        );

        gate.notify_one();
        let job = orchestrator.wait_for_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.sections.len(), 1);
    }

    #[tokio::test]
    async fn test_agent_panic_is_recorded_on_its_agent() {
        let orchestrator = PipelineOrchestrator::new(mock_context(1)).with_agent(Arc::new(
            PanickingWriter {
                panicking_path: "b.py",
            },
        ));

        let job = orchestrator
            .run_repo_job(RepoJobRequest::new("demo", files(&["a.py", "b.py", "c.py"])))
            .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.error.is_none());
        assert_eq!(job.files_completed, 3);
        assert_eq!(job.sections.len(), 6);

        let failed = job.file(1).unwrap();
        let writer = failed.agent(AgentType::Writer).unwrap();
        assert_eq!(writer.status, AgentStatus::Error);
        let message = writer.error.as_deref().unwrap();
        assert!(message.contains("panicked"));
        assert!(message.contains("invariant violated in writer"));
        assert_eq!(failed.agent_status(AgentType::Verifier), AgentStatus::Completed);
        assert_eq!(failed.agent_status(AgentType::Diagram), AgentStatus::Completed);

        let last = job.file(2).unwrap();
        assert_eq!(last.status, FileStatus::Completed);
        assert!(AgentType::ALL
            .iter()
            .all(|agent| last.agent_status(*agent) == AgentStatus::Completed));
    }

    #[tokio::test]
    async fn test_parallel_files_are_bounded_and_ordered() {
        let gauge = Arc::new(ConcurrencyGauge::default());
        let orchestrator = PipelineOrchestrator::new(mock_context(2)).with_agent(gauge.clone());

        let job = orchestrator
            .run_repo_job(RepoJobRequest::new("demo", files(&["a.py", "b.py", "c.py", "d.py"])))
            .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        let paths: Vec<&str> = job.file_results.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["a.py", "b.py", "c.py", "d.py"]);
        let indices: Vec<usize> = job.file_results.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_assembler_failure_still_completes_job() {
        let orchestrator =
            PipelineOrchestrator::new(mock_context(1)).with_assembler(Arc::new(BrokenAssembler));

        let job = orchestrator
            .run_repo_job(RepoJobRequest::new("demo", files(&["a.py"])))
            .await;

        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.sections.is_empty());
        assert_eq!(job.file_results.len(), 1);
    }

    #[tokio::test]
    async fn test_status_falls_back_to_store() {
        let temp_dir = TempDir::new().unwrap();
        let orchestrator = PipelineOrchestrator::new(mock_context(1))
            .with_store(Arc::new(DiskJobStore::new(temp_dir.path())));

        let job = orchestrator
            .run_repo_job(RepoJobRequest::new("demo", files(&["a.py"])))
            .await;
        assert!(temp_dir.path().join(format!("{}.json", job.job_id)).exists());

        // 持久化后不再占用内存
        assert!(!orchestrator.registry().contains(&job.job_id).await);
        let snapshot = orchestrator.job_status(&job.job_id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.overall_progress, 100.0);
        assert_eq!(snapshot.name, "demo");

        let saved = orchestrator.wait_for_job(&job.job_id).await.unwrap();
        assert_eq!(saved.status, JobStatus::Completed);
        assert!(saved.file_results[0].content.is_empty());

        assert_eq!(
            orchestrator.job_status("missing").await,
            Err(JobError::NotFound("missing".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unpersisted_job_releases_sources() {
        let orchestrator =
            PipelineOrchestrator::new(mock_context(1)).with_store(Arc::new(NullJobStore));

        let job = orchestrator
            .run_repo_job(RepoJobRequest::new("demo", files(&["a.py", "b.py"])))
            .await;
        assert!(!job.file_results[0].content.is_empty());

        let kept = orchestrator.registry().job(&job.job_id).await.unwrap();
        assert_eq!(kept.status, JobStatus::Completed);
        assert!(kept.file_results.iter().all(|file| file.content.is_empty()));
        assert!(kept.file_results.iter().all(|file| file.documentation.is_some()));
    }

    #[tokio::test]
    async fn test_empty_job_completes() {
        let orchestrator = PipelineOrchestrator::new(mock_context(1));
        let job = orchestrator.run_repo_job(RepoJobRequest::new("empty", Vec::new())).await;

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.total_files, 0);
        assert!(job.file_results.is_empty());
    }
}
