use crate::cli::Command;
use crate::config::Config;
use crate::generator::context::GeneratorContext;
use crate::generator::orchestrator::{PipelineOrchestrator, RepoJobRequest};
use crate::jobs::{
    AgentStatus, BroadcastSink, DiskJobStore, Job, JobStatus, ProgressEvent,
};
use crate::utils::sources::{collect_repository, prompt_language};

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::debug;

/// 启动文档生成工作流
pub async fn launch(config: &Config, command: &Command, output: Option<&Path>) -> Result<()> {
    let context = GeneratorContext::new(config.clone())?;
    debug!(
        "Inference backends: {}",
        context.inference.backend_names().join(" -> ")
    );

    match command {
        Command::File {
            path,
            language,
            diagram_type,
            ..
        } => {
            run_file(
                context,
                path,
                language.as_deref(),
                diagram_type.as_deref(),
                output,
            )
            .await
        }
        Command::Repo { dir, .. } => run_repository(context, dir).await.map(|_| ()),
    }
}

/// 单文件模式：输出合并记录的JSON
pub async fn run_file(
    context: GeneratorContext,
    path: &Path,
    language: Option<&str>,
    diagram_type: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let source = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read source file: {:?}", path))?;
    let display_path = path.to_string_lossy().replace('\\', "/");
    let language = language.unwrap_or_else(|| prompt_language(&display_path));

    // stdout保留给JSON输出，进度信息走stderr
    eprintln!("📝 正在为 {} 生成文档 ({})", display_path, language);
    let started = Instant::now();
    let orchestrator = PipelineOrchestrator::new(context);
    let result = orchestrator
        .run_snippet(&display_path, &source, language, diagram_type)
        .await;
    let json = serde_json::to_string_pretty(&result)?;

    match output {
        Some(output) => {
            if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
            }
            tokio::fs::write(output, json)
                .await
                .with_context(|| format!("Failed to write output file: {:?}", output))?;
            eprintln!("💾 文档已写入 {}", output.display());
        }
        None => println!("{}", json),
    }

    eprintln!(
        "✅ 完成，质量评分 {:.1}，耗时 {:.2}秒",
        result.documentation.quality_score,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

/// 项目模式：收集源码、运行任务、打印进度并持久化任务记录
pub async fn run_repository(context: GeneratorContext, root: &Path) -> Result<Job> {
    let started = Instant::now();
    let config = context.config.clone();
    let project_name = config.get_project_name(root);

    println!("🔍 正在扫描项目 {} ...", root.display());
    let repository = collect_repository(root, &config.pipeline)?;
    println!(
        "📂 发现 {} 个源码文件，{} 个元数据文件，{} 个测试文件",
        repository.files.len(),
        repository.metadata_files.len(),
        repository.test_files.len()
    );
    if repository.files.is_empty() {
        println!("⚠️ 没有找到可处理的源码文件，只生成项目级章节");
    }

    let sink = BroadcastSink::default();
    let printer = tokio::spawn(print_progress(sink.subscribe()));
    let store = DiskJobStore::new(config.output_path.clone());

    let orchestrator = PipelineOrchestrator::new(context)
        .with_sink(Arc::new(sink))
        .with_store(Arc::new(store.clone()));
    let (job_id, mut handle) = orchestrator
        .spawn_repo_job(RepoJobRequest::from_repository(project_name, repository))
        .await;
    println!("🚀 任务 {} 已启动", job_id);

    let job = tokio::select! {
        job = &mut handle => job?,
        _ = tokio::signal::ctrl_c() => {
            println!("🛑 收到中断信号，当前Agent完成后停止...");
            // 任务可能恰好已经结束
            if let Err(err) = orchestrator.cancel_job(&job_id).await {
                debug!("Cancel skipped: {}", err);
            }
            handle.await?
        }
    };

    if let Some(cache) = orchestrator.context().inference.cache() {
        let report = cache.report();
        println!(
            "📊 缓存命中率 {:.1}% (命中 {}，未命中 {}，写入 {})",
            report.hit_rate * 100.0,
            report.cache_hits,
            report.cache_misses,
            report.cache_writes
        );
    }

    // 所有发送端释放后打印任务会取完剩余事件并退出
    drop(orchestrator);
    if let Err(err) = printer.await {
        debug!("Progress printer stopped: {}", err);
    }

    if let Some(path) = store.job_path(&job.job_id) {
        println!("💾 任务记录已保存到 {}", path.display());
    }
    println!(
        "⏱️ 共处理 {} 个文件，生成 {} 个章节，耗时 {:.2}秒",
        job.files_completed,
        job.sections.len(),
        started.elapsed().as_secs_f64()
    );

    match job.status {
        JobStatus::Error => bail!(
            "Job {} failed: {}",
            job.job_id,
            job.error.as_deref().unwrap_or("unknown error")
        ),
        _ => Ok(job),
    }
}

async fn print_progress(mut receiver: Receiver<ProgressEvent>) {
    loop {
        match receiver.recv().await {
            Ok(event) => {
                if let Some(line) = format_event(&event) {
                    println!("{}", line);
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!("Progress printer lagged, {} events skipped", skipped);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// 进度事件的控制台展示文本
pub fn format_event(event: &ProgressEvent) -> Option<String> {
    match event {
        ProgressEvent::FileProgress {
            file,
            file_index,
            total_files,
            ..
        } => Some(format!("📄 [{}/{}] {}", file_index + 1, total_files, file)),
        ProgressEvent::AgentProgress {
            agent,
            status,
            error,
            ..
        } => match status {
            AgentStatus::Running => Some(format!("   ⏳ {} ...", agent)),
            AgentStatus::Completed => Some(format!("   ✅ {}", agent)),
            AgentStatus::Error => Some(format!(
                "   ❌ {}: {}",
                agent,
                error.as_deref().unwrap_or("unknown error")
            )),
            AgentStatus::Pending => None,
        },
        ProgressEvent::JobProgress {
            status,
            message,
            error,
            ..
        } => match status.as_str() {
            "synthesizing" => Some(format!(
                "🧩 {}",
                message.as_deref().unwrap_or("Assembling sections...")
            )),
            "completed" => Some("🎉 文档生成完成".to_string()),
            "cancelled" => Some("🛑 任务已取消".to_string()),
            "error" => Some(format!(
                "❌ 任务失败: {}",
                error.as_deref().unwrap_or("unknown error")
            )),
            _ => None,
        },
    }
}
