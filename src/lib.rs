pub mod cache;
pub mod cli;
pub mod config;
pub mod generator;
pub mod jobs;
pub mod llm;
pub mod types;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use generator::context::GeneratorContext;
pub use generator::orchestrator::{PipelineOrchestrator, RepoJobRequest};
pub use generator::workflow::launch;
pub use jobs::{Job, JobError, JobRegistry, JobStatus, JobStatusSnapshot, ProgressEvent};
pub use llm::client::InferenceClient;
