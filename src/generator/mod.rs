pub mod agents;
pub mod context;
pub mod mermaid;
pub mod orchestrator;
pub mod recovery;
pub mod sections;
pub mod workflow;
