//! Application layer: run orchestration on top of the infrastructure

pub mod orchestrator;

pub use orchestrator::{CrawlOrchestrator, RunState};
