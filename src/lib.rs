pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod store;
