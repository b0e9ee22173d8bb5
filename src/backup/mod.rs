//! Backup workflow: naming, retention and the orchestrator tying database and storage together.

pub mod naming;
pub mod orchestrator;
pub mod retention;

pub use orchestrator::{BackupOrchestrator, BackupRecord};
pub use retention::RetentionPolicy;
