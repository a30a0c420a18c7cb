//! The backup engine: per-account sessions and the scheduler that runs them.

pub mod orchestrator;
pub mod progress;
pub mod session;

pub use orchestrator::{BackupOptions, BackupOrchestrator, CycleReport, ShutdownPolicy};
pub use session::{AccountBackupSession, SessionOutcome, SessionReport};
