//! Core library: scan records, the registry that orders them, and the
//! orchestrator that drives each file through upload and resolution.

pub mod config;
pub mod models;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;

pub use models::{RecordId, ScanRecord, ScanStatus, TransitionError};
pub use orchestrator::{OrchestratorSettings, PollPolicy, ScanOrchestrator};
pub use registry::ScanRegistry;
