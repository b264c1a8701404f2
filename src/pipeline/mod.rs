pub mod capture;
pub mod controller;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod store;
pub mod vision;

pub use controller::{InstitutionSummary, PipelineController, PipelineError, RunSummary};
pub use store::ProfileStore;
