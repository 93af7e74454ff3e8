// Library interface for mediamap modules
// This allows tests and the binary to share the pipeline stages

pub mod aggregation;
pub mod browser;
pub mod extraction;
pub mod llm;
pub mod pipeline;
pub mod planning;
pub mod report;
pub mod startup;
