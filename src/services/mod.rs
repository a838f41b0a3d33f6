//! Analysis pipeline and its integration with the vision-model service.

pub mod aggregator;
pub mod analyzer;
pub mod batches;
pub mod decoder;
pub mod gateway;
pub mod gemini_client;
pub mod passes;
pub mod reconciler;
pub mod specification;

pub use analyzer::TakeoffAnalyzer;
pub use batches::BatchRegistry;
pub use gateway::ModelGateway;
pub use gemini_client::GeminiClient;
