pub mod history;
pub mod normalize;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
