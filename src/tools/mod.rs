pub mod context;
pub mod environment;
pub mod runner;
