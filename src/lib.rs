//! cv-intake: scheduled resume intake, conversion and evaluation.

pub mod artifacts;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod notify;
pub mod pipeline;
pub mod scheduler;
pub mod source;
pub mod store;
