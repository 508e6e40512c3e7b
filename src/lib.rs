pub mod audio;
pub mod bus;
pub mod config;
pub mod conversation;
pub mod demo;
pub mod error;
pub mod intent;
pub mod llm;
pub mod pipeline;
pub mod ports;
pub mod resilience;
pub mod vad;

pub use error::{AgentError, Result};
