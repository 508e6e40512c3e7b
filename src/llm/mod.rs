//! Language-model layer: prompt construction, tool dispatch and the
//! two-tier generation flow that sits on top of the command bus.

pub mod prompts;
pub mod tiering;
pub mod tools;

pub use prompts::PromptFactory;
pub use tiering::TieredGeneration;
pub use tools::{Tool, ToolError, ToolRegistry};
