//! Tool registry for the escalated generation tier.
//!
//! Tools are async handlers keyed by name. The tiering layer intercepts
//! tool-call units from the model, executes the handler here and splices the
//! handler's confirmation text into the spoken response. A handler failure
//! becomes a spoken apology, never a crashed turn.

use crate::ports::{RepositoryPort, ToolInvocation};
use futures_util::future::BoxFuture;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("tool execution failed: {0}")]
    Execution(String),
}

/// Spoken when a tool invocation fails.
pub const TOOL_APOLOGY: &str =
    "I'm sorry, I couldn't complete that just now. Please try again in a moment \
     or ask at reception.";

type ToolHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync>;

pub struct Tool {
    pub name: String,
    pub description: String,
    /// JSON schema of the handler's arguments.
    pub parameters: Value,
    handler: ToolHandler,
}

impl Tool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            handler,
        }
    }

    /// Function-call definition in the shape generation providers expect.
    pub fn definition(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Tool) {
        log::info!("🔧 Registered tool '{}'", tool.name);
        self.tools.insert(tool.name.clone(), tool);
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions for every registered tool, passed with escalated requests.
    pub fn definitions(&self) -> Vec<Value> {
        self.tools.values().map(Tool::definition).collect()
    }

    /// Execute one intercepted tool call.
    pub async fn execute(&self, invocation: &ToolInvocation) -> Result<String, ToolError> {
        let tool = self
            .tools
            .get(&invocation.name)
            .ok_or_else(|| ToolError::Unknown(invocation.name.clone()))?;

        log::info!("🔧 Executing tool '{}'", invocation.name);
        (tool.handler)(invocation.arguments.clone()).await
    }
}

/// Arguments the model supplies with a `save_booking` call.
#[derive(Debug, Deserialize)]
struct BookingArgs {
    service: Option<String>,
    date: Option<String>,
    time: Option<String>,
    guests: Option<u32>,
}

impl BookingArgs {
    /// Confirmation sentence to speak once the booking is saved.
    fn confirmation(&self) -> String {
        let mut text = format!(
            "Done, I've booked {}",
            self.service.as_deref().unwrap_or("your booking")
        );
        if let Some(date) = &self.date {
            text.push_str(&format!(" on {}", date));
        }
        if let Some(time) = &self.time {
            text.push_str(&format!(" at {}", time));
        }
        if let Some(guests) = self.guests {
            text.push_str(&format!(" with {} guests", guests));
        }
        text.push_str(" for you.");
        text
    }
}

/// The default booking tool: persists a booking through the repository and
/// returns the confirmation sentence to speak.
pub fn booking_tool(repository: Arc<dyn RepositoryPort>) -> Tool {
    let handler: ToolHandler = Arc::new(move |arguments: Value| {
        let repository = repository.clone();
        Box::pin(async move {
            let parsed: BookingArgs = serde_json::from_value(arguments.clone())
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

            let saved = repository
                .save_booking(arguments)
                .await
                .map_err(|e| ToolError::Execution(e.to_string()))?;

            if saved {
                Ok(parsed.confirmation())
            } else {
                Err(ToolError::Execution("repository rejected booking".to_string()))
            }
        })
    });

    Tool::new(
        "save_booking",
        "Book a hotel service (spa, restaurant, late check-out) for the guest.",
        json!({
            "type": "object",
            "properties": {
                "service": { "type": "string", "description": "What to book" },
                "date": { "type": "string", "description": "Requested date" },
                "time": { "type": "string", "description": "Requested time" },
                "guests": { "type": "integer", "description": "Party size" }
            },
            "required": ["service"]
        }),
        handler,
    )
}
