//! Tool execution and result formatting.

use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use serde_json::Value;

use crate::arguments::Arguments;
use crate::error::{Error, Result};
use crate::protocol::ToolCallResult;
use crate::tools::ToolDescriptor;

/// Runs tool handles and turns whatever they return into text content.
///
/// Nothing a tool does escapes as anything but [`Error::ToolExecution`]:
/// backend errors and panics are both caught here.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolInvoker;

impl ToolInvoker {
    /// Create an invoker.
    pub fn new() -> Self {
        Self
    }

    /// Execute `tool` with normalized `arguments`.
    pub async fn invoke(&self, tool: &ToolDescriptor, arguments: Arguments) -> Result<ToolCallResult> {
        let started = Instant::now();
        let logged = Value::Object(arguments.clone());
        tracing::info!("Executing tool '{}' with arguments: {}", tool.name, logged);

        let outcome = AssertUnwindSafe(tool.handle.invoke(arguments))
            .catch_unwind()
            .await;

        let value = match outcome {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                tracing::error!("Error executing tool '{}': {}", tool.name, e);
                return Err(execution_error(&tool.name, e));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!("Tool '{}' panicked: {}", tool.name, message);
                return Err(Error::ToolExecution {
                    tool: tool.name.clone(),
                    message,
                });
            }
        };

        tracing::info!(
            "Tool '{}' completed in {:.2}s",
            tool.name,
            started.elapsed().as_secs_f64()
        );
        tracing::debug!("Tool '{}' result: {}", tool.name, value);

        Ok(ToolCallResult::text(format_result(&value)))
    }
}

/// Render a tool's raw return value as text.
///
/// - `null` → empty string
/// - string → as is
/// - object with a `markdown` key → that entry
/// - anything else → its JSON text
pub fn format_result(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Object(map) if map.contains_key("markdown") => match &map["markdown"] {
            Value::String(markdown) => markdown.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        },
        other => other.to_string(),
    }
}

fn execution_error(tool: &str, error: Error) -> Error {
    match error {
        Error::ToolExecution { message, .. } => Error::ToolExecution {
            tool: tool.to_string(),
            message,
        },
        other => Error::ToolExecution {
            tool: tool.to_string(),
            message: other.to_string(),
        },
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "tool panicked".to_string()
    }
}
