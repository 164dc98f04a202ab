//! Tool definitions and registry for MCP server.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::protocol::ToolDefinition;

/// Tool trait for implementing MCP tools.
///
/// A tool is an opaque capability: the server only knows its declared shape
/// and how to hand it arguments.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Name as exposed by the tool source, before normalization.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Declared input schema, if the source exposes one.
    fn input_schema(&self) -> Option<Value> {
        None
    }

    /// Authorization provider guarding this tool, if any.
    fn auth_provider(&self) -> Option<&str> {
        None
    }

    /// Execute the tool with already-normalized arguments.
    async fn invoke(&self, arguments: Map<String, Value>) -> Result<Value>;
}

/// A registered tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    /// Normalized, case-insensitive-unique name.
    pub name: String,
    /// Tool description.
    pub description: String,
    /// Input schema, if declared.
    pub input_schema: Option<Value>,
    /// Authorization provider guarding this tool.
    pub auth_provider: Option<String>,
    /// Invocation handle.
    pub handle: Arc<dyn Tool>,
}

impl ToolDescriptor {
    /// Build a descriptor for `tool`, stripping `prefix` from its name.
    pub fn from_tool(tool: Arc<dyn Tool>, prefix: Option<&str>) -> Self {
        Self {
            name: normalize_tool_name(tool.name(), prefix),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
            auth_provider: tool.auth_provider().map(str::to_string),
            handle: tool,
        }
    }

    /// Wire definition, falling back to an empty object schema.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone().unwrap_or_else(empty_schema),
        }
    }
}

impl fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("auth_provider", &self.auth_provider)
            .finish_non_exhaustive()
    }
}

/// Schema advertised for tools that declare none.
pub fn empty_schema() -> Value {
    json!({
        "type": "object",
        "properties": {},
        "required": []
    })
}

/// Lowercase `raw` and strip a source-specific prefix such as `web_`.
///
/// The prefix is only stripped when something remains after it.
pub fn normalize_tool_name(raw: &str, prefix: Option<&str>) -> String {
    let lowered = raw.to_lowercase();
    match prefix.map(str::to_lowercase) {
        Some(prefix) if !prefix.is_empty() => match lowered.strip_prefix(prefix.as_str()) {
            Some(rest) if !rest.is_empty() => rest.to_string(),
            _ => lowered,
        },
        _ => lowered,
    }
}

/// Registry of available tools.
///
/// Built once at startup and shared read-only afterwards. Listing order is
/// first-registration order; re-registering a name replaces the earlier tool
/// in place.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every tool from one source.
    pub fn register<I>(&mut self, prefix: Option<&str>, tools: I)
    where
        I: IntoIterator<Item = Arc<dyn Tool>>,
    {
        for tool in tools {
            self.register_tool(prefix, tool);
        }
    }

    /// Register a single tool.
    pub fn register_tool(&mut self, prefix: Option<&str>, tool: Arc<dyn Tool>) {
        let descriptor = ToolDescriptor::from_tool(tool, prefix);
        match self.index.get(&descriptor.name) {
            Some(&slot) => {
                tracing::debug!("Tool {} re-registered, replacing earlier entry", descriptor.name);
                self.tools[slot] = descriptor;
            }
            None => {
                tracing::debug!("Registered tool {}", descriptor.name);
                self.index.insert(descriptor.name.clone(), self.tools.len());
                self.tools.push(descriptor);
            }
        }
    }

    /// Look a tool up by name, ignoring case.
    pub fn find(&self, name: &str) -> Option<&ToolDescriptor> {
        self.index
            .get(&name.to_lowercase())
            .map(|&slot| &self.tools[slot])
    }

    /// All tools in registration order.
    pub fn list(&self) -> &[ToolDescriptor] {
        &self.tools
    }

    /// Get tool definitions.
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolDescriptor::definition).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
