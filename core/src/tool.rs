//! Typed tools and the registry that exposes them as plain text operations.
//!
//! A [`Tool`] declares its argument type; the schema handed to the agent is derived from it
//! with [`schemars`], and doc comments on the fields become the field descriptions. The
//! [`Tools`] registry erases the argument type so callers can dispatch by name with a JSON
//! string.

use std::{borrow::Cow, collections::BTreeMap, fmt::Debug, future::Future, pin::Pin};

use schemars::{JsonSchema, Schema, schema_for};
use serde::{Serialize, de::DeserializeOwned};

use crate::Result;

/// Tools that can be called by an agent.
///
/// Implementations hold cheaply cloneable handles to shared state, so `call` takes `&self`
/// and the same registry can serve concurrent calls.
pub trait Tool: Send + Sync {
    /// Tool name. Must be unique within a [`Tools`] registry.
    fn name(&self) -> Cow<'static, str>;
    /// Tool description for the agent.
    fn description(&self) -> Cow<'static, str>;

    /// Tool arguments type.
    type Arguments: JsonSchema + DeserializeOwned + Send;

    /// Executes the tool with the provided arguments.
    fn call(&self, arguments: Self::Arguments) -> impl Future<Output = Result> + Send;
}

/// Arguments for tools that take none. Accepts `{}`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, JsonSchema,
)]
pub struct NoArgs {}

/// Serializes a value to a pretty JSON string.
///
/// A bare JSON string is returned without quotes. A value that cannot be serialized is
/// rendered as an error object instead.
pub fn json<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(value) => value
            .as_str()
            .map_or_else(|| format!("{value:#}"), ToString::to_string),
        Err(error) => format!("{:#}", serde_json::json!({ "error": error.to_string() })),
    }
}

trait ToolImpl: Send + Sync {
    fn call(&self, args: String) -> Pin<Box<dyn Future<Output = Result> + Send + '_>>;
    fn definition(&self) -> ToolDefinition;
}

impl<T: Tool> ToolImpl for T {
    fn call(&self, args: String) -> Pin<Box<dyn Future<Output = Result> + Send + '_>> {
        Box::pin(async move {
            let arguments: T::Arguments = serde_json::from_str(&args)?;
            Tool::call(self, arguments).await
        })
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::new(self)
    }
}

/// Tool definition including the argument schema.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    name: Cow<'static, str>,
    description: Cow<'static, str>,
    arguments: Schema,
}

impl ToolDefinition {
    /// Creates a tool definition for a given tool.
    #[must_use]
    pub fn new<T: Tool>(tool: &T) -> Self {
        Self {
            name: tool.name(),
            description: tool.description(),
            arguments: schema_for!(T::Arguments),
        }
    }

    /// Returns the tool's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tool's description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the JSON schema for the tool's arguments.
    #[must_use]
    pub const fn arguments_schema(&self) -> &Schema {
        &self.arguments
    }
}

/// Tool registry for managing and calling tools by name.
pub struct Tools {
    tools: BTreeMap<String, Box<dyn ToolImpl>>,
}

impl Debug for Tools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tools")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Default for Tools {
    fn default() -> Self {
        Self::new()
    }
}

impl Tools {
    /// Creates a new empty tools registry.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Returns definitions of all registered tools, ordered by name.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition()).collect()
    }

    /// Returns the names of all registered tools.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Registers a new tool. Replaces existing tool with same name.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        self.tools
            .insert(tool.name().to_string(), Box::new(tool) as Box<dyn ToolImpl>);
    }

    /// Removes a tool from the registry.
    pub fn unregister(&mut self, name: &str) {
        self.tools.remove(name);
    }

    /// Calls a tool by name with JSON arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool is not found, arguments cannot be parsed,
    /// or tool execution fails.
    pub async fn call(&self, name: &str, args: impl Into<String>) -> Result {
        if let Some(tool) = self.tools.get(name) {
            tool.call(args.into()).await
        } else {
            Err(crate::Error::not_found(format!("Tool '{name}' not found")).into())
        }
    }

    /// Calls a tool and renders any failure as `{"error": "..."}`.
    ///
    /// This is the boundary used by protocol layers: a bad call never escapes as an error.
    pub async fn dispatch(&self, name: &str, args: impl Into<String>) -> String {
        match self.call(name, args).await {
            Ok(output) => output,
            Err(error) => error_text(&error),
        }
    }
}

/// Renders an error as the JSON object returned to the agent.
#[must_use]
pub fn error_text(error: &anyhow::Error) -> String {
    json(&serde_json::json!({ "error": format!("{error:#}") }))
}
