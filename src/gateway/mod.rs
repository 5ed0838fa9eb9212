//! Model gateway: the narrow capability the pipeline needs from a
//! generative model
//!
//! Two operations: free-text completion and schema-constrained structured
//! completion via one forced tool call. Implementations:
//! - `AnthropicGateway`: the Messages API over HTTP (production)
//! - `ScriptedGateway`: replays queued replies (testing)
//!
//! Stages never call `complete_structured` directly; they go through
//! [`request_structured`], which validates the returned object against the
//! result type's schema and parses it into that type.

mod anthropic;
mod scripted;

pub use anthropic::AnthropicGateway;
pub use scripted::{RecordedCall, ScriptedGateway, ScriptedReply};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from model gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The response did not invoke the requested tool.
    #[error("model did not invoke required tool '{tool}'")]
    Protocol { tool: String },

    /// The tool was invoked but its arguments do not satisfy the result contract.
    #[error("result of tool '{tool}' rejected: {message}")]
    Schema { tool: String, message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("model API returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("gateway not configured: {0}")]
    Configuration(String),

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol { .. })
    }
}

/// A single prompt sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            system: String::new(),
            prompt: prompt.into(),
            max_tokens: 4096,
            temperature: 0.3,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// Token accounting for one free-text call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub model: String,
}

/// Result of a free-text completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: TokenUsage,
}

/// The single tool a structured call forces the model to invoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON-Schema object: `type: object`, `properties`, `required`
    pub input_schema: Value,
}

/// The two-operation capability every model backend provides.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Free-text generation bounded only by `request.max_tokens`.
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError>;

    /// Force the model to call `tool` exactly and return its argument object
    /// unmodified. A response without that tool call is
    /// [`GatewayError::Protocol`], never an empty result.
    async fn complete_structured(
        &self,
        request: &CompletionRequest,
        tool: &ToolSpec,
    ) -> Result<Value, GatewayError>;
}

/// A typed result a stage expects from a structured call.
pub trait StructuredOutput: DeserializeOwned + Send {
    /// Name of the forced tool.
    const TOOL_NAME: &'static str;

    /// JSON-Schema for the tool's argument object.
    fn schema() -> Value;

    /// Contract checks serde cannot express.
    fn check(&self) -> Result<(), String> {
        Ok(())
    }

    fn tool() -> ToolSpec {
        ToolSpec {
            name: Self::TOOL_NAME.to_string(),
            description: format!("Record the {} results", Self::TOOL_NAME),
            input_schema: Self::schema(),
        }
    }
}

/// Reject a tool result that is not an object or omits a required property.
///
/// Nested object schemas, including the items of array properties, are
/// checked the same way. Paths in the message look like `topics[2].metaphor_ids`.
/// A required property whose schema declares a `default` may be absent.
pub fn validate_required(tool: &ToolSpec, value: &Value) -> Result<(), GatewayError> {
    check_object(&tool.input_schema, value, "").map_err(|message| GatewayError::Schema {
        tool: tool.name.clone(),
        message,
    })
}

fn check_object(schema: &Value, value: &Value, path: &str) -> Result<(), String> {
    let object = value.as_object().ok_or_else(|| {
        let at = if path.is_empty() { String::new() } else { format!(" at {}", path) };
        format!("expected an object{}, got {}", at, kind_of(value))
    })?;

    let has_default = |name: &str| schema.pointer(&format!("/properties/{}/default", name)).is_some();
    let missing: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .filter(|name| !object.contains_key(*name) && !has_default(*name))
        .map(|name| join_path(path, name))
        .collect();
    if !missing.is_empty() {
        return Err(format!("missing required properties: {}", missing.join(", ")));
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };
    for (name, property) in properties {
        let Some(field) = object.get(name) else {
            continue;
        };
        let field_path = join_path(path, name);
        match property.get("type").and_then(Value::as_str) {
            Some("object") => check_object(property, field, &field_path)?,
            Some("array") => {
                let items = property.get("items");
                let Some(items) = items.filter(|i| i.get("type").and_then(Value::as_str) == Some("object")) else {
                    continue;
                };
                let elements = field
                    .as_array()
                    .ok_or_else(|| format!("expected an array at {}, got {}", field_path, kind_of(field)))?;
                for (i, element) in elements.iter().enumerate() {
                    check_object(items, element, &format!("{}[{}]", field_path, i))?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn join_path(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", path, name)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Run a structured call and parse the tool arguments into `T`.
pub async fn request_structured<T: StructuredOutput>(
    gateway: &dyn ModelGateway,
    request: &CompletionRequest,
) -> Result<T, GatewayError> {
    let tool = T::tool();
    let value = gateway.complete_structured(request, &tool).await?;
    validate_required(&tool, &value)?;

    let parsed: T = serde_json::from_value(value).map_err(|e| GatewayError::Schema {
        tool: tool.name.clone(),
        message: e.to_string(),
    })?;
    parsed.check().map_err(|message| GatewayError::Schema {
        tool: tool.name.clone(),
        message,
    })?;
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Verdict {
        label: String,
        score: u32,
    }

    impl StructuredOutput for Verdict {
        const TOOL_NAME: &'static str = "record_verdict";

        fn schema() -> Value {
            json!({
                "type": "object",
                "properties": {
                    "label": {"type": "string"},
                    "score": {"type": "integer"}
                },
                "required": ["label", "score"]
            })
        }

        fn check(&self) -> Result<(), String> {
            if self.score > 10 {
                return Err(format!("score {} out of range", self.score));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn structured_result_is_parsed_into_the_typed_variant() {
        let gateway = ScriptedGateway::new().with_tool(json!({"label": "ok", "score": 3}));
        let verdict: Verdict = request_structured(&gateway, &CompletionRequest::new("judge"))
            .await
            .unwrap();
        assert_eq!(verdict.label, "ok");
        assert_eq!(verdict.score, 3);
        assert_eq!(gateway.calls()[0].tool.as_deref(), Some("record_verdict"));
    }

    #[tokio::test]
    async fn missing_tool_call_is_a_protocol_error() {
        let gateway = ScriptedGateway::new().with_no_tool_call();
        let err = request_structured::<Verdict>(&gateway, &CompletionRequest::new("judge"))
            .await
            .unwrap_err();
        assert!(err.is_protocol());
    }

    #[tokio::test]
    async fn omitted_required_property_is_rejected() {
        let gateway = ScriptedGateway::new().with_tool(json!({"label": "ok"}));
        let err = request_structured::<Verdict>(&gateway, &CompletionRequest::new("judge"))
            .await
            .unwrap_err();
        match err {
            GatewayError::Schema { tool, message } => {
                assert_eq!(tool, "record_verdict");
                assert!(message.contains("score"), "{}", message);
            }
            other => panic!("expected schema error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn failed_contract_check_is_rejected() {
        let gateway = ScriptedGateway::new().with_tool(json!({"label": "ok", "score": 11}));
        let err = request_structured::<Verdict>(&gateway, &CompletionRequest::new("judge"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Schema { .. }));
    }

    #[test]
    fn non_object_result_is_rejected() {
        let err = validate_required(&Verdict::tool(), &json!(["label"])).unwrap_err();
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn nested_required_properties_are_enforced() {
        let tool = ToolSpec {
            name: "organize".to_string(),
            description: String::new(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "topics": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "name": {"type": "string"},
                                "ids": {"type": "array", "items": {"type": "integer"}},
                                "weight": {"type": "number", "default": 0.0}
                            },
                            "required": ["name", "ids", "weight"]
                        }
                    }
                },
                "required": ["topics"]
            }),
        };

        assert!(validate_required(&tool, &json!({"topics": [{"name": "A", "ids": []}]})).is_ok());
        assert!(validate_required(&tool, &json!({"topics": []})).is_ok());

        let err = validate_required(&tool, &json!({"topics": [{"name": "A", "ids": [1]}, {"name": "B"}]}))
            .unwrap_err();
        assert!(err.to_string().contains("topics[1].ids"), "{}", err);

        let err = validate_required(&tool, &json!({"topics": ["A"]})).unwrap_err();
        assert!(err.to_string().contains("at topics[0]"), "{}", err);
    }

    #[test]
    fn tool_spec_carries_schema() {
        let tool = Verdict::tool();
        assert_eq!(tool.name, "record_verdict");
        assert_eq!(tool.input_schema["type"], "object");
        assert_eq!(tool.description, "Record the record_verdict results");
    }
}
