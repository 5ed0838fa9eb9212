//! Messages API backend
//!
//! Structured calls send exactly one tool and force it with
//! `tool_choice: {"type": "tool", "name": ...}`, so the only acceptable
//! answer is a `tool_use` block for that tool.

use super::{Completion, CompletionRequest, GatewayError, ModelGateway, TokenUsage, ToolSpec};
use crate::config::Settings;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const API_VERSION: &str = "2023-06-01";

/// A content block of a Messages API response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        name: String,
        #[serde(default)]
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

impl MessagesResponse {
    /// Concatenation of all text blocks.
    fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Arguments of the first call to `tool_name`, if any.
    fn tool_input(self, tool_name: &str) -> Option<Value> {
        self.content.into_iter().find_map(|block| match block {
            ContentBlock::ToolUse { name, input } if name == tool_name => Some(input),
            _ => None,
        })
    }
}

/// Gateway backed by the Anthropic Messages API.
pub struct AnthropicGateway {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicGateway {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, GatewayError> {
        Self::with_timeout(api_key, model, Duration::from_secs(120))
    }

    fn with_timeout(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: "https://api.anthropic.com".to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, GatewayError> {
        let gateway = Self::with_timeout(
            settings.api_key.clone(),
            settings.model.clone(),
            Duration::from_secs(settings.request_timeout_secs),
        )?;
        Ok(gateway.with_base_url(settings.api_base.clone()))
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if !request.system.is_empty() {
            body["system"] = Value::String(request.system.clone());
        }
        body
    }

    async fn send(&self, body: &Value) -> Result<MessagesResponse, GatewayError> {
        if self.api_key.trim().is_empty() {
            return Err(GatewayError::Configuration(
                "no API key; set ANTHROPIC_API_KEY or api_key in the config file".to_string(),
            ));
        }

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<MessagesResponse>().await?)
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let response = self.send(&self.request_body(request)).await?;
        let usage = TokenUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
            model: response.model.clone(),
        };
        info!(
            model = %usage.model,
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            "completion finished"
        );
        Ok(Completion {
            content: response.text(),
            usage,
        })
    }

    async fn complete_structured(
        &self,
        request: &CompletionRequest,
        tool: &ToolSpec,
    ) -> Result<Value, GatewayError> {
        let mut body = self.request_body(request);
        body["tools"] = json!([{
            "name": tool.name,
            "description": tool.description,
            "input_schema": tool.input_schema,
        }]);
        body["tool_choice"] = json!({"type": "tool", "name": tool.name});

        let response = self.send(&body).await?;
        debug!(tool = %tool.name, blocks = response.content.len(), "structured call returned");
        response
            .tool_input(&tool.name)
            .ok_or_else(|| GatewayError::Protocol {
                tool: tool.name.clone(),
            })
    }
}
