//! Scripted gateway for testing: replays queued replies in order.

use super::{Completion, CompletionRequest, GatewayError, ModelGateway, TokenUsage, ToolSpec};
use crate::domain::word_count;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

/// One queued reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedReply {
    /// Free text. Answering a structured call with text is a protocol error.
    Text(String),
    /// Arguments of the requested tool.
    Tool(Value),
    /// A structured response that invokes no tool.
    NoToolCall,
    /// The call fails at the API level.
    Failure(String),
}

/// A call the gateway received.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub system: String,
    pub prompt: String,
    /// Forced tool name for structured calls
    pub tool: Option<String>,
}

/// Deterministic [`ModelGateway`] that pops one reply per call.
///
/// Free-text calls fall back to `fallback_text` once the queue is empty.
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<ScriptedReply>>,
    fallback_text: Option<String>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, reply: ScriptedReply) -> Self {
        self.enqueue(reply);
        self
    }

    /// Queue a reply on a gateway that is already shared.
    pub fn enqueue(&self, reply: ScriptedReply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.push_back(reply);
        }
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.push(ScriptedReply::Text(text.into()))
    }

    pub fn with_tool(self, input: Value) -> Self {
        self.push(ScriptedReply::Tool(input))
    }

    pub fn with_no_tool_call(self) -> Self {
        self.push(ScriptedReply::NoToolCall)
    }

    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(ScriptedReply::Failure(message.into()))
    }

    /// Text returned by free-text calls when no reply is queued.
    pub fn with_fallback_text(mut self, text: impl Into<String>) -> Self {
        self.fallback_text = Some(text.into());
        self
    }

    /// Calls received so far, oldest first.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|r| r.len()).unwrap_or_default()
    }

    fn next(&self, request: &CompletionRequest, tool: Option<&str>) -> Option<ScriptedReply> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                system: request.system.clone(),
                prompt: request.prompt.clone(),
                tool: tool.map(str::to_string),
            });
        }
        self.replies.lock().ok().and_then(|mut r| r.pop_front())
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, GatewayError> {
        let text = match self.next(request, None) {
            Some(ScriptedReply::Text(text)) => text,
            Some(ScriptedReply::Failure(message)) => {
                return Err(GatewayError::Api {
                    status: 500,
                    body: message,
                })
            }
            Some(other) => {
                return Err(GatewayError::Unavailable(format!(
                    "scripted {:?} cannot answer a free-text call",
                    other
                )))
            }
            None => self
                .fallback_text
                .clone()
                .ok_or_else(|| GatewayError::Unavailable("script exhausted".to_string()))?,
        };
        Ok(Completion {
            usage: TokenUsage {
                input_tokens: word_count(&request.prompt) as u32,
                output_tokens: word_count(&text) as u32,
                model: "scripted".to_string(),
            },
            content: text,
        })
    }

    async fn complete_structured(
        &self,
        request: &CompletionRequest,
        tool: &ToolSpec,
    ) -> Result<Value, GatewayError> {
        match self.next(request, Some(&tool.name)) {
            Some(ScriptedReply::Tool(input)) => Ok(input),
            Some(ScriptedReply::Text(_)) | Some(ScriptedReply::NoToolCall) => Err(GatewayError::Protocol {
                tool: tool.name.clone(),
            }),
            Some(ScriptedReply::Failure(message)) => Err(GatewayError::Api {
                status: 500,
                body: message,
            }),
            None => Err(GatewayError::Unavailable("script exhausted".to_string())),
        }
    }
}
