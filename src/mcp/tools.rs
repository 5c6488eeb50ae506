//! MCP Tools Implementation
//!
//! The `ask` tool, answering questions about the indexed corpus.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use crate::mcp::server::ToolHandler;
use crate::qa::QaEngine;
use crate::QaError;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

pub const ASK_TOOL_NAME: &str = "ask";

/// Question answering tool handler
pub struct AskHandler {
    engine: Arc<QaEngine>,
}

impl AskHandler {
    /// Create a new ask handler around the shared engine
    #[inline]
    pub fn new(engine: Arc<QaEngine>) -> Self {
        Self { engine }
    }

    /// Create the ask tool definition
    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: ASK_TOOL_NAME.to_string(),
            description: Some(
                "Answer a question using passages retrieved from the indexed corpus".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Natural-language question about the corpus"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        }
    }
}

#[async_trait]
impl ToolHandler for AskHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> McpResult<CallToolResult> {
        let args = params.arguments.unwrap_or_default();

        let question = args
            .get("question")
            .and_then(|v| v.as_str())
            .ok_or_else(|| McpError::InvalidToolParameters {
                tool: ASK_TOOL_NAME.to_string(),
                message: "Missing required parameter: question".to_string(),
            })?
            .to_string();

        debug!("Answering question ({} chars)", question.chars().count());

        let engine = Arc::clone(&self.engine);
        let outcome = tokio::task::spawn_blocking(move || engine.ask(&question))
            .await
            .map_err(|e| McpError::InternalError {
                message: format!("Question answering task failed: {}", e),
            })?;

        match outcome {
            Ok(answer) => Ok(CallToolResult::text(answer.text)),
            Err(e @ QaError::InvalidQuery(_)) => Err(McpError::from(e)),
            Err(e) => {
                error!("Failed to answer question: {}", e);
                Ok(CallToolResult::error(e.to_string()))
            }
        }
    }
}
