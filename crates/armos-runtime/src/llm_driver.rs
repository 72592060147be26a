//! [`LlmDriver`] – OpenAI-compatible LLM interface.
//!
//! Communicates with any server exposing `/v1/chat/completions`: a local
//! [Ollama](https://ollama.com) instance (`http://localhost:11434`) or a hosted
//! endpoint reached with a bearer API key.
//!
//! The model's only job here is to turn an operator utterance into one
//! [`CommandMessage`].  [`COMMAND_GUIDELINES`] are injected into every
//! system-role message and the `CommandMessage` JSON Schema is sent via
//! `response_format`.
//!
//! # Example
//!
//! ```rust,no_run
//! use armos_runtime::llm_driver::{LlmDriver, ChatMessage, Role};
//!
//! let driver = LlmDriver::new("http://localhost:11434", "llama3");
//!
//! let messages = vec![
//!     ChatMessage { role: Role::User, content: "pick up the apple".into() },
//! ];
//!
//! // Requires a running model server – skipped in unit tests.
//! // let reply = driver.complete(&messages).await.unwrap();
//! ```

use armos_types::{ArmError, CommandMessage};
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Command guidelines
// ─────────────────────────────────────────────────────────────────────────────

/// Instructions appended to every system-role message sent to the model.
pub const COMMAND_GUIDELINES: &str = r#"You control a robot arm. Convert the user's request into exactly one JSON object and reply with nothing else.
- Pick up an object: {"command": "PICKUP", "target": "<object name>"}
- Put the held object down: {"command": "PLACE", "location": "<place name>"}
- Stop and return home: {"command": "STOP"}
If the request is none of these, reply {"command": "INVALID"}.
Examples:
User: "grab the apple" -> {"command": "PICKUP", "target": "apple"}
User: "put it on the table" -> {"command": "PLACE", "location": "table"}
User: "stop" -> {"command": "STOP"}"#;

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from LLM driver operations.
#[derive(Error, Debug)]
pub enum LlmError {
    /// The HTTP request to the model server failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response from the model server could not be parsed.
    #[error("Unexpected response format: {0}")]
    BadResponse(String),
}

impl From<LlmError> for ArmError {
    fn from(e: LlmError) -> Self {
        ArmError::Llm(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Message types (OpenAI-compatible)
// ─────────────────────────────────────────────────────────────────────────────

/// The role of a participant in a chat conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

/// `response_format` field that enforces structured JSON Schema output.
#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
    json_schema: serde_json::Value,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

// ─────────────────────────────────────────────────────────────────────────────
// LlmDriver
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an OpenAI-compatible chat-completions endpoint.
pub struct LlmDriver {
    base_url: String,
    model: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl LlmDriver {
    /// Create a new driver pointing at `base_url` (e.g. `"http://localhost:11434"`)
    /// and using `model` (e.g. `"llama3"`).
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            client: reqwest::Client::new(),
        }
    }

    /// Send `Authorization: Bearer <key>` with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        let key = api_key.into();
        self.api_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send `messages` to the model and return the assistant's reply text.
    ///
    /// [`COMMAND_GUIDELINES`] are appended to every [`Role::System`] message;
    /// if none is present, one containing only the guidelines is prepended.
    ///
    /// # Errors
    ///
    /// Returns [`LlmError::Http`] if the request fails, or
    /// [`LlmError::BadResponse`] if the response shape is unexpected.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
        let augmented = with_guidelines(messages);

        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatRequest {
            model: &self.model,
            messages: &augmented,
            stream: false,
            temperature: 0.0,
            response_format: ResponseFormat {
                kind: "json_schema",
                json_schema: command_schema(),
            },
        };

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response: ChatResponse = request
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| LlmError::BadResponse("empty choices array".into()))
    }
}

/// `messages` with [`COMMAND_GUIDELINES`] injected into the system role.
fn with_guidelines(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let mut augmented: Vec<ChatMessage> = messages
        .iter()
        .map(|m| {
            if m.role == Role::System {
                ChatMessage {
                    role: Role::System,
                    content: format!("{}\n\n{}", m.content, COMMAND_GUIDELINES),
                }
            } else {
                m.clone()
            }
        })
        .collect();

    if !augmented.iter().any(|m| m.role == Role::System) {
        augmented.insert(
            0,
            ChatMessage {
                role: Role::System,
                content: COMMAND_GUIDELINES.to_string(),
            },
        );
    }
    augmented
}

fn command_schema() -> serde_json::Value {
    serde_json::to_value(schema_for!(CommandMessage)).unwrap_or(serde_json::Value::Null)
}

/// Extract a [`CommandMessage`] from free-form model output.
///
/// Models like to wrap JSON in prose or a markdown fence, so the text between
/// the first `{` and the last `}` is parsed.
///
/// # Errors
///
/// Returns [`LlmError::BadResponse`] when no braces are present or the
/// enclosed text is not a command object.
pub fn parse_command_reply(reply: &str) -> Result<CommandMessage, LlmError> {
    let (Some(start), Some(end)) = (reply.find('{'), reply.rfind('}')) else {
        return Err(LlmError::BadResponse(format!("no JSON object in reply: {reply}")));
    };
    if end < start {
        return Err(LlmError::BadResponse(format!("no JSON object in reply: {reply}")));
    }
    serde_json::from_str(&reply[start..=end])
        .map_err(|e| LlmError::BadResponse(format!("{e}: {}", &reply[start..=end])))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_message_role_variants_serialize() {
        let roles = [
            (Role::System, "system"),
            (Role::User, "user"),
            (Role::Assistant, "assistant"),
        ];
        for (role, expected) in roles {
            let msg = ChatMessage {
                role,
                content: String::new(),
            };
            let json = serde_json::to_string(&msg).unwrap();
            assert!(json.contains(expected));
        }
    }

    #[test]
    fn guidelines_are_appended_to_system_message() {
        let messages = vec![ChatMessage {
            role: Role::System,
            content: "Be brief.".into(),
        }];
        let augmented = with_guidelines(&messages);
        assert_eq!(augmented.len(), 1);
        assert!(augmented[0].content.starts_with("Be brief."));
        assert!(augmented[0].content.contains("PICKUP"));
    }

    #[test]
    fn guidelines_prepended_when_no_system_message() {
        let messages = vec![ChatMessage {
            role: Role::User,
            content: "grab the cup".into(),
        }];
        let augmented = with_guidelines(&messages);
        assert_eq!(augmented.len(), 2);
        assert_eq!(augmented[0].role, Role::System);
        assert_eq!(augmented[1].content, "grab the cup");
    }

    #[test]
    fn command_schema_lists_every_command() {
        let schema = command_schema().to_string();
        for name in ["PICKUP", "PLACE", "STOP", "INVALID"] {
            assert!(schema.contains(name), "schema is missing {name}");
        }
        // The catch-all only exists for parsing; the model must never pick it.
        assert!(!schema.contains("UNKNOWN"));
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let driver = LlmDriver::new("http://localhost:11434/", "llama3").with_api_key("");
        assert!(driver.api_key.is_none());
        assert_eq!(driver.base_url, "http://localhost:11434");
        assert_eq!(driver.model(), "llama3");
    }

    #[test]
    fn reply_wrapped_in_markdown_is_parsed() {
        let reply = "Sure!\n```json\n{\"command\": \"PICKUP\", \"target\": \"apple\"}\n```";
        assert_eq!(
            parse_command_reply(reply).unwrap(),
            CommandMessage::Pickup {
                target: Some("apple".into())
            }
        );
    }

    #[test]
    fn reply_without_object_is_rejected() {
        assert!(matches!(
            parse_command_reply("I cannot help with that."),
            Err(LlmError::BadResponse(_))
        ));
        assert!(parse_command_reply("} backwards {").is_err());
        assert!(parse_command_reply("{not json}").is_err());
    }
}
