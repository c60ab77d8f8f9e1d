use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const ERROR_BODY_LIMIT: usize = 500;

#[derive(Debug, Error)]
pub enum CallError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("service returned {code}: {body}")]
    Status { code: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("empty response")]
    EmptyResponse,
}

/// The external text-completion service. Calls are synchronous and may fail;
/// callers turn an `Err` into a local failure for the step that made it.
pub trait TextCompletion {
    fn complete(&self, system: &str, user: &str) -> Result<String, CallError>;
}

impl<T: TextCompletion + ?Sized> TextCompletion for &T {
    fn complete(&self, system: &str, user: &str) -> Result<String, CallError> {
        (**self).complete(system, user)
    }
}

impl<T: TextCompletion + ?Sized> TextCompletion for Box<T> {
    fn complete(&self, system: &str, user: &str) -> Result<String, CallError> {
        (**self).complete(system, user)
    }
}

/// OpenAI-compatible `/chat/completions` client.
pub struct HttpCompletion {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl HttpCompletion {
    pub fn from_config(config: &Config) -> Result<Self, CallError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|err| CallError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }
}

impl TextCompletion for HttpCompletion {
    fn complete(&self, system: &str, user: &str) -> Result<String, CallError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };
        debug!(model = %self.model, prompt_bytes = user.len(), "completion request");
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .map_err(|err| CallError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CallError::Status {
                code: status.as_u16(),
                body: crate::util::truncate_str_bytes(&body, ERROR_BODY_LIMIT),
            });
        }
        let parsed: ChatResponse = response
            .json()
            .map_err(|err| CallError::Malformed(err.to_string()))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(CallError::EmptyResponse)?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(CallError::EmptyResponse);
        }
        Ok(text)
    }
}

/// Pulls code out of a completion. Prefers a fence tagged with `language`,
/// then any fence, and otherwise takes the whole response.
pub fn extract_code_block(response: &str, language: &str) -> String {
    let response = response.trim();
    let tagged = format!("```{language}");
    if !language.is_empty() {
        if let Some((_, rest)) = response.split_once(&tagged) {
            let body = rest.split("```").next().unwrap_or(rest);
            return body.trim().to_string();
        }
    }
    if let Some((_, rest)) = response.split_once("```") {
        let body = rest.split("```").next().unwrap_or(rest);
        // Drop an info string such as ```py on the opening line.
        let body = match body.split_once('\n') {
            Some((first, tail)) if !first.trim().is_empty() && !first.contains(' ') => tail,
            _ => body,
        };
        return body.trim().to_string();
    }
    response.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_tagged_fence() {
        let text = "Here you go:\n```python\nprint('hi')\n```\nDone.";
        assert_eq!(extract_code_block(text, "python"), "print('hi')");
    }

    #[test]
    fn extracts_untagged_fence_and_plain_text() {
        assert_eq!(extract_code_block("```\nx = 1\n```", "python"), "x = 1");
        assert_eq!(extract_code_block("```py\nx = 1\n```", "python"), "x = 1");
        assert_eq!(extract_code_block("  x = 1  ", "python"), "x = 1");
    }
}
