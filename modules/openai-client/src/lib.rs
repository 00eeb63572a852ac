pub mod error;

pub use error::{OpenAiError, Result};

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const BASE_URL: &str = "https://api.openai.com/v1";

/// Character budget for replies (the platform's post limit).
pub const REPLY_CHAR_LIMIT: usize = 280;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

const PERSONA: &str = "You are a humorous and opinionated individual who has something \
to say about everything. Your responses should be witty, sometimes sarcastic, and always \
entertaining. When asked to roast something, you become savagely critical without holding back.";

pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

/// Inputs for one reply generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplyPrompt<'a> {
    pub current_post: &'a str,
    pub parent_post: Option<&'a str>,
    pub author_handle: &'a str,
    pub tone: Option<&'a str>,
    pub trend_hint: Option<&'a str>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    n: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Generate a persona reply to a mention, bounded to the platform's
    /// character limit. `parent_post` adds thread context when available;
    /// `tone` and `trend_hint` steer the persona without changing it.
    pub async fn generate_reply(&self, prompt: &ReplyPrompt<'_>) -> Result<String> {
        let system = build_system_prompt(prompt);

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage { role: "system", content: &system },
                ChatMessage {
                    role: "user",
                    content: "Generate a response within 280 characters:",
                },
            ],
            temperature: 0.9,
            max_tokens: 150,
            n: 1,
        };

        let resp = self
            .client
            .post(format!("{BASE_URL}/chat/completions"))
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OpenAiError::Timeout(self.timeout_secs)
                } else {
                    OpenAiError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OpenAiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let completion: ChatResponse = resp
            .json()
            .await
            .map_err(|e| OpenAiError::Parse(e.to_string()))?;
        let text = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(OpenAiError::EmptyCompletion)?;

        let text = truncate_reply(text);
        debug!(chars = text.chars().count(), "Generated reply");
        info!(
            prompt_prefix = %prompt.current_post.chars().take(50).collect::<String>(),
            "Generated response"
        );
        Ok(text)
    }
}

fn build_system_prompt(prompt: &ReplyPrompt<'_>) -> String {
    let mut system = PERSONA.to_string();
    if let Some(tone) = prompt.tone {
        system.push_str(&format!("\nCurrent mood: lean {tone}."));
    }
    if let Some(hint) = prompt.trend_hint {
        system.push_str(&format!(
            "\nIf it fits naturally, work in the trending topic \"{hint}\"."
        ));
    }
    if let Some(parent) = prompt.parent_post {
        system.push_str(&format!("\n\nParent Post: {parent}"));
        system.push_str(&format!(
            "\nResponding to @{}: {}",
            prompt.author_handle, prompt.current_post
        ));
    } else {
        system.push_str(&format!(
            "\n\nResponding to @{}: {}",
            prompt.author_handle, prompt.current_post
        ));
    }
    system
}

/// Hard-bound a reply to the platform limit, cutting on a char boundary.
fn truncate_reply(text: String) -> String {
    if text.chars().count() <= REPLY_CHAR_LIMIT {
        return text;
    }
    text.chars().take(REPLY_CHAR_LIMIT - 1).collect::<String>() + "…"
}
