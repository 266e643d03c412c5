//! Chat-assistant facade for the security dashboard.
//!
//! One bounded-timeout call to an OpenAI-compatible chat-completions
//! endpoint (OpenRouter), falling back to a deterministic rule-based answer
//! whenever no credential is configured or the remote call fails. The caller
//! always gets usable text back.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-20b:free";
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

const SYSTEM_PROMPT: &str = "You are a helpful cybersecurity analyst assistant for a university \
     dashboard. Explain trends, severity priorities, and risks clearly for a first-year computer \
     science student. Be concise and practical.\n";

#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("HTTP {status} | {body}")]
    Status { status: u16, body: String },
    #[error("{0}")]
    Transport(String),
    #[error("response contained no choices: {0}")]
    NoChoices(String),
}

/// Remote-call configuration, resolved once at construction rather than read
/// from the environment per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    /// Bearer credential; `None` routes every call to the offline answer.
    pub api_key: Option<String>,
    /// Chat-completions endpoint (default: OpenRouter).
    pub base_url: String,
    pub model: String,
    /// Request timeout in seconds (default: 30)
    pub timeout_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 30,
        }
    }
}

impl AssistantConfig {
    /// Defaults plus the `OPENROUTER_API_KEY` credential, if set. A missing
    /// variable is not an error; it selects the offline path.
    #[must_use]
    pub fn from_env() -> Self {
        Self { api_key: std::env::var(API_KEY_ENV).ok(), ..Self::default() }
    }
}

/// Stateless facade over the remote model: exactly one attempt per call, no
/// retry loop.
pub struct Assistant {
    config: AssistantConfig,
    agent: ureq::Agent,
}

impl Assistant {
    #[must_use]
    pub fn new(config: AssistantConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build();
        Self { config, agent }
    }

    /// Answer a free-text question, optionally grounded in a caller-supplied
    /// summary of the current incidents.
    ///
    /// Remote failures are recovered locally: the error text is surfaced
    /// inline, followed by the rule-based answer.
    #[must_use]
    pub fn answer(&self, question: &str, context: Option<&str>) -> String {
        let Some(api_key) = self.config.api_key.as_deref() else {
            return offline_answer(question, context);
        };

        match self.remote_answer(api_key, question, context) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!("assistant API call failed: {err}");
                format!(
                    "Error calling the assistant API: {err}\n\n{}",
                    offline_answer(question, context)
                )
            }
        }
    }

    /// Probe the remote credential and endpoint; returns human-readable
    /// outcome text either way.
    #[must_use]
    pub fn health_check(&self) -> String {
        match self.config.api_key.as_deref() {
            None => format!("{API_KEY_ENV} is not set; assistant calls run offline."),
            Some(api_key) => {
                match self.remote_answer(api_key, "Say 'OK' only.", Some("Context: health check")) {
                    Ok(text) => text,
                    Err(err) => format!("Assistant API check failed: {err}"),
                }
            }
        }
    }

    fn remote_answer(
        &self,
        api_key: &str,
        question: &str,
        context: Option<&str>,
    ) -> Result<String, AssistantError> {
        let mut system_prompt = SYSTEM_PROMPT.to_string();
        if let Some(context) = context {
            system_prompt.push_str("\nHere is a summary of the current incidents:\n");
            system_prompt.push_str(context);
            system_prompt.push('\n');
        }

        let payload = serde_json::json!({
            "model": self.config.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": question},
            ],
            "temperature": 0.2,
            "max_tokens": 400,
        });

        let response = match self
            .agent
            .post(&self.config.base_url)
            .set("Authorization", &format!("Bearer {api_key}"))
            .set("Content-Type", "application/json")
            .send_json(payload)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(AssistantError::Status { status, body });
            }
            Err(err) => return Err(AssistantError::Transport(err.to_string())),
        };

        let data: Value = response
            .into_json()
            .map_err(|err| AssistantError::Transport(err.to_string()))?;

        let Some(choices) = data.get("choices").and_then(Value::as_array).filter(|c| !c.is_empty())
        else {
            return Err(AssistantError::NoChoices(data.to_string()));
        };

        let content = choices[0]["message"]["content"].as_str().unwrap_or("").trim();
        if content.is_empty() {
            Ok("The assistant API returned an empty message.".to_string())
        } else {
            Ok(content.to_string())
        }
    }
}

/// Deterministic rule-based answer: fixed preamble, optional verbatim context
/// echo, keyword-selected advice blocks, fixed closing disclaimer. Same
/// inputs, same bytes.
#[must_use]
pub fn offline_answer(question: &str, context: Option<&str>) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(
        "Offline assistant mode (no usable AI API call succeeded).\n\
         Below is a rule-based analysis based on your incident data."
            .to_string(),
    );

    if let Some(context) = context {
        parts.push(format!("\nIncident summary:\n{context}"));
    }

    let question = question.to_lowercase();

    if question.contains("priorit") || question.contains("first") {
        parts.push(
            "\nPrioritisation advice:\n\
             - Resolve High/Critical incidents that are still Open first.\n\
             - Next, clear Medium incidents that have been open for a long time.\n\
             - Low severity incidents can be grouped and handled in batches."
                .to_string(),
        );
    }

    if question.contains("phishing") {
        parts.push(
            "\nPhishing guidance:\n\
             - Check if a large share of incidents are phishing emails.\n\
             - If yes, recommend short staff training and stronger email filtering rules.\n\
             - Monitor how phishing incidents change after these actions."
                .to_string(),
        );
    }

    if question.contains("backlog") || question.contains("bottleneck") {
        parts.push(
            "\nBacklog / bottleneck analysis:\n\
             - A high count of Open incidents suggests insufficient capacity.\n\
             - Many incidents stuck In Progress can indicate process bottlenecks.\n\
             - Compare incident counts per assignee to detect imbalances."
                .to_string(),
        );
    }

    if parts.len() == 1 {
        parts.push(
            "\nGeneral guidance:\n\
             - Use the filters and charts above to inspect which incident types, severities, \
             and assignees dominate, then adjust playbooks accordingly."
                .to_string(),
        );
    }

    parts.push(
        "\nIn a full deployment, this panel sends the same question and context to the \
         OpenRouter model via the OpenRouter API."
            .to_string(),
    );

    parts.join("\n")
}
