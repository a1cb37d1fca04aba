use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use siteqa_core::config::GenerationSettings;
use siteqa_core::error::ModelError;
use siteqa_core::traits::TextGenerator;

use crate::prompt;

/// Offline generator: answers with the top-ranked source passage, cited as
/// `[1]`. Without sources it returns `ungrounded_reply`.
#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    ungrounded_reply: String,
}

impl ExtractiveGenerator {
    pub fn new(ungrounded_reply: impl Into<String>) -> Self {
        Self { ungrounded_reply: ungrounded_reply.into() }
    }
}

impl TextGenerator for ExtractiveGenerator {
    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        Ok(match prompt::first_source(prompt) {
            Some(passage) => format!("{passage} [1]"),
            None => self.ungrounded_reply.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for an Ollama server's `/api/generate` endpoint.
pub struct OllamaGenerator {
    agent: ureq::Agent,
    url: String,
    model: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(settings: &GenerationSettings) -> Self {
        let timeout = settings.timeout();
        let agent = ureq::Agent::config_builder().timeout_global(Some(timeout)).build().into();
        Self {
            agent,
            url: format!("{}/api/generate", settings.ollama_url.trim_end_matches('/')),
            model: settings.model.clone(),
            timeout,
        }
    }
}

impl TextGenerator for OllamaGenerator {
    fn generate(&self, prompt: &str) -> Result<String, ModelError> {
        let body = serde_json::to_string(&GenerateRequest { model: &self.model, prompt, stream: false })
            .map_err(|e| ModelError::InvalidInput(format!("cannot encode request: {e}")))?;
        debug!("POST {} ({} prompt chars)", self.url, prompt.chars().count());
        let raw = self
            .agent
            .post(self.url.as_str())
            .header("Content-Type", "application/json")
            .send(&body)
            .and_then(|mut resp| resp.body_mut().read_to_string())
            .map_err(|e| match e {
                ureq::Error::Timeout(_) => ModelError::Timeout(self.timeout),
                other => ModelError::Unavailable(format!("ollama: {other}")),
            })?;
        let parsed: GenerateResponse =
            serde_json::from_str(&raw).map_err(|e| ModelError::Unavailable(format!("ollama: malformed response: {e}")))?;
        Ok(parsed.response)
    }
}
