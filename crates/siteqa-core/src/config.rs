//! Typed configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (nested keys separated by `__`, e.g. `APP_GATE__THRESHOLD=0.4`). Every
//! numeric constant the pipeline relies on is validated once at startup.
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Metric;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub index: IndexSettings,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub rerank: RerankSettings,
    pub gate: GateSettings,
    pub generation: GenerationSettings,
    pub intent: IntentSettings,
    pub session: SessionSettings,
    pub cache: CacheSettings,
    pub prompt: PromptSettings,
    pub fallback: FallbackSettings,
    pub retry: RetrySettings,
    pub responses: ResponseTexts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub dir: String,
    pub metric: Metric,
    pub dimension: usize,
    /// Superseded snapshot versions kept on disk after a swap.
    pub keep_versions: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self { dir: "data/index".to_string(), metric: Metric::Cosine, dimension: 384, keep_versions: 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingProvider {
    #[default]
    Hash,
    BgeM3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model_dir: Option<String>,
    pub max_input_chars: usize,
    pub timeout_ms: u64,
    pub batch_size: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { provider: EmbeddingProvider::Hash, model_dir: None, max_input_chars: 2000, timeout_ms: 5_000, batch_size: 32 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// Candidates pulled from the index per query (before re-ranking).
    pub candidate_k: usize,
    /// Over-fetch factor applied when a metadata filter is active.
    pub oversample: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { candidate_k: 20, oversample: 4 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    /// Maximum ranked candidates kept after re-ranking.
    pub top_k: usize,
    pub batch_size: usize,
    pub timeout_ms: u64,
    /// Inclusive range of scores the relevance model can produce.
    pub score_min: f32,
    pub score_max: f32,
}

impl Default for RerankSettings {
    fn default() -> Self {
        Self { top_k: 5, batch_size: 16, timeout_ms: 3_000, score_min: 0.0, score_max: 1.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    pub threshold: f32,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self { threshold: 0.35 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationProvider {
    #[default]
    Extractive,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub provider: GenerationProvider,
    pub ollama_url: String,
    pub model: String,
    pub max_input_chars: usize,
    pub timeout_ms: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: GenerationProvider::Extractive,
            ollama_url: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            max_input_chars: 16_000,
            timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentSettings {
    pub timeout_ms: u64,
    /// Category filter applied to retrieval for contact questions.
    pub contact_category: Option<String>,
}

impl Default for IntentSettings {
    fn default() -> Self {
        Self { timeout_ms: 500, contact_category: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Turns retained per session.
    pub max_turns: usize,
    /// Most recent turns replayed into the prompt.
    pub history_turns: usize,
    pub idle_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self { max_turns: 20, history_turns: 3, idle_timeout_secs: 1_800 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
    pub scope_by_session: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true, ttl_secs: 600, max_entries: 1_024, scope_by_session: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    pub max_context_chars: usize,
    /// Longer questions are cut to this many characters in the prompt.
    pub max_query_chars: usize,
    pub system: String,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            max_context_chars: 6_000,
            max_query_chars: 2_000,
            system: "You answer questions about our organization using only the numbered sources below. \
                     Cite sources as [n]. If the sources do not contain the answer, say so."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    #[default]
    Generate,
    Canned,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FallbackSettings {
    pub mode: FallbackMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Attempts per gateway call, including the first.
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 2, backoff_ms: 100 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseTexts {
    pub apology: String,
    pub invalid_input: String,
    pub out_of_scope: String,
    pub greeting: String,
    pub insufficient_context: String,
    pub ungrounded_notice: String,
}

impl Default for ResponseTexts {
    fn default() -> Self {
        Self {
            apology: "Sorry, something went wrong while answering your question. Please try again in a moment.".to_string(),
            invalid_input: "Please enter a question.".to_string(),
            out_of_scope: "I can only help with questions about our company, our services and how to reach us.".to_string(),
            greeting: "Hello! Ask me anything about our company, our services or how to get in touch.".to_string(),
            insufficient_context: "I couldn't find anything on our website that answers that question.".to_string(),
            ungrounded_notice: "Note: this answer is not based on our website content.".to_string(),
        }
    }
}

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

impl EmbeddingSettings {
    pub fn timeout(&self) -> Duration {
        ms(self.timeout_ms)
    }
}

impl RerankSettings {
    pub fn timeout(&self) -> Duration {
        ms(self.timeout_ms)
    }

    pub fn contains(&self, score: f32) -> bool {
        score.is_finite() && score >= self.score_min && score <= self.score_max
    }
}

impl GenerationSettings {
    pub fn timeout(&self) -> Duration {
        ms(self.timeout_ms)
    }
}

impl IntentSettings {
    pub fn timeout(&self) -> Duration {
        ms(self.timeout_ms)
    }
}

impl Settings {
    /// Load for the environment named by `RUST_ENV` (default `dev`).
    pub fn load() -> ConfigResult<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> ConfigResult<Self> {
        Self::from_figment(Self::figment(env_name))
    }

    /// Defaults, then `config.toml`, then the env-specific file, then `APP_*`.
    pub fn figment(env_name: &str) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment.merge(Env::prefixed("APP_").split("__"))
    }

    pub fn from_figment(figment: Figment) -> ConfigResult<Self> {
        let settings: Settings = figment.extract().map_err(Box::new)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        fn invalid(msg: impl Into<String>) -> ConfigResult<()> {
            Err(ConfigError::Invalid(msg.into()))
        }

        if self.index.dimension == 0 {
            return invalid("index.dimension must be > 0");
        }
        if self.retrieval.candidate_k == 0 {
            return invalid("retrieval.candidate_k must be >= 1");
        }
        if self.retrieval.oversample == 0 {
            return invalid("retrieval.oversample must be >= 1");
        }
        if self.rerank.top_k == 0 {
            return invalid("rerank.top_k must be >= 1");
        }
        if self.rerank.top_k > self.retrieval.candidate_k {
            return invalid(format!(
                "rerank.top_k ({}) cannot exceed retrieval.candidate_k ({})",
                self.rerank.top_k, self.retrieval.candidate_k
            ));
        }
        if self.rerank.batch_size == 0 || self.embedding.batch_size == 0 {
            return invalid("batch sizes must be >= 1");
        }
        let (lo, hi) = (self.rerank.score_min, self.rerank.score_max);
        if !lo.is_finite() || !hi.is_finite() || lo >= hi {
            return invalid(format!("rerank score range [{lo}, {hi}] is not a finite, non-empty interval"));
        }
        let t = self.gate.threshold;
        if !t.is_finite() || t < lo || t > hi {
            return invalid(format!("gate.threshold {t} lies outside the rerank score range [{lo}, {hi}]"));
        }
        if self.embedding.max_input_chars == 0 || self.generation.max_input_chars == 0 {
            return invalid("max_input_chars must be > 0");
        }
        if self.prompt.max_context_chars == 0 || self.prompt.max_query_chars == 0 {
            return invalid("prompt.max_context_chars and prompt.max_query_chars must be > 0");
        }
        let reserved = self.prompt.max_context_chars + self.prompt.max_query_chars;
        if reserved >= self.generation.max_input_chars {
            return invalid(format!(
                "prompt.max_context_chars + prompt.max_query_chars ({reserved}) must be below generation.max_input_chars ({})",
                self.generation.max_input_chars
            ));
        }
        if [self.embedding.timeout_ms, self.rerank.timeout_ms, self.generation.timeout_ms, self.intent.timeout_ms]
            .contains(&0)
        {
            return invalid("timeouts must be > 0");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be >= 1");
        }
        if self.session.max_turns < self.session.history_turns {
            return invalid("session.history_turns cannot exceed session.max_turns");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be >= 1 when the cache is enabled");
        }
        Ok(())
    }

    pub fn index_dir(&self) -> PathBuf {
        expand_path(&self.index.dir)
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::providers::Toml;

    fn from_toml(toml: &str) -> ConfigResult<Settings> {
        Settings::from_figment(Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(toml)))
    }

    #[test]
    fn defaults_are_valid() {
        Settings::default().validate().expect("defaults validate");
    }

    #[test]
    fn toml_overrides_nested_keys() {
        let s = from_toml(
            r#"
            [index]
            metric = "dot"
            dimension = 8

            [gate]
            threshold = 0.5

            [fallback]
            mode = "canned"
            "#,
        )
        .expect("valid");
        assert_eq!(s.index.metric, Metric::Dot);
        assert_eq!(s.index.dimension, 8);
        assert_eq!(s.fallback.mode, FallbackMode::Canned);
        assert_eq!(s.rerank.top_k, RerankSettings::default().top_k);
    }

    #[test]
    fn threshold_outside_score_range_is_rejected() {
        let err = from_toml("[gate]\nthreshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("gate.threshold")));
    }

    #[test]
    fn unknown_metric_fails_to_load() {
        let err = from_toml("[index]\nmetric = \"manhattan\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Load(_)));
    }

    #[test]
    fn top_k_cannot_exceed_candidate_k() {
        let mut s = Settings::default();
        s.retrieval.candidate_k = 3;
        s.rerank.top_k = 4;
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let mut s = Settings::default();
        s.generation.timeout_ms = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn prompt_context_and_query_must_fit_generation_input() {
        let mut s = Settings::default();
        s.prompt.max_context_chars = s.generation.max_input_chars;
        assert!(s.validate().is_err());

        let mut s = Settings::default();
        s.prompt.max_query_chars = s.generation.max_input_chars - s.prompt.max_context_chars;
        assert!(s.validate().is_err());
        s.prompt.max_query_chars -= 1;
        assert!(s.validate().is_ok());
    }
}
