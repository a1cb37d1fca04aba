//! Query intent classification.
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use siteqa_core::error::ModelError;
use siteqa_core::traits::IntentModel;
use siteqa_core::types::Intent;

use crate::gateway::call_blocking;

const GREETINGS: &[&str] = &[
    "hi", "hello", "hey", "hiya", "howdy", "greetings", "good morning", "good afternoon", "good evening", "thanks",
    "thank you", "cheers", "bye", "goodbye",
];

const CONTACT: &[&str] = &[
    "contact", "email", "e-mail", "phone", "call", "reach", "get in touch", "address", "office", "offices",
    "located", "location", "hours", "visit", "talk to", "speak to", "sales team", "support team",
];

const OUT_OF_SCOPE: &[&str] = &[
    "weather", "recipe", "recipes", "horoscope", "lottery", "joke", "jokes", "poem", "song", "lyrics", "movie",
    "movies", "celebrity", "football", "soccer", "cricket", "bitcoin price", "stock price", "sports score",
    "capital of", "homework",
];

/// Rule-based intent model over fixed keyword lists.
///
/// A query made only of greeting words is a `Greeting`; a query naming an
/// off-topic subject is `OutOfScope`; contact vocabulary makes it `Contact`;
/// anything else is `Informational`.
#[derive(Debug, Clone)]
pub struct KeywordIntentModel {
    greetings: Vec<String>,
    contact: Vec<String>,
    out_of_scope: Vec<String>,
}

impl Default for KeywordIntentModel {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self { greetings: owned(GREETINGS), contact: owned(CONTACT), out_of_scope: owned(OUT_OF_SCOPE) }
    }
}

impl KeywordIntentModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_out_of_scope(mut self, terms: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.out_of_scope.extend(terms.into_iter().map(|t| t.into().to_lowercase()));
        self
    }

    fn rule(&self, query: &str) -> Intent {
        let words: Vec<String> = query
            .split(|c: char| !(c.is_alphanumeric() || c == '-'))
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        if words.is_empty() {
            return Intent::OutOfScope;
        }
        let padded = format!(" {} ", words.join(" "));
        let has = |term: &String| padded.contains(&format!(" {term} "));

        let mut rest = padded.clone();
        for g in &self.greetings {
            let pattern = format!(" {g} ");
            while rest.contains(&pattern) {
                rest = rest.replace(&pattern, " ");
            }
        }
        if rest.trim().is_empty() || rest.trim().split(' ').all(|w| matches!(w, "there" | "team" | "you" | "so" | "much")) {
            return Intent::Greeting;
        }
        if self.out_of_scope.iter().any(has) {
            return Intent::OutOfScope;
        }
        if self.contact.iter().any(has) {
            return Intent::Contact;
        }
        Intent::Informational
    }
}

impl IntentModel for KeywordIntentModel {
    fn classify(&self, query: &str) -> Result<Intent, ModelError> {
        Ok(self.rule(query))
    }
}

/// Runs an [`IntentModel`] under a timeout, defaulting to `Informational`
/// whenever the model cannot answer.
#[derive(Clone)]
pub struct IntentClassifier {
    model: Arc<dyn IntentModel>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn IntentModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn classify(&self, query: &str) -> Intent {
        let model = Arc::clone(&self.model);
        let owned = query.to_string();
        match call_blocking(self.timeout, move || model.classify(&owned)).await {
            Ok(intent) => {
                debug!("Classified query as {:?}", intent);
                intent
            }
            Err(e) => {
                warn!("Intent classification failed ({}); treating as informational", e);
                Intent::Informational
            }
        }
    }
}
