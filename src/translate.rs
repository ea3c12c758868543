//! Translation of outgoing messages
//!
//! The service itself is a collaborator behind [`Translator`]. The policy
//! here decides when to call it: never for command-looking text, and only
//! when the detected language differs from the target.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::TranslateError;

/// Translation service
#[async_trait]
pub trait Translator: Send + Sync {
    /// Language code of `text`
    async fn detect_language(&self, text: &str) -> Result<String, TranslateError>;

    /// `text` rendered in `target`
    async fn translate(&self, text: &str, target: &str) -> Result<String, TranslateError>;
}

/// Client for a LibreTranslate-compatible HTTP API
pub struct LibreTranslateClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct DetectResponse {
    language: String,
}

#[derive(Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl LibreTranslateClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn body(&self, mut payload: serde_json::Value) -> serde_json::Value {
        if let Some(ref key) = self.api_key {
            payload["api_key"] = serde_json::json!(key);
        }
        payload
    }
}

#[async_trait]
impl Translator for LibreTranslateClient {
    async fn detect_language(&self, text: &str) -> Result<String, TranslateError> {
        let response: Vec<DetectResponse> = self
            .client
            .post(format!("{}/detect", self.base_url))
            .json(&self.body(serde_json::json!({ "q": text })))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .into_iter()
            .next()
            .map(|d| d.language)
            .ok_or_else(|| TranslateError::BadResponse("empty detection result".to_string()))
    }

    async fn translate(&self, text: &str, target: &str) -> Result<String, TranslateError> {
        let response: TranslateResponse = self
            .client
            .post(format!("{}/translate", self.base_url))
            .json(&self.body(serde_json::json!({
                "q": text,
                "source": "auto",
                "target": target,
                "format": "text",
            })))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(response.translated_text)
    }
}

/// Decides whether and how to translate a message
#[derive(Clone)]
pub struct TranslationPolicy {
    translator: Arc<dyn Translator>,
    command_pattern: Regex,
}

impl TranslationPolicy {
    pub fn new(translator: Arc<dyn Translator>, command_prefix: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            translator,
            command_pattern: command_regex(command_prefix)?,
        })
    }

    /// Whether `text` looks like a chat command
    pub fn is_command(&self, text: &str) -> bool {
        self.command_pattern.is_match(text)
    }

    /// Translate `text` into `target` if needed.
    ///
    /// Any service failure leaves the text untranslated.
    pub async fn apply(&self, text: &str, target: &str) -> String {
        if self.is_command(text) {
            return text.to_string();
        }

        let detected = match self.translator.detect_language(text).await {
            Ok(lang) => lang,
            Err(e) => {
                warn!("Language detection failed: {}", e);
                return text.to_string();
            }
        };

        if detected.eq_ignore_ascii_case(target) {
            return text.to_string();
        }

        match self.translator.translate(text, target).await {
            Ok(translated) => {
                debug!("Translated {} -> {}", detected, target);
                translated
            }
            Err(e) => {
                warn!("Translation to {} failed: {}", target, e);
                text.to_string()
            }
        }
    }
}

/// Pattern matching `<prefix><word>` at the start of a message
pub fn command_regex(prefix: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"^{}\w+", regex::escape(prefix)))
}

/// One target chosen uniformly, or none when the list is empty
pub fn pick_target<'a, R: Rng + ?Sized>(targets: &'a [String], rng: &mut R) -> Option<&'a str> {
    targets.choose(rng).map(String::as_str)
}
