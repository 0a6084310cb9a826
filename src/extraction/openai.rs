use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use spendlog_core::Category;

use super::{
    advice_prompt, extraction_prompt, parse_extraction, AdviceRequest, Extraction, Extractor,
    ADVICE_UNAVAILABLE,
};
use crate::config::ExtractionConfig;

/// System message that precedes every advice prompt.
pub const ADVISOR_PERSONA: &str = "You are a helpful financial advisor.";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model service answered {0}")]
    Status(StatusCode),
    #[error("response carried no message content")]
    EmptyContent,
    #[error("no API key configured")]
    MissingApiKey,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Client for an OpenAI-compatible chat and transcription API.
pub struct OpenAiExtractor {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    transcription_model: String,
    advice_model: String,
}

impl OpenAiExtractor {
    pub fn new(config: &ExtractionConfig) -> Result<Self, ClientError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ClientError::MissingApiKey)?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            transcription_model: config.transcription_model.clone(),
            advice_model: config.advice_model.clone(),
        })
    }

    async fn chat(&self, body: serde_json::Value) -> Result<String, ClientError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }

        let parsed: ChatResponse = response.json().await?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(ClientError::EmptyContent)
    }

    async fn request_transcription(&self, audio: Vec<u8>) -> Result<String, ClientError> {
        let file = multipart::Part::bytes(audio)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;
        let form = multipart::Form::new()
            .text("model", self.transcription_model.clone())
            .part("file", file);

        let response = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ClientError::Status(response.status()));
        }

        let parsed: TranscriptionResponse = response.json().await?;
        Ok(parsed.text)
    }
}

#[async_trait]
impl Extractor for OpenAiExtractor {
    async fn extract(&self, text: &str, categories: &[Category]) -> Extraction {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": extraction_prompt(text, categories) }
            ],
            "temperature": 0.1,
            "max_tokens": 150,
            "response_format": { "type": "json_object" },
        });

        match self.chat(body).await {
            Ok(content) => parse_extraction(&content, categories),
            Err(e) => {
                tracing::warn!(error = %e, "Expense extraction request failed");
                Extraction::failed(e.to_string())
            }
        }
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Option<String> {
        match self.request_transcription(audio).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Transcription request failed");
                None
            }
        }
    }

    async fn advise(&self, request: &AdviceRequest<'_>) -> String {
        let body = json!({
            "model": self.advice_model,
            "messages": [
                { "role": "system", "content": ADVISOR_PERSONA },
                { "role": "user", "content": advice_prompt(request) }
            ],
        });

        match self.chat(body).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(error = %e, "Advice request failed");
                ADVICE_UNAVAILABLE.to_string()
            }
        }
    }
}
