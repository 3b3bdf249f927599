use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::embedding::Embedder;
use super::llm::ChatClient;
use crate::error::{LedgerError, Result};
use crate::settings::OpenAiSettings;

const TEMPERATURE: f32 = 0.2;
const MAX_REPLY_TOKENS: u32 = 4000;

/// Blocking client for the embeddings and chat completions endpoints.
pub struct OpenAiClient {
    http: Client,
    base_url: String,
    api_key: String,
    embedding_model: String,
    chat_model: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings, api_key: String) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key,
            embedding_model: settings.embedding_model.clone(),
            chat_model: settings.chat_model.clone(),
        })
    }

    fn post<B: Serialize, R: for<'de> Deserialize<'de>>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}/{path}", self.base_url);
        tracing::debug!("POST {url}");
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()?
            .error_for_status()?;
        Ok(response.json()?)
    }
}

impl Embedder for OpenAiClient {
    fn model(&self) -> &str {
        &self.embedding_model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let response: EmbeddingResponse = self.post(
            "embeddings",
            &EmbeddingRequest {
                model: &self.embedding_model,
                input: texts,
            },
        )?;
        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

impl ChatClient for OpenAiClient {
    fn complete(&self, system: &str, user: &str) -> Result<String> {
        let response: ChatResponse = self.post(
            "chat/completions",
            &ChatRequest {
                model: &self.chat_model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: system,
                    },
                    ChatMessage {
                        role: "user",
                        content: user,
                    },
                ],
                temperature: TEMPERATURE,
                max_tokens: MAX_REPLY_TOKENS,
            },
        )?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| LedgerError::Other("empty chat completion".to_string()))
    }
}
