//! Optional chunk enrichment: embeddings and entity extraction.
//!
//! Both collaborators are external services and both are optional. A
//! failure here never fails the file; it becomes a warning on the chunks.
//!
//! # Retry Strategy
//!
//! The OpenAI embedder retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::{EmbeddingConfig, EntitiesConfig};
use crate::error::{class_from_status, ErrorClass, ProcessError};
use crate::models::{ChunkRecord, Entity};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

pub trait Embedder: Send {
    fn model_name(&self) -> &str;
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProcessError>;
}

pub trait EntityExtractor: Send {
    fn extract(&self, text: &str) -> Result<Vec<Entity>, ProcessError>;
}

fn api_key() -> Result<String, ProcessError> {
    std::env::var("OPENAI_API_KEY")
        .map_err(|_| ProcessError::permanent("OPENAI_API_KEY environment variable not set"))
}

/// Embedding provider using the OpenAI API.
pub struct OpenAiEmbedder {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, ProcessError> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| ProcessError::permanent("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| ProcessError::permanent("embedding.dims required for OpenAI provider"))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key()?,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProcessError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                std::thread::sleep(Duration::from_secs(1 << (attempt - 1).min(5)));
            }
            let response = match self
                .client
                .post(OPENAI_EMBEDDINGS_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(ProcessError::from(e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response.json()?;
                return parse_openai_response(&json, self.dims);
            }
            let text = response.text().unwrap_or_default();
            let err = ProcessError::new(
                class_from_status(status.as_u16()),
                format!("OpenAI API error {}: {}", status, text),
            );
            if err.class != ErrorClass::Transient {
                return Err(err);
            }
            last_err = Some(err);
        }
        Err(last_err.unwrap_or_else(|| ProcessError::transient("embedding failed after retries")))
    }
}

impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProcessError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch)?);
        }
        Ok(out)
    }
}

/// Pull `data[].embedding` arrays out of an embeddings response, in
/// `index` order.
fn parse_openai_response(
    json: &serde_json::Value,
    dims: usize,
) -> Result<Vec<Vec<f32>>, ProcessError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProcessError::permanent("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProcessError::permanent("invalid OpenAI response: missing embedding"))?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        if vec.len() != dims {
            return Err(ProcessError::permanent(format!(
                "invalid OpenAI response: expected {} dims, got {}",
                dims,
                vec.len()
            )));
        }
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Entity extraction through a chat-completions endpoint that is asked to
/// answer with a JSON array of `{"type", "text"}` objects.
pub struct ChatEntityExtractor {
    client: reqwest::blocking::Client,
    api_key: String,
    endpoint: String,
    model: String,
}

const ENTITY_PROMPT: &str = "Extract named entities (people, organizations, locations, dates, \
identifiers) from the user's text. Reply with only a JSON array of objects with keys \
\"type\" and \"text\".";

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
    content: String,
}

impl ChatEntityExtractor {
    pub fn new(config: &EntitiesConfig) -> Result<Self, ProcessError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key()?,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        })
    }
}

impl EntityExtractor for ChatEntityExtractor {
    fn extract(&self, text: &str) -> Result<Vec<Entity>, ProcessError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": ENTITY_PROMPT},
                {"role": "user", "content": text},
            ],
        });
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProcessError::new(
                class_from_status(status.as_u16()),
                format!("entity extraction error {}", status),
            ));
        }
        let parsed: ChatResponse = response.json()?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("[]");
        parse_entities(content)
    }
}

/// Parse the model's answer, tolerating a fenced code block around it.
fn parse_entities(content: &str) -> Result<Vec<Entity>, ProcessError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    Ok(serde_json::from_str(trimmed)?)
}

/// Attach embeddings and entities to `records` in place. Returns warnings
/// for anything that could not be enriched.
pub fn enrich_records(
    records: &mut [ChunkRecord],
    embedder: Option<&dyn Embedder>,
    entities: Option<&dyn EntityExtractor>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    if records.is_empty() {
        return warnings;
    }

    if let Some(embedder) = embedder {
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        match embedder.embed(&texts) {
            Ok(vectors) if vectors.len() == records.len() => {
                for (record, vector) in records.iter_mut().zip(vectors) {
                    record.embedding = Some(vector);
                }
            }
            Ok(vectors) => warnings.push(format!(
                "embedding skipped: {} vectors for {} chunks",
                vectors.len(),
                records.len()
            )),
            Err(e) => {
                warn!(model = embedder.model_name(), error = %e, "embedding failed");
                warnings.push(format!("embedding failed: {}", e));
            }
        }
    }

    if let Some(extractor) = entities {
        let mut failed = 0;
        for record in records.iter_mut() {
            match extractor.extract(&record.text) {
                Ok(found) => record.entities = Some(found),
                Err(e) => {
                    failed += 1;
                    warn!(chunk = %record.id, error = %e, "entity extraction failed");
                }
            }
        }
        if failed > 0 {
            warnings.push(format!("entity extraction failed for {} chunks", failed));
        }
    }
    warnings
}
