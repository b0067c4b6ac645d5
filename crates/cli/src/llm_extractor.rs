use std::time::Duration;

use anyhow::{Context, Result};
use geofield_core::{
    parse_field_response, ExtractError, ExtractionResult, FieldExtractor, Schema, TextChunk,
};
use geofield_llm::{LlmClient, LlmRequest};
use serde_json::json;
use tokio::runtime::{Builder, Runtime};

use crate::config::LlmSettings;

const SYSTEM_PROMPT: &str = "You extract fields from the text layout of a scanned document. \
Each input line is a JSON object with the page number, the text and its bounding box \
[x0, y0, x1, y1]. Answer with one JSON object whose keys are exactly the requested field \
names. Each value is either null or {\"value\": string, \"page\": number, \"bbox\": \
[x0, y0, x1, y1]}, where bbox is copied from the line the value was read from. Use null \
when a field is absent. Do not add commentary.";

/// Extra time the HTTP client gets over the per-call deadline, so that a slow
/// provider is reported as [`ExtractError::Timeout`].
const HTTP_GRACE: Duration = Duration::from_secs(5);

/// [`FieldExtractor`] backed by a chat model. Calls block on an owned runtime
/// and are cut off after the configured timeout.
pub struct LlmFieldExtractor {
    client: LlmClient,
    runtime: Runtime,
    timeout: Duration,
    max_prompt_lines: usize,
}

impl LlmFieldExtractor {
    pub fn new(settings: &LlmSettings) -> Result<Self> {
        let client = LlmClient::new(
            settings.provider,
            settings.model.clone(),
            settings.timeout + HTTP_GRACE,
        )?;
        Self::with_client(client, settings.timeout, settings.max_prompt_lines)
    }

    pub fn with_client(
        client: LlmClient,
        timeout: Duration,
        max_prompt_lines: usize,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to start async runtime")?;
        Ok(Self {
            client,
            runtime,
            timeout,
            max_prompt_lines,
        })
    }
}

impl FieldExtractor for LlmFieldExtractor {
    fn extract(
        &self,
        label: &str,
        schema: &Schema,
        chunks: &[TextChunk],
    ) -> Result<ExtractionResult, ExtractError> {
        let request = build_request(label, schema, chunks, self.max_prompt_lines);
        // the timer must be created inside the runtime
        let reply = self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, self.client.chat(&request)).await
        });
        let response = match reply {
            Err(_) => return Err(ExtractError::Timeout(self.timeout)),
            Ok(Err(err)) => return Err(ExtractError::Upstream(format!("{err:#}"))),
            Ok(Ok(response)) => response,
        };
        tracing::debug!(
            label,
            provider = self.client.provider().as_str(),
            model = self.client.model(),
            tokens = response.total_tokens(),
            "model answered"
        );
        Ok(parse_field_response(&response.content, schema)?)
    }
}

/// Stands in for the model when no client could be built, e.g. a missing API
/// key. Every call fails, so documents fall back to learned positions.
pub struct UnavailableExtractor {
    reason: String,
}

impl UnavailableExtractor {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl FieldExtractor for UnavailableExtractor {
    fn extract(
        &self,
        _label: &str,
        _schema: &Schema,
        _chunks: &[TextChunk],
    ) -> Result<ExtractionResult, ExtractError> {
        Err(ExtractError::Upstream(format!("model unavailable: {}", self.reason)))
    }
}

fn build_request(
    label: &str,
    schema: &Schema,
    chunks: &[TextChunk],
    max_lines: usize,
) -> LlmRequest {
    let fields: serde_json::Map<String, serde_json::Value> = schema
        .iter()
        .map(|(name, description)| (name.to_string(), json!(description)))
        .collect();
    let lines = chunks
        .iter()
        .take(max_lines)
        .map(|chunk| {
            json!({
                "page": 1,
                "text": chunk.text,
                "bbox": chunk.bbox.to_array(),
            })
            .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n");
    let user = format!(
        "Document type: {label}\nFields to extract (name: description):\n{}\n\nText lines:\n{lines}",
        serde_json::Value::Object(fields)
    );
    LlmRequest {
        system: Some(SYSTEM_PROMPT.to_string()),
        user,
        json_mode: true,
    }
}
