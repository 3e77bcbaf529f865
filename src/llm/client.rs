use log::debug;
use reqwest::Client;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use std::time::Duration;

use crate::error::{GridlyError, Result};
use crate::llm::types::*;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Schema keys the Gemini `responseSchema` field understands.
const SCHEMA_KEYS: &[&str] = &[
    "type",
    "format",
    "description",
    "nullable",
    "enum",
    "properties",
    "required",
    "items",
];

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: GEMINI_BASE_URL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub(crate) async fn generate_content(
        &self,
        model: &str,
        system_prompt: &str,
        messages: Vec<Content>,
        response_schema: Option<serde_json::Value>,
    ) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let payload = GenerateContentRequest {
            contents: messages,
            system_instruction: Some(Content::user(system_prompt)),
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema,
                temperature: Some(0.2),
            },
        };

        debug!("Sending generateContent request to {}", model);
        let res = self
            .client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await.map_err(transport_error)?;
            return Err(GridlyError::ExtractionFailed(format!(
                "Gemini API Error (status {}): {}",
                status, err_text
            )));
        }

        let body: GenerateContentResponse = res.json().await.map_err(transport_error)?;
        first_text(body)
    }
}

/// Drops the request URL so endpoint details stay out of logs and messages.
fn transport_error(e: reqwest::Error) -> GridlyError {
    GridlyError::Http(e.without_url())
}

fn first_text(body: GenerateContentResponse) -> Result<String> {
    let candidate = body
        .candidates
        .ok_or_else(|| GridlyError::ExtractionFailed("No candidates returned".to_string()))?
        .into_iter()
        .next()
        .ok_or_else(|| GridlyError::ExtractionFailed("Empty candidates list".to_string()))?;

    let content = candidate.content.ok_or_else(|| {
        GridlyError::ExtractionFailed(format!(
            "Candidate has no content (finish reason: {})",
            candidate.finish_reason.as_deref().unwrap_or("unknown")
        ))
    })?;

    let text: String = content.parts.into_iter().map(|p| p.text).collect();
    if text.trim().is_empty() {
        return Err(GridlyError::ExtractionFailed(
            "Model returned no text".to_string(),
        ));
    }
    Ok(text)
}

/// OpenAPI-style schema for `T`, reduced to the keys Gemini accepts.
pub fn response_schema<T: JsonSchema>() -> Result<serde_json::Value> {
    let settings = SchemaSettings::openapi3().with(|s| {
        s.inline_subschemas = true;
        s.meta_schema = None;
    });
    let root = settings.into_generator().into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root.schema)?;
    retain_schema_keys(&mut value);
    Ok(value)
}

fn retain_schema_keys(value: &mut serde_json::Value) {
    let Some(object) = value.as_object_mut() else {
        return;
    };
    object.retain(|key, _| SCHEMA_KEYS.contains(&key.as_str()));

    if let Some(properties) = object.get_mut("properties").and_then(|p| p.as_object_mut()) {
        for property in properties.values_mut() {
            retain_schema_keys(property);
        }
    }
    if let Some(items) = object.get_mut("items") {
        retain_schema_keys(items);
    }
}

/// Trims prose or code fences around a JSON payload.
pub fn clean_json_output(raw: &str) -> &str {
    let object = raw.find('{').zip(raw.rfind('}'));
    let array = raw.find('[').zip(raw.rfind(']'));

    let span = match (object, array) {
        (Some(o), Some(a)) => Some(if o.0 < a.0 { o } else { a }),
        (o, a) => o.or(a),
    };

    match span {
        Some((start, end)) if start <= end => &raw[start..=end],
        _ => raw.trim(),
    }
}
