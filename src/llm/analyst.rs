use log::info;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::GridlyConfig;
use crate::error::{GridlyError, Result};
use crate::llm::client::{clean_json_output, response_schema, GeminiClient};
use crate::llm::prompts::*;
use crate::llm::types::Content;
use crate::resilience::{cache_key, ResilientCaller};
use crate::schema::{AnalysisReport, ChatAnswer, ChatTurn, Forecast};

/// Sends spreadsheet text to Gemini for summaries, follow-up answers and
/// forecasts. Every request goes through the shared [`ResilientCaller`] and
/// walks the model list in priority order.
pub struct SpreadsheetAnalyst {
    client: GeminiClient,
    caller: ResilientCaller,
    models: Vec<String>,
}

impl SpreadsheetAnalyst {
    pub fn new(client: GeminiClient, caller: ResilientCaller, models: Vec<String>) -> Self {
        Self {
            client,
            caller,
            models,
        }
    }

    pub fn from_config(client: GeminiClient, config: &GridlyConfig) -> Self {
        Self::new(
            client,
            ResilientCaller::from_config(config),
            config.models.clone(),
        )
    }

    /// The wrapper shared by this analyst, for health display.
    pub fn caller(&self) -> &ResilientCaller {
        &self.caller
    }

    pub async fn summarize(&self, spreadsheet_text: &str) -> Result<AnalysisReport> {
        let messages = vec![Content::user(format!(
            "Analyze this spreadsheet data:\n\n{}",
            spreadsheet_text
        ))];
        self.request("summary", SYSTEM_PROMPT_SUMMARY, messages)
            .await
    }

    pub async fn ask(
        &self,
        spreadsheet_text: &str,
        question: &str,
        history: &[ChatTurn],
    ) -> Result<ChatAnswer> {
        if question.trim().is_empty() {
            return Err(GridlyError::PermanentService(
                "question must not be empty".to_string(),
            ));
        }
        let messages = question_messages(spreadsheet_text, question, history);
        self.request("question", SYSTEM_PROMPT_QUESTION, messages)
            .await
    }

    pub async fn forecast(
        &self,
        spreadsheet_text: &str,
        instruction: Option<&str>,
    ) -> Result<Forecast> {
        let messages = vec![Content::user(format!(
            "Spreadsheet data:\n\n{}\n\nInstruction: {}",
            spreadsheet_text,
            instruction.unwrap_or(DEFAULT_FORECAST_INSTRUCTION)
        ))];
        self.request("forecast", SYSTEM_PROMPT_FORECAST, messages)
            .await
    }

    async fn request<T>(&self, operation: &str, system_prompt: &str, messages: Vec<Content>) -> Result<T>
    where
        T: JsonSchema + Serialize + DeserializeOwned,
    {
        let schema = response_schema::<T>()?;
        let key = cache_key([
            operation.to_string(),
            self.models.join(","),
            system_prompt.to_string(),
            serde_json::to_string(&messages)?,
        ]);

        info!(
            "Requesting {} from {} model(s)",
            operation,
            self.models.len()
        );

        let client = &self.client;
        let schema = &schema;
        let messages = &messages;
        self.caller
            .call_with_fallback(&self.models, Some(&key), move |model: &String| {
                let model = model.clone();
                async move {
                    let raw = client
                        .generate_content(&model, system_prompt, messages.clone(), Some(schema.clone()))
                        .await?;
                    parse_response::<T>(&raw)
                }
            })
            .await
    }
}

fn question_messages(spreadsheet_text: &str, question: &str, history: &[ChatTurn]) -> Vec<Content> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Content::user(format!(
        "Here is the spreadsheet data for this conversation:\n\n{}",
        spreadsheet_text
    )));
    messages.push(Content::model(
        "{\"answer\": \"Understood. Ask me anything about this data.\", \"sources\": []}",
    ));
    messages.extend(history.iter().map(Content::from));
    messages.push(Content::user(question));
    messages
}

pub(crate) fn parse_response<T: DeserializeOwned>(raw: &str) -> Result<T> {
    serde_json::from_str(clean_json_output(raw)).map_err(|e| {
        GridlyError::ExtractionFailed(format!("Model returned invalid JSON: {}", e))
    })
}
