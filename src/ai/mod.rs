//! Checksheet generation through an external language model.
//!
//! The model is asked for a single JSON object. Its reply is unwrapped from
//! any markdown fence, parsed and checked against the checkpoint field rules
//! before anything is handed back to the caller.

pub mod gemini;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::error::{AppError, FieldError};
use crate::fields::{FieldConfig, FieldType};

pub use gemini::GeminiClient;

pub const QUOTA_EXCEEDED_MESSAGE: &str =
    "AI quota exceeded. Please wait a moment and try again, or create checksheet manually.";

const SYSTEM_PROMPT: &str = r#"You are an expert in creating comprehensive checksheets for various industries.
Generate a detailed checksheet based on the user's requirements.

Return ONLY a valid JSON object with this exact structure:
{
  "title": "Checksheet Title",
  "description": "Brief description",
  "category": "manufacturing|construction|healthcare|IT|safety|etc",
  "industry": "specific industry",
  "checkpoints": [
    {
      "title": "Checkpoint title",
      "description": "Detailed description",
      "field_type": "CHECKBOX|NUMBER|TEXT|TEXTAREA|PHOTO|FILE|DROPDOWN|MULTISELECT|GPS|SIGNATURE|DATE|TIME|DATETIME|RATING",
      "section": "Section name for grouping",
      "is_required": true,
      "config": {}
    }
  ],
  "tags": ["tag1", "tag2"]
}

Config by field type:
- NUMBER: {"min": 0, "max": 100, "unit": "°C"}
- DROPDOWN and MULTISELECT: {"options": ["Option 1", "Option 2"]}
- RATING: {"max": 5}
- anything else: {}

Available field types:
- CHECKBOX: Simple yes/no
- NUMBER: Numeric input (temperature, pressure, count, etc.)
- TEXT: Short text input
- TEXTAREA: Long text
- PHOTO: Photo upload requirement
- FILE: Document upload
- DROPDOWN: Single selection
- MULTISELECT: Multiple selection
- GPS: Location tracking
- SIGNATURE: Digital signature
- DATE: Date picker
- TIME: Time picker
- DATETIME: Date and time
- RATING: Star rating

Guidelines:
1. Create 10-20 relevant checkpoints based on best practices
2. Group checkpoints into logical sections
3. Include appropriate field types for each checkpoint
4. Add validation rules where necessary
5. Make critical items required
6. Include photo requirements for visual verification
7. Add GPS for location-based checks if relevant"#;

const SUGGEST_PROMPT: &str = r#"Analyze this checksheet and suggest improvements based on industry best practices.

Provide suggestions for:
1. Missing critical checkpoints
2. Better field types for specific checks
3. Additional validation rules
4. Grouping improvements
5. Industry-specific enhancements

Return ONLY a JSON array of suggestions:
[
  {
    "type": "add|modify|remove",
    "checkpoint": "checkpoint title or new checkpoint",
    "suggestion": "detailed suggestion",
    "priority": "high|medium|low"
  }
]"#;

/// A text-in, text-out model call.
#[async_trait]
pub trait LanguageModel: Send + Sync + 'static {
    async fn generate(&self, prompt: &str) -> Result<String, ModelError>;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model provider rate limit reached")]
    RateLimited,
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model returned an empty response")]
    EmptyResponse,
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("{}", QUOTA_EXCEEDED_MESSAGE)]
    QuotaExceeded,
    #[error("AI returned output that is not a checksheet: {0}")]
    MalformedOutput(String),
    #[error("AI returned an invalid checksheet")]
    InvalidChecksheet(Vec<FieldError>),
    #[error("AI service failed: {0}")]
    Upstream(String),
    #[error("AI generation is not configured")]
    NotConfigured,
}

impl From<ModelError> for GenerationError {
    fn from(value: ModelError) -> Self {
        match value {
            ModelError::RateLimited => GenerationError::QuotaExceeded,
            ModelError::EmptyResponse => {
                GenerationError::MalformedOutput("empty response".to_string())
            }
            ModelError::Request(message) => GenerationError::Upstream(message),
        }
    }
}

impl From<GenerationError> for AppError {
    fn from(value: GenerationError) -> Self {
        match value {
            GenerationError::QuotaExceeded => AppError::quota_exceeded(QUOTA_EXCEEDED_MESSAGE),
            GenerationError::MalformedOutput(_) => AppError::external(
                "AI returned an unreadable checksheet. Please try again, or create checksheet manually.",
            ),
            GenerationError::InvalidChecksheet(details) => {
                AppError::external("AI returned an invalid checksheet. Please try again.")
                    .with_details(details)
            }
            GenerationError::Upstream(_) => AppError::external("Failed to generate checksheet"),
            GenerationError::NotConfigured => AppError::not_configured("AI generation"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedCheckpoint {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(alias = "fieldType")]
    pub field_type: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default, alias = "isRequired")]
    pub is_required: bool,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedChecksheet {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub checkpoints: Vec<GeneratedCheckpoint>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl GeneratedChecksheet {
    /// Checks the parts the checksheet endpoints would reject.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.title.trim().is_empty() {
            errors.push(FieldError::new("title", "title is required"));
        }
        if self.checkpoints.is_empty() {
            errors.push(FieldError::new(
                "checkpoints",
                "at least one checkpoint is required",
            ));
        }

        for (index, checkpoint) in self.checkpoints.iter().enumerate() {
            if checkpoint.title.trim().is_empty() {
                errors.push(FieldError::new(
                    format!("checkpoints[{index}].title"),
                    "title is required",
                ));
            }
            match checkpoint.field_type.parse::<FieldType>() {
                Ok(field_type) => {
                    if let Err(message) =
                        FieldConfig::from_parts(field_type, checkpoint.config.as_ref())
                    {
                        errors.push(FieldError::new(
                            format!("checkpoints[{index}].config"),
                            message,
                        ));
                    }
                }
                Err(message) => errors.push(FieldError::new(
                    format!("checkpoints[{index}].field_type"),
                    message,
                )),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suggestion {
    #[serde(rename = "type")]
    pub kind: String,
    pub checkpoint: String,
    pub suggestion: String,
    pub priority: String,
}

#[derive(Clone)]
pub struct ChecksheetGenerator {
    model: Arc<dyn LanguageModel>,
}

impl ChecksheetGenerator {
    pub fn new(model: Arc<dyn LanguageModel>) -> Self {
        Self { model }
    }

    /// One model call; no retries.
    pub async fn generate(
        &self,
        prompt: &str,
        category: Option<&str>,
    ) -> Result<GeneratedChecksheet, GenerationError> {
        let full_prompt = match category.map(str::trim).filter(|c| !c.is_empty()) {
            Some(category) => {
                format!("{SYSTEM_PROMPT}\n\nUser request: {prompt}\nCategory: {category}")
            }
            None => format!("{SYSTEM_PROMPT}\n\nUser request: {prompt}"),
        };

        let text = self.model.generate(&full_prompt).await?;
        let generated: GeneratedChecksheet = parse_json(&text)?;

        if let Err(details) = generated.validate() {
            warn!(
                problems = details.len(),
                "generated checksheet failed validation"
            );
            return Err(GenerationError::InvalidChecksheet(details));
        }

        info!(
            title = %generated.title,
            checkpoints = generated.checkpoints.len(),
            "generated checksheet"
        );
        Ok(generated)
    }

    /// Asks the model to review an existing checksheet, given as JSON.
    pub async fn suggest_improvements(
        &self,
        checksheet: &Value,
    ) -> Result<Vec<Suggestion>, GenerationError> {
        let current = serde_json::to_string_pretty(checksheet)
            .map_err(|err| GenerationError::MalformedOutput(err.to_string()))?;
        let prompt = format!("{SUGGEST_PROMPT}\n\nCurrent checksheet:\n{current}");

        let text = self.model.generate(&prompt).await?;
        parse_json(&text)
    }
}

fn parse_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, GenerationError> {
    let json_text = strip_code_fence(text);
    serde_json::from_str(json_text).map_err(|err| {
        warn!(
            error = %err,
            snippet = %json_text.chars().take(200).collect::<String>(),
            "model output is not the expected JSON"
        );
        GenerationError::MalformedOutput(err.to_string())
    })
}

/// Removes a surrounding markdown code fence (```` ``` ```` or
/// ```` ```json ````), if there is one. The opening fence may share its line
/// with the payload.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let after_tag = rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    let body = match after_tag.chars().next() {
        None => after_tag,
        Some(c) if c.is_whitespace() || c == '{' || c == '[' => after_tag,
        Some(_) => rest,
    };
    let end = body.rfind("```").unwrap_or(body.len());
    body[..end].trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedModel {
        reply: Result<String, fn() -> ModelError>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: fn() -> ModelError) -> Arc<Self> {
            Arc::new(Self {
                reply: Err(error),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for ScriptedModel {
        async fn generate(&self, prompt: &str) -> Result<String, ModelError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    const CHECKSHEET_JSON: &str = r#"{
  "title": "Cold Room Audit",
  "description": "Weekly cold storage check",
  "category": "food-safety",
  "industry": "Hospitality",
  "checkpoints": [
    {
      "title": "Room temperature",
      "description": "Read the wall thermometer",
      "fieldType": "NUMBER",
      "section": "Environment",
      "isRequired": true,
      "config": {"min": -25, "max": 5, "unit": "°C"}
    },
    {
      "title": "Door seal condition",
      "fieldType": "DROPDOWN",
      "section": "Equipment",
      "isRequired": false,
      "config": {"options": ["Good", "Worn", "Damaged"]}
    }
  ],
  "tags": ["haccp"]
}"#;

    #[tokio::test]
    async fn fenced_output_is_returned_as_parsed() {
        let fenced = format!("```json\n{CHECKSHEET_JSON}\n```");
        let model = ScriptedModel::replying(&fenced);
        let generator = ChecksheetGenerator::new(model.clone());

        let generated = generator
            .generate("cold room audit", Some("food-safety"))
            .await
            .unwrap();

        let expected: GeneratedChecksheet = serde_json::from_str(CHECKSHEET_JSON).unwrap();
        assert_eq!(generated, expected);
        assert_eq!(generated.checkpoints[0].field_type, "NUMBER");
        assert!(generated.checkpoints[0].is_required);

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].ends_with("User request: cold room audit\nCategory: food-safety"));
    }

    #[tokio::test]
    async fn rate_limit_becomes_quota_message() {
        let generator = ChecksheetGenerator::new(ScriptedModel::failing(|| ModelError::RateLimited));
        let err = generator.generate("anything", None).await.unwrap_err();

        assert!(matches!(err, GenerationError::QuotaExceeded));
        assert_eq!(err.to_string(), QUOTA_EXCEEDED_MESSAGE);

        let app_error = AppError::from(err);
        assert_eq!(app_error.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(app_error.message(), QUOTA_EXCEEDED_MESSAGE);
    }

    #[tokio::test]
    async fn prose_is_malformed_output() {
        let generator = ChecksheetGenerator::new(ScriptedModel::replying(
            "Sure! Here is a checksheet you might like.",
        ));
        let err = generator.generate("anything", None).await.unwrap_err();
        assert!(matches!(err, GenerationError::MalformedOutput(_)));
        assert_eq!(
            AppError::from(err).status(),
            axum::http::StatusCode::BAD_GATEWAY
        );
    }

    #[tokio::test]
    async fn unknown_field_types_are_rejected() {
        let reply = r#"{"title": "Audit", "checkpoints": [
            {"title": "Smell", "fieldType": "SMELL"},
            {"title": "Pressure", "fieldType": "NUMBER", "config": {"min": 10, "max": 1}}
        ]}"#;
        let generator = ChecksheetGenerator::new(ScriptedModel::replying(reply));
        let err = generator.generate("anything", None).await.unwrap_err();

        match err {
            GenerationError::InvalidChecksheet(details) => {
                let fields: Vec<_> = details.iter().map(|d| d.field.as_str()).collect();
                assert_eq!(
                    fields,
                    vec!["checkpoints[0].field_type", "checkpoints[1].config"]
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn suggestions_are_parsed() {
        let reply = r#"```
[{"type": "add", "checkpoint": "Fire exits", "suggestion": "Check exit signage", "priority": "high"}]
```"#;
        let generator = ChecksheetGenerator::new(ScriptedModel::replying(reply));
        let suggestions = generator
            .suggest_improvements(&serde_json::json!({"title": "Audit"}))
            .await
            .unwrap();
        assert_eq!(
            suggestions,
            vec![Suggestion {
                kind: "add".into(),
                checkpoint: "Fire exits".into(),
                suggestion: "Check exit signage".into(),
                priority: "high".into(),
            }]
        );
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n[1]\n```\n"), "[1]");
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn strips_fences_on_a_single_line() {
        assert_eq!(strip_code_fence("```json{\"title\":\"A\"}```"), "{\"title\":\"A\"}");
        assert_eq!(strip_code_fence("```json {\"title\":\"A\"} ```"), "{\"title\":\"A\"}");
        assert_eq!(strip_code_fence("```[1, 2]```"), "[1, 2]");
        assert_eq!(strip_code_fence("```JSON\r\n[1]\r\n```"), "[1]");
        assert_eq!(strip_code_fence("```true```"), "true");
    }

    #[tokio::test]
    async fn single_line_fenced_output_is_parsed() {
        let reply = r#"```json {"title": "Audit", "checkpoints": [{"title": "Exits", "fieldType": "CHECKBOX"}]} ```"#;
        let generator = ChecksheetGenerator::new(ScriptedModel::replying(reply));
        let generated = generator.generate("audit", None).await.unwrap();
        assert_eq!(generated.title, "Audit");
        assert_eq!(generated.checkpoints.len(), 1);
    }
}
