//! Keyword generation through a hosted text-generation model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    config::Config,
    error::{Error, Result},
    http,
    retry::RetryPolicy,
    validate,
};

const SERVICE: &str = "gemini";
const GEMINI_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models";

pub const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that generates keywords for topics.";
pub const KEYWORD_COUNT: usize = 10;
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// A topic and its sub-topics to generate keywords for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordRequest {
    pub topic: String,
    pub sub_topics: Vec<String>,
}

impl KeywordRequest {
    /// Parse `{"topic": "...", "sub_topics": ["...", ...]}`.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Value::Object(object) = value else {
            return Err(Error::Validation(
                "keyword request must be a JSON object".into(),
            ));
        };

        let topic = match object.get("topic") {
            Some(Value::String(topic)) => topic.clone(),
            Some(other) => {
                return Err(Error::Validation(format!(
                    "topic must be a string, got {}",
                    validate::json_type(other)
                )));
            }
            None => return Err(Error::Validation("topic is required".into())),
        };
        let sub_topics = match object.get("sub_topics") {
            Some(value) => validate::string_list(value, "sub_topics")?,
            None => {
                return Err(Error::Validation("sub_topics is required".into()));
            }
        };

        Ok(Self { topic, sub_topics })
    }
}

pub fn build_prompt(request: &KeywordRequest) -> String {
    format!(
        "Given the main topic: '{}' and the following sub-topics: {}, \
         generate a list of exactly {KEYWORD_COUNT} relevant keywords that best \
         represent the overall subject. Return only the keywords, separated \
         by commas.",
        request.topic,
        request.sub_topics.join(", ")
    )
}

/// Split a comma-separated model response into keywords.
pub fn parse_keywords(response: &str) -> Vec<String> {
    response
        .split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// A black-box text completion model.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Generate keywords for `request`.
pub async fn generate_keywords(
    generator: &dyn TextGenerator,
    request: &KeywordRequest,
) -> Result<Vec<String>> {
    let response = generator
        .complete(SYSTEM_PROMPT, &build_prompt(request))
        .await?;
    let keywords = parse_keywords(&response);
    tracing::debug!(
        topic = %request.topic,
        count = keywords.len(),
        "generated keywords"
    );
    Ok(keywords)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: Content<'a>,
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

impl GenerateResponse {
    fn into_text(self) -> Option<String> {
        let content = self.candidates.into_iter().next()?.content?;
        let text: String = content.parts.into_iter().map(|p| p.text).collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Google Gemini `generateContent` client.
pub struct GeminiClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    temperature: f32,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.google_api_key.clone().ok_or_else(|| {
            Error::Config(format!(
                "{} environment variable is required for keyword generation",
                crate::config::GOOGLE_API_KEY_ENV_VAR
            ))
        })?;

        Ok(Self {
            client: http::client(config.request_timeout)?,
            url: format!(
                "{GEMINI_ENDPOINT}/{}:generateContent",
                config.generation_model
            ),
            api_key,
            temperature: DEFAULT_TEMPERATURE,
            retry: config.retry,
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: [Part { text: system }],
            },
            contents: [Content {
                role: Some("user"),
                parts: [Part { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
            },
        };

        let response: GenerateResponse = self
            .retry
            .run("generate", || {
                http::send_json(
                    SERVICE,
                    self.client
                        .post(&self.url)
                        .header("x-goog-api-key", &self.api_key)
                        .json(&body),
                )
            })
            .await?;

        response
            .into_text()
            .ok_or_else(|| Error::remote(SERVICE, "response contained no text"))
    }
}
