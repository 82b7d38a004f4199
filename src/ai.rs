use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AnalysisError;
use crate::models::GroundingChunk;

pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

// --- Service trait ---

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub citations: Vec<GroundingChunk>,
}

pub trait CompletionService: Send + Sync {
    fn complete(&self, prompt: &str) -> Result<Completion, AnalysisError>;
    fn model_name(&self) -> &str;
}

// --- Gemini provider ---

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiTool {
    google_search: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    tools: Vec<GeminiTool>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiResponseContent>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

impl GeminiResponse {
    fn into_completion(self) -> Result<Completion, AnalysisError> {
        let candidate = self
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| AnalysisError::Fetch("No candidates in Gemini API response".to_string()))?;

        let text: String = candidate
            .content
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(AnalysisError::Fetch("Empty response from Gemini API".to_string()));
        }

        let citations = candidate
            .grounding_metadata
            .map(|meta| meta.grounding_chunks)
            .unwrap_or_default();

        Ok(Completion { text, citations })
    }
}

#[derive(Debug)]
pub struct GeminiProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl GeminiProvider {
    pub fn new(api_key: String, model_id: String) -> Result<Self, AnalysisError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .map_err(|e| AnalysisError::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { api_key, model_id, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.model_id)
    }
}

impl CompletionService for GeminiProvider {
    fn complete(&self, prompt: &str) -> Result<Completion, AnalysisError> {
        // Structured output (responseSchema) cannot be combined with the search tool,
        // so the JSON shape is described in the prompt instead.
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            tools: vec![GeminiTool {
                google_search: serde_json::json!({}),
            }],
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| {
                tracing::error!(error = %e, "Gemini request failed");
                AnalysisError::Fetch(format!("Failed to get analysis from Gemini API: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().unwrap_or_default();
            tracing::error!(%status, body = %error_text, "Gemini API returned an error");
            return Err(classify_api_error(status.as_u16(), &error_text));
        }

        let api_response: GeminiResponse = response.json().map_err(|e| {
            AnalysisError::Fetch(format!("Failed to parse Gemini API response: {}", e))
        })?;

        api_response.into_completion()
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

fn classify_api_error(status: u16, body: &str) -> AnalysisError {
    if body.contains("API key not valid") {
        return AnalysisError::Fetch("The provided Gemini API key is not valid.".to_string());
    }
    AnalysisError::Fetch(format!(
        "Failed to get analysis from Gemini API (status {}).",
        status
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_parts_are_joined_and_citations_kept() {
        let raw = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "{\"a\":"}, {"text": "1}"}]},
                "groundingMetadata": {
                    "groundingChunks": [
                        {"web": {"uri": "https://example.com/austin", "title": "Austin market"}},
                        {"web": {"uri": "https://example.com/rates"}}
                    ]
                }
            }]
        }"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        let completion = response.into_completion().unwrap();
        assert_eq!(completion.text, "{\"a\":1}");
        assert_eq!(completion.citations.len(), 2);
        let web = completion.citations[1].web.as_ref().unwrap();
        assert_eq!(web.uri.as_deref(), Some("https://example.com/rates"));
        assert!(web.title.is_none());
    }

    #[test]
    fn test_missing_grounding_metadata_gives_no_citations() {
        let raw = r#"{"candidates": [{"content": {"parts": [{"text": "hello"}]}}]}"#;
        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        let completion = response.into_completion().unwrap();
        assert!(completion.citations.is_empty());
    }

    #[test]
    fn test_empty_candidates_is_fetch_error() {
        let response: GeminiResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(matches!(response.into_completion(), Err(AnalysisError::Fetch(_))));
    }

    #[test]
    fn test_invalid_key_message() {
        let err = classify_api_error(400, r#"{"error":{"message":"API key not valid. Please pass a valid API key."}}"#);
        assert_eq!(err.to_string(), "The provided Gemini API key is not valid.");

        let err = classify_api_error(503, "overloaded");
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn test_provider_endpoint_uses_model() {
        let provider = GeminiProvider::new("test-key-0123456789".to_string(), DEFAULT_MODEL.to_string()).unwrap();
        assert_eq!(provider.model_name(), "gemini-2.5-pro");
        assert!(provider.endpoint().ends_with("/gemini-2.5-pro:generateContent"));
    }
}
