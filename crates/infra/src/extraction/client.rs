use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use serde_json::Value as JsonValue;

use kontor_invoicing::{EXTRACTION_PROMPT, ExtractionError, InvoiceData, parse_llm_response};

use super::InvoiceExtractor;
use crate::config::ExtractionConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Blocking HTTP client for the extraction API.
///
/// Sends a multipart form (`model`, `prompt`, `file`) and expects either a JSON body with a
/// `content` string or the model's plain-text answer.
#[derive(Debug, Clone)]
pub struct LlmExtractionClient {
    config: ExtractionConfig,
    timeout: Duration,
}

impl LlmExtractionClient {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// The model's answer inside a response body.
fn answer_text(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v.get("content").and_then(JsonValue::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

fn service_error(e: reqwest::Error) -> ExtractionError {
    ExtractionError::Service(e.to_string())
}

impl InvoiceExtractor for LlmExtractionClient {
    #[tracing::instrument(skip(self, pdf), fields(size = pdf.len(), model = %self.config.model))]
    fn extract(&self, filename: &str, pdf: &[u8]) -> Result<InvoiceData, ExtractionError> {
        // Built per call: the executor thread runs outside the async runtime.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(service_error)?;

        let file = Part::bytes(pdf.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/pdf")
            .map_err(service_error)?;
        let form = Form::new()
            .text("model", self.config.model.clone())
            .text("prompt", EXTRACTION_PROMPT)
            .part("file", file);

        let mut request = client.post(&self.config.api_url).multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(service_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExtractionError::Service(format!("extraction API returned {status}")));
        }
        let body = response.text().map_err(service_error)?;
        tracing::debug!(bytes = body.len(), "extraction API answered");
        parse_llm_response(&answer_text(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_is_taken_from_content_or_the_raw_body() {
        assert_eq!(answer_text(r#"{"content": "```json\n{}\n```"}"#), "```json\n{}\n```");
        assert_eq!(answer_text(r#"{"invoice_number": "A-1"}"#), r#"{"invoice_number": "A-1"}"#);
        assert_eq!(answer_text("plain words"), "plain words");
    }

    #[test]
    fn unreachable_api_is_a_service_error() {
        let client = LlmExtractionClient::new(ExtractionConfig {
            api_url: "http://127.0.0.1:9/extract".to_string(),
            api_key: Some("k".to_string()),
            model: "m".to_string(),
        })
        .with_timeout(Duration::from_secs(2));

        let err = client.extract("invoice.pdf", b"%PDF-1.4").unwrap_err();
        assert!(matches!(err, ExtractionError::Service(_)));
    }
}
