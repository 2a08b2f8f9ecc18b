//! Upload transport
//!
//! POSTs the capture and its metadata as multipart form data and interprets
//! the reply: 2xx is success, 401 asks for authentication, anything else
//! (including network failures) becomes a transport error.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;

use super::payload::{ServerEcho, SubmissionPayload, SubmissionResult};
use crate::capture::MediaArtifact;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Anything that can deliver a payload and report the normalized outcome.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, payload: &SubmissionPayload<'_>) -> SubmissionResult;
}

/// Multipart-over-HTTP transport.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    access_token: Option<String>,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            access_token: None,
        })
    }

    /// Send `Authorization: Bearer <token>` with every upload.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_form(payload: &SubmissionPayload<'_>) -> Result<Form, String> {
        let mut form = Form::new();
        for (name, value) in payload.fields {
            form = form.text(name.clone(), value.clone());
        }
        if let Some(artifact) = payload.artifact {
            form = form.part(payload.artifact_field.to_string(), file_part(artifact)?);
        }
        for attachment in payload.attachments {
            form = form.part(
                payload.attachment_field.to_string(),
                file_part(attachment)?,
            );
        }
        Ok(form)
    }
}

fn file_part(artifact: &MediaArtifact) -> Result<Part, String> {
    Part::bytes(artifact.bytes().to_vec())
        .file_name(artifact.suggested_name().to_string())
        .mime_str(artifact.mime_type())
        .map_err(|e| format!("Invalid mime type '{}': {}", artifact.mime_type(), e))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, payload: &SubmissionPayload<'_>) -> SubmissionResult {
        let form = match Self::build_form(payload) {
            Ok(form) => form,
            Err(e) => return SubmissionResult::TransportError(e),
        };

        log::info!(
            "Uploading to {} ({} bytes, {} attachment(s), {} field(s))",
            self.endpoint,
            payload.artifact.map(MediaArtifact::len).unwrap_or(0),
            payload.attachments.len(),
            payload.fields.len()
        );

        let mut request = self.client.post(&self.endpoint).multipart(form);
        if let Some(token) = &self.access_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Upload network error: {}", e);
                return SubmissionResult::TransportError(format!("Network error: {}", e));
            }
        };

        let status = response.status().as_u16();
        let body = body_or_empty(status, response.text().await);
        interpret_response(status, &body)
    }
}

/// The status alone decides the outcome when the body cannot be read.
fn body_or_empty<E: std::fmt::Display>(status: u16, body: Result<String, E>) -> String {
    match body {
        Ok(body) => body,
        Err(e) => {
            log::warn!("Failed to read upload response body (status {}): {}", status, e);
            String::new()
        }
    }
}

/// Map an HTTP status and body onto a submission outcome.
pub fn interpret_response(status: u16, body: &str) -> SubmissionResult {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    match status {
        200..=299 => match parsed {
            Some(value) if value.get("success") == Some(&Value::Bool(false)) => {
                let message = error_message(&value).unwrap_or_else(|| body.trim().to_string());
                log::error!("Server reported failure ({}): {}", status, message);
                SubmissionResult::TransportError(format!(
                    "Server reported failure (status {}): {}",
                    status, message
                ))
            }
            Some(value) => SubmissionResult::Success(ServerEcho {
                status,
                body: value,
            }),
            // Webhooks often answer with plain text such as "Accepted"
            None => SubmissionResult::Success(ServerEcho {
                status,
                body: Value::String(body.to_string()),
            }),
        },
        401 => {
            log::warn!("Upload rejected: authentication required");
            SubmissionResult::AuthRequired
        }
        _ => {
            let message = parsed
                .as_ref()
                .and_then(error_message)
                .unwrap_or_else(|| body.trim().to_string());
            log::error!("Upload failed ({}): {}", status, message);
            SubmissionResult::TransportError(format!(
                "Server responded with status {}: {}",
                status, message
            ))
        }
    }
}

/// Accepts `{"error": "..."}`, `{"error": {"message": "..."}}` and `{"message": "..."}`.
fn error_message(value: &Value) -> Option<String> {
    match value.get("error") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(obj)) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
