//! Upload payload, local validation, and the interpreted upload outcome

use std::collections::BTreeMap;

use crate::capture::MediaArtifact;

/// Why a payload was rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    MissingArtifact,
    /// Neither a recording nor an attachment
    NothingToSend,
    MissingField(String),
    MissingAttachments { required: usize, found: usize },
    TooManyAttachments { max: usize },
    UnsupportedType { name: String, mime_type: String },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::MissingArtifact => write!(f, "Please record audio before sending."),
            ValidationError::NothingToSend => {
                write!(f, "Please record audio or attach a file before sending.")
            }
            ValidationError::MissingField(name) => write!(f, "Please provide a value for '{}'.", name),
            ValidationError::MissingAttachments { required, found } => write!(
                f,
                "Please attach {} file(s) before sending ({} attached).",
                required, found
            ),
            ValidationError::TooManyAttachments { max } => {
                write!(f, "You can only upload {} file(s).", max)
            }
            ValidationError::UnsupportedType { name, mime_type } => write!(
                f,
                "'{}' is not an accepted file type ({}).",
                name, mime_type
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Per-screen rules for what a submission must contain and what to clear afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionPolicy {
    pub required_field_names: Vec<String>,
    pub require_recording: bool,
    pub required_attachments: usize,
    /// Upper bound on attachments; `None` is unlimited
    pub max_attachments: Option<usize>,
    /// Empty accepts anything
    pub accepted_types: Vec<String>,
    pub artifact_field: String,
    pub attachment_field: String,
    pub clear_fields_on_success: bool,
}

impl SubmissionPolicy {
    /// Whether an attachment of this type may be added at all.
    pub fn accepts(&self, attachment: &MediaArtifact) -> bool {
        self.accepted_types.is_empty()
            || self
                .accepted_types
                .iter()
                .any(|accepted| attachment.matches_type(accepted))
    }
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self {
            required_field_names: Vec::new(),
            require_recording: true,
            required_attachments: 0,
            max_attachments: None,
            accepted_types: vec!["image/".to_string()],
            artifact_field: "audio".to_string(),
            attachment_field: "file".to_string(),
            clear_fields_on_success: true,
        }
    }
}

/// Everything the transport sends, borrowed from the orchestrator.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionPayload<'a> {
    pub artifact: Option<&'a MediaArtifact>,
    pub artifact_field: &'a str,
    pub attachments: &'a [MediaArtifact],
    pub attachment_field: &'a str,
    pub fields: &'a BTreeMap<String, String>,
}

impl<'a> SubmissionPayload<'a> {
    /// Blank (whitespace-only) values count as missing.
    pub fn validate(&self, policy: &SubmissionPolicy) -> Result<(), ValidationError> {
        if policy.require_recording && self.artifact.is_none() {
            return Err(ValidationError::MissingArtifact);
        }
        if self.artifact.is_none() && self.attachments.is_empty() {
            return Err(ValidationError::NothingToSend);
        }

        for name in &policy.required_field_names {
            let filled = self
                .fields
                .get(name)
                .is_some_and(|value| !value.trim().is_empty());
            if !filled {
                return Err(ValidationError::MissingField(name.clone()));
            }
        }

        let found = self.attachments.len();
        if found < policy.required_attachments {
            return Err(ValidationError::MissingAttachments {
                required: policy.required_attachments,
                found,
            });
        }
        if let Some(max) = policy.max_attachments {
            if found > max {
                return Err(ValidationError::TooManyAttachments { max });
            }
        }
        if let Some(rejected) = self.attachments.iter().find(|a| !policy.accepts(a)) {
            return Err(ValidationError::UnsupportedType {
                name: rejected.suggested_name().to_string(),
                mime_type: rejected.mime_type().to_string(),
            });
        }

        Ok(())
    }
}

/// Body the server sent back on success.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerEcho {
    pub status: u16,
    pub body: serde_json::Value,
}

/// Interpreted outcome of one upload attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionResult {
    Success(ServerEcho),
    AuthRequired,
    TransportError(String),
}

impl SubmissionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmissionResult::Success(_))
    }
}
