//! Per-session chunk buffer and the finished media artifact

use std::path::Path;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Chunks collected for one recording, in device-emission order.
#[derive(Debug)]
pub struct CaptureSession {
    session_id: Uuid,
    started_at: DateTime<Utc>,
    mime_type: String,
    chunks: Vec<Vec<u8>>,
}

impl CaptureSession {
    pub fn new(session_id: Uuid, mime_type: impl Into<String>) -> Self {
        Self {
            session_id,
            started_at: Utc::now(),
            mime_type: mime_type.into(),
            chunks: Vec::new(),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn append(&mut self, chunk: Vec<u8>) {
        self.chunks.push(chunk);
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Concatenate every chunk into the artifact. Consumes the session.
    pub fn finalize(self, suggested_name: impl Into<String>) -> MediaArtifact {
        let total = self.chunks.iter().map(Vec::len).sum();
        let mut bytes = Vec::with_capacity(total);
        for chunk in self.chunks {
            bytes.extend_from_slice(&chunk);
        }
        log::info!(
            "Session {} finalized: {} bytes recorded since {}",
            self.session_id,
            bytes.len(),
            self.started_at.format("%H:%M:%S")
        );
        MediaArtifact {
            bytes,
            mime_type: self.mime_type,
            suggested_name: suggested_name.into(),
        }
    }
}

/// A finished, immutable piece of media ready to upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaArtifact {
    bytes: Vec<u8>,
    mime_type: String,
    suggested_name: String,
}

impl MediaArtifact {
    pub fn new(
        bytes: Vec<u8>,
        mime_type: impl Into<String>,
        suggested_name: impl Into<String>,
    ) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            suggested_name: suggested_name.into(),
        }
    }

    /// Load a file from disk (used for attachments).
    pub async fn from_file(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let suggested_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("attachment")
            .to_string();
        Ok(Self {
            bytes,
            mime_type: mime_for_path(path).to_string(),
            suggested_name,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn suggested_name(&self) -> &str {
        &self.suggested_name
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `image/` style entries match a MIME prefix, `.pdf` style entries match
    /// the file extension, anything else must equal the MIME type.
    pub fn matches_type(&self, accepted: &str) -> bool {
        if accepted.starts_with('.') {
            self.suggested_name
                .to_ascii_lowercase()
                .ends_with(&accepted.to_ascii_lowercase())
        } else if accepted.ends_with('/') {
            self.mime_type.starts_with(accepted)
        } else {
            self.mime_type == accepted
        }
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("heic") => "image/heic",
        Some("wav") => "audio/wav",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("pdf") => "application/pdf",
        Some("doc") => "application/msword",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}
