//! Submission orchestration
//!
//! Owns what will be uploaded (the finished capture, file attachments and
//! the form fields), validates it locally, hands it to the transport and
//! applies the outcome: clear on success, keep everything otherwise.

use std::collections::BTreeMap;

use super::auth::AuthBootstrap;
use super::payload::{SubmissionPayload, SubmissionPolicy, SubmissionResult, ValidationError};
use super::transport::Transport;
use crate::capture::MediaArtifact;
use crate::feedback::Feedback;

pub struct SubmissionOrchestrator {
    policy: SubmissionPolicy,
    artifact: Option<MediaArtifact>,
    attachments: Vec<MediaArtifact>,
    fields: BTreeMap<String, String>,
}

impl SubmissionOrchestrator {
    pub fn new(policy: SubmissionPolicy) -> Self {
        Self {
            policy,
            artifact: None,
            attachments: Vec::new(),
            fields: BTreeMap::new(),
        }
    }

    pub fn policy(&self) -> &SubmissionPolicy {
        &self.policy
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Replaces any previous artifact.
    pub fn set_artifact(&mut self, artifact: MediaArtifact) {
        if self.artifact.is_some() {
            log::debug!("Replacing previous recording");
        }
        self.artifact = Some(artifact);
    }

    pub fn artifact(&self) -> Option<&MediaArtifact> {
        self.artifact.as_ref()
    }

    pub fn has_artifact(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn discard_artifact(&mut self) -> Option<MediaArtifact> {
        self.artifact.take()
    }

    /// Add a file to the next submission.
    ///
    /// Types outside the policy's accept list are rejected. A single-file
    /// screen swaps the old file for the new one; otherwise going over the
    /// cap is rejected and nothing is stored.
    pub fn attach(&mut self, attachment: MediaArtifact) -> Result<(), ValidationError> {
        if !self.policy.accepts(&attachment) {
            return Err(ValidationError::UnsupportedType {
                name: attachment.suggested_name().to_string(),
                mime_type: attachment.mime_type().to_string(),
            });
        }
        match self.policy.max_attachments {
            Some(1) if self.attachments.len() == 1 => {
                log::debug!("Replacing {}", self.attachments[0].suggested_name());
                self.attachments.clear();
            }
            Some(max) if self.attachments.len() >= max => {
                return Err(ValidationError::TooManyAttachments { max });
            }
            _ => {}
        }
        log::info!(
            "Attached {} ({} bytes)",
            attachment.suggested_name(),
            attachment.len()
        );
        self.attachments.push(attachment);
        Ok(())
    }

    /// Drop the attachment at `index`; `None` if there is no such attachment.
    pub fn remove_attachment(&mut self, index: usize) -> Option<MediaArtifact> {
        if index >= self.attachments.len() {
            return None;
        }
        let removed = self.attachments.remove(index);
        log::info!("Removed {}", removed.suggested_name());
        Some(removed)
    }

    pub fn attachments(&self) -> &[MediaArtifact] {
        &self.attachments
    }

    pub fn payload(&self) -> SubmissionPayload<'_> {
        SubmissionPayload {
            artifact: self.artifact.as_ref(),
            artifact_field: &self.policy.artifact_field,
            attachments: &self.attachments,
            attachment_field: &self.policy.attachment_field,
            fields: &self.fields,
        }
    }

    /// Validate, send, and apply the outcome.
    ///
    /// Validation failures never reach the transport. Only a successful
    /// upload clears state; after `AuthRequired` or a transport error the
    /// artifact is kept so the user can retry.
    pub async fn submit(
        &mut self,
        transport: &dyn Transport,
        auth: &dyn AuthBootstrap,
        feedback: &dyn Feedback,
    ) -> Result<SubmissionResult, ValidationError> {
        let payload = self.payload();
        if let Err(e) = payload.validate(&self.policy) {
            log::warn!("Submission rejected locally: {}", e);
            feedback.validation_failed(&e);
            return Err(e);
        }

        let result = transport.send(&payload).await;

        match &result {
            SubmissionResult::Success(echo) => {
                log::info!("Submission accepted (status {})", echo.status);
                self.artifact = None;
                self.attachments.clear();
                if self.policy.clear_fields_on_success {
                    self.fields.clear();
                }
                feedback.submitted(echo);
            }
            SubmissionResult::AuthRequired => {
                feedback.auth_required();
                auth.begin();
            }
            SubmissionResult::TransportError(message) => {
                feedback.transport_failed(message);
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::submission::{interpret_response, ServerEcho};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct Canned {
        status: u16,
        body: &'static str,
        calls: AtomicUsize,
    }

    impl Canned {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                status,
                body,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for Canned {
        async fn send(&self, _payload: &SubmissionPayload<'_>) -> SubmissionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            interpret_response(self.status, self.body)
        }
    }

    #[derive(Default)]
    struct CountingAuth(AtomicUsize);

    impl AuthBootstrap for CountingAuth {
        fn begin(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Notes(Mutex<Vec<String>>);

    impl Feedback for Notes {
        fn submitted(&self, echo: &ServerEcho) {
            self.0.lock().unwrap().push(format!("ok {}", echo.status));
        }
        fn validation_failed(&self, error: &ValidationError) {
            self.0.lock().unwrap().push(format!("invalid {}", error));
        }
        fn transport_failed(&self, message: &str) {
            self.0.lock().unwrap().push(format!("failed {}", message));
        }
    }

    fn voice_note() -> SubmissionOrchestrator {
        let mut orchestrator = SubmissionOrchestrator::new(SubmissionPolicy {
            required_field_names: vec!["operator".to_string()],
            ..SubmissionPolicy::default()
        });
        orchestrator.set_field("operator", "Pat");
        orchestrator.set_artifact(MediaArtifact::new(vec![1, 2, 3], "audio/wav", "note.wav"));
        orchestrator
    }

    #[tokio::test]
    async fn success_clears_artifact_and_fields() {
        let mut orchestrator = voice_note();
        let transport = Canned::new(200, r#"{"success":true}"#);
        let notes = Notes::default();

        let result = orchestrator
            .submit(&transport, &CountingAuth::default(), &notes)
            .await
            .unwrap();

        assert!(result.is_success());
        assert!(!orchestrator.has_artifact());
        assert!(orchestrator.fields().is_empty());
        assert_eq!(*notes.0.lock().unwrap(), vec!["ok 200".to_string()]);
    }

    #[tokio::test]
    async fn fields_survive_when_policy_keeps_them() {
        let mut orchestrator = SubmissionOrchestrator::new(SubmissionPolicy {
            clear_fields_on_success: false,
            ..SubmissionPolicy::default()
        });
        orchestrator.set_field("operator", "Pat");
        orchestrator.set_artifact(MediaArtifact::new(vec![1], "audio/wav", "note.wav"));

        orchestrator
            .submit(
                &Canned::new(200, "ok"),
                &CountingAuth::default(),
                &Notes::default(),
            )
            .await
            .unwrap();
        assert_eq!(orchestrator.field("operator"), Some("Pat"));
    }

    #[tokio::test]
    async fn auth_required_keeps_artifact_and_starts_auth() {
        let mut orchestrator = voice_note();
        let auth = CountingAuth::default();

        let result = orchestrator
            .submit(&Canned::new(401, ""), &auth, &Notes::default())
            .await
            .unwrap();

        assert_eq!(result, SubmissionResult::AuthRequired);
        assert!(orchestrator.has_artifact());
        assert_eq!(auth.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_keeps_everything() {
        let mut orchestrator = voice_note();
        let notes = Notes::default();

        let result = orchestrator
            .submit(&Canned::new(500, "boom"), &CountingAuth::default(), &notes)
            .await
            .unwrap();

        assert!(matches!(result, SubmissionResult::TransportError(_)));
        assert!(orchestrator.has_artifact());
        assert_eq!(orchestrator.field("operator"), Some("Pat"));
        let notes = notes.0.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert!(notes[0].contains("boom"));
    }

    #[tokio::test]
    async fn invalid_payload_never_reaches_transport() {
        let mut orchestrator = voice_note();
        orchestrator.set_field("operator", " ");
        let transport = Canned::new(200, "{}");

        let err = orchestrator
            .submit(&transport, &CountingAuth::default(), &Notes::default())
            .await
            .unwrap_err();

        assert_eq!(err, ValidationError::MissingField("operator".to_string()));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
        assert!(orchestrator.has_artifact());
    }

    fn documents() -> SubmissionOrchestrator {
        SubmissionOrchestrator::new(SubmissionPolicy {
            required_field_names: vec!["email".to_string()],
            require_recording: false,
            required_attachments: 2,
            max_attachments: Some(2),
            accepted_types: [".pdf", ".doc", ".docx", ".txt"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            attachment_field: "files".to_string(),
            ..SubmissionPolicy::default()
        })
    }

    fn doc(name: &str, mime_type: &str) -> MediaArtifact {
        MediaArtifact::new(name.as_bytes().to_vec(), mime_type, name)
    }

    #[test]
    fn only_images_can_be_attached_by_default() {
        let mut orchestrator = SubmissionOrchestrator::new(SubmissionPolicy::default());
        let err = orchestrator
            .attach(doc("scan.pdf", "application/pdf"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedType { .. }));
        assert!(orchestrator.attachments().is_empty());

        orchestrator
            .attach(doc("scale.jpg", "image/jpeg"))
            .unwrap();
        assert_eq!(orchestrator.attachments().len(), 1);
    }

    #[test]
    fn document_screen_accepts_documents_up_to_the_cap() {
        let mut orchestrator = documents();
        orchestrator.attach(doc("deed.pdf", "application/pdf")).unwrap();
        orchestrator.attach(doc("notes.txt", "text/plain")).unwrap();

        let err = orchestrator
            .attach(doc("extra.pdf", "application/pdf"))
            .unwrap_err();
        assert_eq!(err, ValidationError::TooManyAttachments { max: 2 });
        assert_eq!(orchestrator.attachments().len(), 2);

        let err = documents()
            .attach(doc("photo.jpg", "image/jpeg"))
            .unwrap_err();
        assert!(matches!(err, ValidationError::UnsupportedType { .. }));
    }

    #[test]
    fn removing_frees_a_slot() {
        let mut orchestrator = documents();
        orchestrator.attach(doc("a.pdf", "application/pdf")).unwrap();
        orchestrator.attach(doc("b.pdf", "application/pdf")).unwrap();

        assert_eq!(orchestrator.remove_attachment(5), None);
        let removed = orchestrator.remove_attachment(0).unwrap();
        assert_eq!(removed.suggested_name(), "a.pdf");
        assert_eq!(orchestrator.attachments()[0].suggested_name(), "b.pdf");

        orchestrator.attach(doc("c.doc", "application/msword")).unwrap();
        assert_eq!(orchestrator.attachments().len(), 2);
    }

    #[test]
    fn single_file_screen_replaces_the_previous_pick() {
        let mut orchestrator = SubmissionOrchestrator::new(SubmissionPolicy {
            max_attachments: Some(1),
            ..SubmissionPolicy::default()
        });
        orchestrator.attach(doc("first.jpg", "image/jpeg")).unwrap();
        orchestrator.attach(doc("second.png", "image/png")).unwrap();

        assert_eq!(orchestrator.attachments().len(), 1);
        assert_eq!(orchestrator.attachments()[0].suggested_name(), "second.png");
    }

    #[tokio::test]
    async fn documents_need_both_files_before_sending() {
        let mut orchestrator = documents();
        orchestrator.set_field("email", "agent@example.com");
        orchestrator.attach(doc("a.pdf", "application/pdf")).unwrap();
        let transport = Canned::new(200, "{}");

        let err = orchestrator
            .submit(&transport, &CountingAuth::default(), &Notes::default())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingAttachments {
                required: 2,
                found: 1
            }
        );
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);

        orchestrator.attach(doc("b.docx", "application/octet-stream")).unwrap();
        let result = orchestrator
            .submit(&transport, &CountingAuth::default(), &Notes::default())
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(orchestrator.attachments().is_empty());
    }
}
