//! Submission module for fieldnote
//!
//! Validates a finished capture, uploads it through the transport, and routes
//! the outcome to feedback or the auth bootstrap.

mod auth;
mod orchestrator;
mod payload;
mod transport;

pub use auth::{AuthBootstrap, BrowserAuthBootstrap};
pub use orchestrator::SubmissionOrchestrator;
pub use payload::{
    ServerEcho, SubmissionPayload, SubmissionPolicy, SubmissionResult, ValidationError,
};
pub use transport::{interpret_response, HttpTransport, Transport};
