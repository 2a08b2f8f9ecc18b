//! Recording controller
//!
//! Owns one screen's capture lifecycle. User intents and device/timer events
//! are turned into reducer events; the effects the reducer returns are executed
//! here, in order, on the calling task. Device events arrive on a per-session
//! channel, timer ticks on the controller's own channel, and everything stale
//! (older session id or frame generation) is dropped.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::capture::{
    device_channel, CaptureDevice, CaptureSession, CaptureStream, Constraints, DeviceError,
    DeviceEvent, DeviceEvents, MediaArtifact,
};
use crate::countdown::CountdownTimer;
use crate::feedback::Feedback;
use crate::settings::ScreenConfig;
use crate::state_machine::{reduce, CountdownState, Effect, Event, State, Status, StopReason};
use crate::submission::{
    AuthBootstrap, SubmissionOrchestrator, SubmissionResult, Transport, ValidationError,
};
use crate::waveform::{amplitude_frames, run_renderer, SessionGeneration, WaveformSink};
use crate::{state_to_ui, Command};

/// How long to wait for the device to confirm stop before giving up on the session
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// A pre-selection field is missing; the device was not touched
    Precondition(String),
    /// `start()` while a session is already active
    AlreadyActive,
    /// `start()` while a stopped recording is waiting to be sent or discarded
    RecordingPending,
    /// The operation needs the controller to be idle or stopped
    Busy,
    DeviceUnavailable(DeviceError),
    DeviceFailed(String),
    Invalid(ValidationError),
    Attachment(String),
}

impl std::fmt::Display for ControllerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerError::Precondition(msg) => write!(f, "{}", msg),
            ControllerError::AlreadyActive => write!(f, "A recording is already in progress"),
            ControllerError::RecordingPending => {
                write!(f, "A recording is waiting: send or re-record first")
            }
            ControllerError::Busy => write!(f, "Please wait for the recording to finish"),
            ControllerError::DeviceUnavailable(e) => write!(f, "Microphone unavailable: {}", e),
            ControllerError::DeviceFailed(e) => write!(f, "Recording failed: {}", e),
            ControllerError::Invalid(e) => write!(f, "{}", e),
            ControllerError::Attachment(e) => write!(f, "Attachment: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<ValidationError> for ControllerError {
    fn from(e: ValidationError) -> Self {
        ControllerError::Invalid(e)
    }
}

/// Everything outside the capture device the controller talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub auth: Arc<dyn AuthBootstrap>,
    pub feedback: Arc<dyn Feedback>,
    pub waveform: Arc<dyn WaveformSink>,
}

/// The stream owned by the current session. Dropping it releases the tracks.
struct ActiveStream {
    session_id: Uuid,
    stream: Box<dyn CaptureStream>,
    events: DeviceEvents,
    /// The device already delivered its `Finalized`
    finalized: bool,
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.stream.release_tracks();
    }
}

pub struct RecordingController {
    config: ScreenConfig,
    state: State,
    device: Box<dyn CaptureDevice>,
    stream: Option<ActiveStream>,
    session: Option<CaptureSession>,
    countdown: Option<CountdownTimer>,
    timer_tx: mpsc::UnboundedSender<Event>,
    timer_rx: mpsc::UnboundedReceiver<Event>,
    generation: SessionGeneration,
    orchestrator: SubmissionOrchestrator,
    collaborators: Collaborators,
    last_device_error: Option<DeviceError>,
    auto_submit_pending: bool,
}

impl RecordingController {
    pub fn new(
        config: ScreenConfig,
        device: Box<dyn CaptureDevice>,
        collaborators: Collaborators,
    ) -> Self {
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let orchestrator = SubmissionOrchestrator::new(config.policy());
        Self {
            config,
            state: State::default(),
            device,
            stream: None,
            session: None,
            countdown: None,
            timer_tx,
            timer_rx,
            generation: SessionGeneration::new(),
            orchestrator,
            collaborators,
            last_device_error: None,
            auto_submit_pending: false,
        }
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn countdown(&self) -> Option<CountdownState> {
        self.state.countdown()
    }

    pub fn artifact(&self) -> Option<&MediaArtifact> {
        self.orchestrator.artifact()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.orchestrator.field(name)
    }

    pub fn attachments(&self) -> &[MediaArtifact] {
        self.orchestrator.attachments()
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.orchestrator.set_field(name, value);
    }

    /// Read a file from disk and attach it to the next submission.
    pub async fn attach(&mut self, path: &Path) -> Result<(), ControllerError> {
        let attachment = MediaArtifact::from_file(path)
            .await
            .map_err(|e| ControllerError::Attachment(format!("{}: {}", path.display(), e)))?;
        if let Err(e) = self.orchestrator.attach(attachment) {
            self.collaborators.feedback.validation_failed(&e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Zero-based, in attach order.
    pub fn remove_attachment(&mut self, index: usize) -> Result<MediaArtifact, ControllerError> {
        self.orchestrator
            .remove_attachment(index)
            .ok_or_else(|| ControllerError::Attachment(format!("no attachment #{}", index + 1)))
    }

    /// Begin a recording session.
    ///
    /// Fails without touching the device when a session is active or a
    /// pre-selection field is empty. Returns once the device is emitting.
    pub async fn start(&mut self) -> Result<(), ControllerError> {
        match self.state {
            State::Idle => {}
            State::Stopped { .. } => return Err(ControllerError::RecordingPending),
            _ => return Err(ControllerError::AlreadyActive),
        }

        for name in &self.config.preselect_field_names {
            let filled = self
                .orchestrator
                .field(name)
                .is_some_and(|v| !v.trim().is_empty());
            if !filled {
                return Err(ControllerError::Precondition(format!(
                    "Please select {} before recording.",
                    name
                )));
            }
        }

        self.last_device_error = None;
        let countdown = self.config.countdown_plan();
        self.dispatch(Event::StartRequested { countdown }).await;

        if matches!(self.state, State::Recording { .. }) {
            Ok(())
        } else {
            let err = self
                .last_device_error
                .take()
                .unwrap_or(DeviceError::NoInputDevice);
            Err(ControllerError::DeviceUnavailable(err))
        }
    }

    /// Stop the current recording. Does nothing unless recording.
    pub async fn stop(&mut self) {
        if !matches!(self.state, State::Recording { .. }) {
            log::debug!("Stop ignored in {:?}", self.state.status());
            return;
        }
        self.dispatch(Event::StopRequested {
            reason: StopReason::Manual,
        })
        .await;
    }

    /// Upload what has been captured. A successful upload resets to Idle.
    pub async fn submit(&mut self) -> Result<SubmissionResult, ControllerError> {
        if matches!(
            self.state,
            State::Arming { .. } | State::Recording { .. } | State::Stopping { .. }
        ) {
            return Err(ControllerError::Busy);
        }

        let result = self.submit_artifact().await?;
        if result.is_success() {
            self.dispatch(Event::Reset).await;
        }
        Ok(result)
    }

    /// Throw away the finished recording and go back to Idle.
    pub async fn rerecord(&mut self) -> Result<(), ControllerError> {
        match self.state {
            State::Stopped { .. } | State::Idle => {
                if self.orchestrator.discard_artifact().is_some() {
                    log::info!("Recording discarded for re-record");
                }
                self.dispatch(Event::Reset).await;
                Ok(())
            }
            _ => Err(ControllerError::Busy),
        }
    }

    /// Release everything. The controller stays usable afterwards.
    pub async fn teardown(&mut self) {
        self.dispatch(Event::Teardown).await;
        self.generation.advance();
        self.countdown = None;
        self.stream = None;
        self.session = None;
    }

    /// Handle every timer and device event that is already queued.
    pub async fn process_pending(&mut self) {
        loop {
            if let Ok(event) = self.timer_rx.try_recv() {
                self.dispatch(event).await;
                continue;
            }
            let next = self.stream.as_mut().and_then(|active| {
                active
                    .events
                    .try_recv()
                    .ok()
                    .map(|event| (active.session_id, event))
            });
            match next {
                Some((id, event)) => self.handle_device_event(id, event).await,
                None => break,
            }
        }
    }

    /// Wait for the next countdown tick (or other timer event) and handle it.
    /// Returns false if the timer channel is closed.
    pub async fn next_timer_event(&mut self) -> bool {
        match self.timer_rx.recv().await {
            Some(event) => {
                self.dispatch(event).await;
                true
            }
            None => false,
        }
    }

    /// Drive the controller from a command channel until `Quit` or the channel closes.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.emit_ui();
        log::info!("Controller for screen '{}' started", self.config.name);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Quit) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.timer_rx.recv() => self.dispatch(event).await,
                (id, event) = next_device_event(&mut self.stream) => {
                    self.handle_device_event(id, event).await
                }
            }
        }

        self.teardown().await;
        log::info!("Controller for screen '{}' ended", self.config.name);
    }

    async fn handle_command(&mut self, command: Command) {
        log::debug!("Command: {:?}", command);
        let outcome = match command {
            Command::Toggle => match self.state {
                State::Idle => self.start().await,
                State::Recording { .. } => {
                    self.stop().await;
                    Ok(())
                }
                State::Stopped { .. } => Err(ControllerError::RecordingPending),
                _ => Ok(()),
            },
            Command::Start => self.start().await,
            Command::Stop => {
                self.stop().await;
                Ok(())
            }
            // Outcomes are already reported by the orchestrator
            Command::Submit => self.submit().await.map(|_| ()),
            Command::Rerecord => self.rerecord().await,
            Command::SetField { name, value } => {
                self.set_field(name, value);
                Ok(())
            }
            Command::Attach(path) => self.attach(&path).await,
            Command::RemoveAttachment(index) => self.remove_attachment(index).map(|_| ()),
            Command::Quit => Ok(()),
        };

        match outcome {
            Ok(()) => {}
            // Validation failures were already surfaced by the orchestrator
            Err(ControllerError::Invalid(_)) => {}
            Err(e) => {
                log::warn!("{}", e);
                self.collaborators.feedback.capture_failed(&e);
            }
        }
    }

    async fn handle_device_event(&mut self, id: Uuid, event: DeviceEvent) {
        if self.state.session_id() != Some(id) {
            log::debug!("Dropping device event from stale session {}", id);
            return;
        }

        match event {
            DeviceEvent::Chunk(bytes) => match self.session.as_mut() {
                Some(session) => session.append(bytes),
                None => log::warn!("Chunk for session {} with no open buffer", id),
            },
            DeviceEvent::Finalized => {
                if let Some(active) = self.stream.as_mut() {
                    active.finalized = true;
                }
                if matches!(self.state, State::Recording { .. }) {
                    log::info!("Capture device ended the stream");
                    self.dispatch(Event::StopRequested {
                        reason: StopReason::DeviceEnded,
                    })
                    .await;
                }
            }
            DeviceEvent::Error(err) => {
                self.collaborators
                    .feedback
                    .capture_failed(&ControllerError::DeviceFailed(err.clone()));
                self.dispatch(Event::DeviceFailed { id, err }).await;
            }
        }
    }

    /// Run the reducer over `event` and every follow-up event the effects produce.
    async fn dispatch(&mut self, event: Event) {
        let mut queue = VecDeque::from([event]);

        loop {
            let Some(event) = queue.pop_front() else {
                if std::mem::take(&mut self.auto_submit_pending) {
                    if let Ok(result) = self.submit_artifact().await {
                        if result.is_success() {
                            queue.push_back(Event::Reset);
                            continue;
                        }
                    }
                }
                break;
            };

            log::debug!("Received event: {:?}", event);

            let old_discriminant = std::mem::discriminant(&self.state);
            let (next, effects) = reduce(&self.state, event);
            if old_discriminant != std::mem::discriminant(&next) {
                log::info!("State transition: {:?} -> {:?}", self.state, next);
            }
            self.state = next;

            for effect in effects {
                if let Some(follow_up) = self.apply(effect).await {
                    queue.push_back(follow_up);
                }
            }
        }
    }

    async fn apply(&mut self, effect: Effect) -> Option<Event> {
        match effect {
            Effect::AcquireDevice { id } => Some(self.acquire(id).await),

            Effect::FinalizeDevice { id } => Some(self.finalize(id).await),

            Effect::ReleaseDevice { id } => {
                if self.stream.take().is_some() {
                    log::info!("Session {} released", id);
                }
                self.session = None;
                None
            }

            Effect::StartSampler { id } => {
                let captured = self.generation.advance();
                let source = self
                    .stream
                    .as_ref()
                    .and_then(|active| active.stream.amplitude_source());
                match source {
                    Some(source) => {
                        let frames = amplitude_frames(
                            source,
                            self.generation.clone(),
                            captured,
                            Duration::from_millis(self.config.frame_interval_ms.max(1)),
                        );
                        tokio::spawn(run_renderer(
                            frames,
                            self.config.bar_layout(),
                            self.config.smoothing,
                            self.collaborators.waveform.clone(),
                        ));
                        log::debug!("Sampler started for session {} (gen {})", id, captured);
                    }
                    None => log::debug!("Session {} has no amplitude source", id),
                }
                None
            }

            Effect::StopSampler { .. } => {
                self.generation.advance();
                None
            }

            Effect::ArmCountdown {
                id,
                delay,
                duration_secs,
            } => {
                self.countdown = Some(CountdownTimer::arm(
                    id,
                    delay,
                    duration_secs,
                    self.timer_tx.clone(),
                ));
                None
            }

            Effect::CancelCountdown { id } => {
                if let Some(timer) = self.countdown.take() {
                    if timer.session_id() != id {
                        log::warn!(
                            "Cancelling countdown of session {} on behalf of {}",
                            timer.session_id(),
                            id
                        );
                    }
                    timer.cancel();
                }
                None
            }

            Effect::BuildArtifact { id } => {
                match self.session.take() {
                    Some(session) if session.session_id() == id => {
                        let name = self.config.suggested_name_for(self.orchestrator.fields());
                        let artifact = session.finalize(name);
                        self.orchestrator.set_artifact(artifact);
                        self.auto_submit_pending = self.config.auto_submit_on_stop;
                    }
                    Some(session) => {
                        log::warn!(
                            "Chunk buffer belongs to session {}, not {}",
                            session.session_id(),
                            id
                        );
                    }
                    None => log::warn!("Session {} stopped with no chunk buffer", id),
                }
                None
            }

            Effect::EmitUi => {
                self.emit_ui();
                None
            }
        }
    }

    async fn acquire(&mut self, id: Uuid) -> Event {
        let (sink, events) = device_channel();
        let constraints = Constraints::default();

        let mut stream = match self.device.acquire(&constraints, sink).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Failed to acquire capture device: {}", e);
                let err = e.to_string();
                self.last_device_error = Some(e);
                return Event::DeviceUnavailable { id, err };
            }
        };

        if let Err(e) = stream.start_emission() {
            log::error!("Failed to start capture: {}", e);
            stream.release_tracks();
            let err = e.to_string();
            self.last_device_error = Some(e);
            return Event::DeviceUnavailable { id, err };
        }

        self.session = Some(CaptureSession::new(id, stream.mime_type()));
        self.stream = Some(ActiveStream {
            session_id: id,
            stream,
            events,
            finalized: false,
        });
        log::info!("Session {} recording", id);
        Event::DeviceReady { id }
    }

    /// Stop emission, release the tracks, then collect the remaining chunks
    /// until the device confirms.
    async fn finalize(&mut self, id: Uuid) -> Event {
        let Some(mut active) = self.stream.take() else {
            return Event::DeviceFailed {
                id,
                err: "no active stream".to_string(),
            };
        };

        if let Err(e) = active.stream.stop_emission() {
            log::error!("Failed to stop capture: {}", e);
            let err = e.to_string();
            self.collaborators
                .feedback
                .capture_failed(&ControllerError::DeviceFailed(err.clone()));
            return Event::DeviceFailed { id, err };
        }
        active.stream.release_tracks();

        if active.finalized {
            return Event::DeviceFinalized { id };
        }

        let session = &mut self.session;
        let drain = async {
            while let Some(event) = active.events.recv().await {
                match event {
                    DeviceEvent::Chunk(bytes) => {
                        if let Some(session) = session.as_mut() {
                            session.append(bytes);
                        }
                    }
                    DeviceEvent::Finalized => return Ok(()),
                    DeviceEvent::Error(err) => return Err(err),
                }
            }
            Err("capture device closed before confirming stop".to_string())
        };

        match tokio::time::timeout(FINALIZE_TIMEOUT, drain).await {
            Ok(Ok(())) => Event::DeviceFinalized { id },
            Ok(Err(err)) => {
                self.collaborators
                    .feedback
                    .capture_failed(&ControllerError::DeviceFailed(err.clone()));
                Event::DeviceFailed { id, err }
            }
            Err(_) => {
                let err = format!(
                    "capture device did not confirm stop within {:?}",
                    FINALIZE_TIMEOUT
                );
                log::error!("Session {}: {}", id, err);
                self.collaborators
                    .feedback
                    .capture_failed(&ControllerError::DeviceFailed(err.clone()));
                Event::DeviceFailed { id, err }
            }
        }
    }

    async fn submit_artifact(&mut self) -> Result<SubmissionResult, ControllerError> {
        let Collaborators {
            transport,
            auth,
            feedback,
            ..
        } = &self.collaborators;
        let result = self
            .orchestrator
            .submit(transport.as_ref(), auth.as_ref(), feedback.as_ref())
            .await?;
        self.emit_ui();
        Ok(result)
    }

    fn emit_ui(&self) {
        let ui = state_to_ui(&self.state, self.orchestrator.has_artifact());
        self.collaborators.feedback.state_changed(&ui);
    }
}

impl Drop for RecordingController {
    fn drop(&mut self) {
        // Ends any frame loop still running for this controller
        self.generation.advance();
    }
}

/// Next event from the active stream. Pends forever when there is no stream
/// (or its channel closed) so it can sit in a `select!`.
async fn next_device_event(stream: &mut Option<ActiveStream>) -> (Uuid, DeviceEvent) {
    if let Some(active) = stream.as_mut() {
        if let Some(event) = active.events.recv().await {
            return (active.session_id, event);
        }
    }
    std::future::pending().await
}
