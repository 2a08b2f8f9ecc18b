//! Capture lifecycle state machine
//!
//! All capture transitions go through the `reduce()` function, which returns
//! a new state and a list of effects for the controller to execute. Device,
//! timer and frame-loop work never happens here.

use std::time::{Duration, Instant};
use uuid::Uuid;

/// Coarse status of the capture session as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Idle,
    Recording,
    Stopped,
}

/// Countdown progress for a timed recording window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownState {
    pub remaining_secs: u32,
    pub active: bool,
    pub start_delay_ms: u64,
}

/// Countdown requested for the next session (taken from the screen config).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownPlan {
    pub delay_ms: u64,
    pub duration_secs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Manual,
    CountdownExpired,
    DeviceEnded,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopReason::Manual => "manual",
            StopReason::CountdownExpired => "countdown",
            StopReason::DeviceEnded => "device",
        }
    }
}

/// Internal state of the capture workflow.
/// This is the authoritative state - all transitions go through the reducer.
#[derive(Debug, Clone, Default)]
pub enum State {
    #[default]
    Idle,
    /// Device acquisition in flight
    Arming {
        session_id: Uuid,
        countdown: Option<CountdownPlan>,
    },
    Recording {
        session_id: Uuid,
        started_at: Instant,
        countdown: Option<CountdownState>,
    },
    /// Waiting for the device to confirm stop. Keeps the countdown as it
    /// was when recording ended, no longer active.
    Stopping {
        session_id: Uuid,
        countdown: Option<CountdownState>,
    },
    Stopped {
        session_id: Uuid,
        countdown: Option<CountdownState>,
    },
}

impl State {
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            State::Idle => None,
            State::Arming { session_id, .. }
            | State::Recording { session_id, .. }
            | State::Stopping { session_id, .. }
            | State::Stopped { session_id, .. } => Some(*session_id),
        }
    }

    /// Arming has not acquired anything yet and Stopping is still finalizing,
    /// so they report as Idle and Recording respectively.
    pub fn status(&self) -> Status {
        match self {
            State::Idle | State::Arming { .. } => Status::Idle,
            State::Recording { .. } | State::Stopping { .. } => Status::Recording,
            State::Stopped { .. } => Status::Stopped,
        }
    }

    pub fn countdown(&self) -> Option<CountdownState> {
        match self {
            State::Recording { countdown, .. }
            | State::Stopping { countdown, .. }
            | State::Stopped { countdown, .. } => *countdown,
            State::Idle | State::Arming { .. } => None,
        }
    }
}

/// Events that can trigger state transitions.
/// Sent by the controller on behalf of the user, the capture device and the countdown.
#[derive(Debug, Clone)]
pub enum Event {
    StartRequested {
        countdown: Option<CountdownPlan>,
    },
    StopRequested {
        reason: StopReason,
    },
    /// Discard the stopped session (re-record, or after a successful upload)
    Reset,
    /// Component is going away; release everything without producing an artifact
    Teardown,

    // Device events
    DeviceReady {
        id: Uuid,
    },
    DeviceUnavailable {
        id: Uuid,
        err: String,
    },
    DeviceFinalized {
        id: Uuid,
    },
    DeviceFailed {
        id: Uuid,
        err: String,
    },

    // Timer events (include id to prevent stale ticks)
    CountdownTick {
        id: Uuid,
    },
}

/// Effects to be executed after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    AcquireDevice {
        id: Uuid,
    },
    /// Stop emission, release tracks and wait for the device to confirm
    FinalizeDevice {
        id: Uuid,
    },
    /// Release tracks without building an artifact
    ReleaseDevice {
        id: Uuid,
    },
    StartSampler {
        id: Uuid,
    },
    StopSampler {
        id: Uuid,
    },
    ArmCountdown {
        id: Uuid,
        delay: Duration,
        duration_secs: u32,
    },
    CancelCountdown {
        id: Uuid,
    },
    BuildArtifact {
        id: Uuid,
    },
    /// Signal to emit UI state to the feedback sink
    EmitUi,
}

fn halted(countdown: &Option<CountdownState>) -> Option<CountdownState> {
    countdown.map(|c| CountdownState {
        active: false,
        ..c
    })
}

fn stop_effects(id: Uuid) -> Vec<Effect> {
    vec![
        Effect::CancelCountdown { id },
        Effect::StopSampler { id },
        Effect::FinalizeDevice { id },
        Effect::EmitUi,
    ]
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - Never mutate state directly
/// - Ignore events with stale session IDs
/// - Stopped is only reachable through Stopping, which is only reachable from Recording
pub fn reduce(state: &State, event: Event) -> (State, Vec<Effect>) {
    use Effect::*;
    use Event::*;
    use State::*;

    match (state, event) {
        // -----------------
        // Idle
        // -----------------
        (Idle, StartRequested { countdown }) => {
            let id = Uuid::new_v4();
            (
                Arming {
                    session_id: id,
                    countdown,
                },
                vec![AcquireDevice { id }, EmitUi],
            )
        }

        // -----------------
        // Arming
        // -----------------
        (
            Arming {
                session_id,
                countdown,
            },
            DeviceReady { id },
        ) if *session_id == id => {
            let mut effects = vec![StartSampler { id }];
            let countdown = countdown.map(|plan| {
                effects.push(ArmCountdown {
                    id,
                    delay: Duration::from_millis(plan.delay_ms),
                    duration_secs: plan.duration_secs,
                });
                CountdownState {
                    remaining_secs: plan.duration_secs,
                    active: plan.duration_secs > 0,
                    start_delay_ms: plan.delay_ms,
                }
            });
            effects.push(EmitUi);
            (
                Recording {
                    session_id: id,
                    started_at: Instant::now(),
                    countdown,
                },
                effects,
            )
        }
        (Arming { session_id, .. }, DeviceUnavailable { id, err }) if *session_id == id => {
            log::warn!("Session {} could not acquire a capture device: {}", id, err);
            (Idle, vec![ReleaseDevice { id }, EmitUi])
        }
        (Arming { session_id, .. }, StopRequested { .. } | Teardown) => (
            Idle,
            vec![ReleaseDevice { id: *session_id }, EmitUi],
        ),

        // -----------------
        // Recording
        // -----------------
        (
            Recording {
                session_id,
                countdown,
                ..
            },
            StopRequested { reason },
        ) => {
            log::info!("Session {} stopping ({})", session_id, reason.as_str());
            (
                Stopping {
                    session_id: *session_id,
                    countdown: halted(countdown),
                },
                stop_effects(*session_id),
            )
        }
        (
            Recording {
                session_id,
                started_at,
                countdown: Some(countdown),
            },
            CountdownTick { id },
        ) if *session_id == id && countdown.active && countdown.remaining_secs > 0 => {
            let remaining_secs = countdown.remaining_secs - 1;
            if remaining_secs == 0 {
                log::info!(
                    "Session {} countdown expired after {:?}",
                    session_id,
                    started_at.elapsed()
                );
                let countdown = CountdownState {
                    remaining_secs: 0,
                    active: false,
                    ..*countdown
                };
                (
                    Stopping {
                        session_id: id,
                        countdown: Some(countdown),
                    },
                    stop_effects(id),
                )
            } else {
                (
                    Recording {
                        session_id: id,
                        started_at: *started_at,
                        countdown: Some(CountdownState {
                            remaining_secs,
                            ..*countdown
                        }),
                    },
                    vec![EmitUi],
                )
            }
        }
        (Recording { session_id, .. }, DeviceFailed { id, err }) if *session_id == id => {
            log::error!("Session {} device failed while recording: {}", id, err);
            (
                Idle,
                vec![
                    CancelCountdown { id },
                    StopSampler { id },
                    ReleaseDevice { id },
                    EmitUi,
                ],
            )
        }
        (Recording { session_id, .. }, Teardown) => {
            let id = *session_id;
            (
                Idle,
                vec![
                    CancelCountdown { id },
                    StopSampler { id },
                    ReleaseDevice { id },
                    EmitUi,
                ],
            )
        }

        // -----------------
        // Stopping
        // -----------------
        (
            Stopping {
                session_id,
                countdown,
            },
            DeviceFinalized { id },
        ) if *session_id == id => (
            Stopped {
                session_id: id,
                countdown: *countdown,
            },
            vec![BuildArtifact { id }, EmitUi],
        ),
        (Stopping { session_id, .. }, DeviceFailed { id, err }) if *session_id == id => {
            log::error!("Session {} device failed while finalizing: {}", id, err);
            (Idle, vec![ReleaseDevice { id }, EmitUi])
        }
        (Stopping { session_id, .. }, Teardown) => (
            Idle,
            vec![ReleaseDevice { id: *session_id }, EmitUi],
        ),

        // -----------------
        // Stopped
        // -----------------
        (Stopped { .. }, Reset | Teardown) => (Idle, vec![EmitUi]),

        // -----------------
        // Unhandled or stale: no transition
        // -----------------
        _ => (state.clone(), vec![]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(id: Uuid, countdown: Option<CountdownState>) -> State {
        State::Recording {
            session_id: id,
            started_at: Instant::now(),
            countdown,
        }
    }

    #[test]
    fn idle_start_transitions_to_arming() {
        let (next, effects) = reduce(&State::Idle, Event::StartRequested { countdown: None });
        assert!(matches!(next, State::Arming { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::AcquireDevice { .. })));
        assert!(effects.iter().any(|e| matches!(e, Effect::EmitUi)));
        assert_eq!(next.status(), Status::Idle);
    }

    #[test]
    fn arming_device_ready_transitions_to_recording() {
        let id = Uuid::new_v4();
        let state = State::Arming {
            session_id: id,
            countdown: None,
        };
        let (next, effects) = reduce(&state, Event::DeviceReady { id });
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.contains(&Effect::StartSampler { id }));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::ArmCountdown { .. })));
    }

    #[test]
    fn device_ready_arms_countdown_when_planned() {
        let id = Uuid::new_v4();
        let state = State::Arming {
            session_id: id,
            countdown: Some(CountdownPlan {
                delay_ms: 3000,
                duration_secs: 60,
            }),
        };
        let (next, effects) = reduce(&state, Event::DeviceReady { id });
        assert_eq!(
            next.countdown(),
            Some(CountdownState {
                remaining_secs: 60,
                active: true,
                start_delay_ms: 3000,
            })
        );
        assert!(effects.contains(&Effect::ArmCountdown {
            id,
            delay: Duration::from_millis(3000),
            duration_secs: 60,
        }));
    }

    #[test]
    fn device_unavailable_returns_to_idle() {
        let id = Uuid::new_v4();
        let state = State::Arming {
            session_id: id,
            countdown: None,
        };
        let (next, _) = reduce(
            &state,
            Event::DeviceUnavailable {
                id,
                err: "permission denied".to_string(),
            },
        );
        assert!(matches!(next, State::Idle));
    }

    #[test]
    fn stale_event_is_ignored() {
        let id = Uuid::new_v4();
        let stale_id = Uuid::new_v4();
        let state = State::Arming {
            session_id: id,
            countdown: None,
        };
        let (next, effects) = reduce(&state, Event::DeviceReady { id: stale_id });
        assert!(matches!(next, State::Arming { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_while_idle_is_a_no_op() {
        let (next, effects) = reduce(
            &State::Idle,
            Event::StopRequested {
                reason: StopReason::Manual,
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.is_empty());
    }

    #[test]
    fn stop_during_recording_cancels_countdown_and_finalizes() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &recording(id, None),
            Event::StopRequested {
                reason: StopReason::Manual,
            },
        );
        assert!(matches!(next, State::Stopping { .. }));
        assert_eq!(
            effects,
            vec![
                Effect::CancelCountdown { id },
                Effect::StopSampler { id },
                Effect::FinalizeDevice { id },
                Effect::EmitUi,
            ]
        );
    }

    #[test]
    fn countdown_tick_decrements_remaining() {
        let id = Uuid::new_v4();
        let state = recording(
            id,
            Some(CountdownState {
                remaining_secs: 3,
                active: true,
                start_delay_ms: 0,
            }),
        );
        let (next, effects) = reduce(&state, Event::CountdownTick { id });
        assert_eq!(next.countdown().map(|c| c.remaining_secs), Some(2));
        assert_eq!(effects, vec![Effect::EmitUi]);
    }

    #[test]
    fn countdown_reaching_zero_forces_stop() {
        let id = Uuid::new_v4();
        let state = recording(
            id,
            Some(CountdownState {
                remaining_secs: 1,
                active: true,
                start_delay_ms: 0,
            }),
        );
        let (next, effects) = reduce(&state, Event::CountdownTick { id });
        assert!(matches!(next, State::Stopping { .. }));
        assert_eq!(
            next.countdown(),
            Some(CountdownState {
                remaining_secs: 0,
                active: false,
                start_delay_ms: 0,
            })
        );
        assert_eq!(
            effects
                .iter()
                .filter(|e| matches!(e, Effect::FinalizeDevice { .. }))
                .count(),
            1
        );

        // A tick already queued behind the expiry must not stop again
        let (after, effects) = reduce(&next, Event::CountdownTick { id });
        assert!(matches!(after, State::Stopping { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_countdown_tick_does_not_touch_new_session() {
        let old_id = Uuid::new_v4();
        let new_id = Uuid::new_v4();
        let state = recording(
            new_id,
            Some(CountdownState {
                remaining_secs: 1,
                active: true,
                start_delay_ms: 0,
            }),
        );
        let (next, effects) = reduce(&state, Event::CountdownTick { id: old_id });
        assert!(matches!(next, State::Recording { .. }));
        assert!(effects.is_empty());
    }

    #[test]
    fn stopping_finalized_builds_artifact() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &State::Stopping {
                session_id: id,
                countdown: None,
            },
            Event::DeviceFinalized { id },
        );
        assert!(matches!(next, State::Stopped { .. }));
        assert!(effects.contains(&Effect::BuildArtifact { id }));
    }

    #[test]
    fn final_countdown_survives_into_stopped() {
        let id = Uuid::new_v4();
        let state = recording(
            id,
            Some(CountdownState {
                remaining_secs: 1,
                active: true,
                start_delay_ms: 3000,
            }),
        );
        let (stopping, _) = reduce(&state, Event::CountdownTick { id });
        let (stopped, _) = reduce(&stopping, Event::DeviceFinalized { id });
        assert_eq!(
            stopped.countdown(),
            Some(CountdownState {
                remaining_secs: 0,
                active: false,
                start_delay_ms: 3000,
            })
        );

        let (idle, _) = reduce(&stopped, Event::Reset);
        assert_eq!(idle.countdown(), None);
    }

    #[test]
    fn manual_stop_freezes_remaining_time() {
        let id = Uuid::new_v4();
        let state = recording(
            id,
            Some(CountdownState {
                remaining_secs: 17,
                active: true,
                start_delay_ms: 0,
            }),
        );
        let (next, _) = reduce(
            &state,
            Event::StopRequested {
                reason: StopReason::Manual,
            },
        );
        assert_eq!(
            next.countdown(),
            Some(CountdownState {
                remaining_secs: 17,
                active: false,
                start_delay_ms: 0,
            })
        );
    }

    #[test]
    fn device_failure_while_recording_releases_everything() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(
            &recording(id, None),
            Event::DeviceFailed {
                id,
                err: "unplugged".to_string(),
            },
        );
        assert!(matches!(next, State::Idle));
        assert!(effects.contains(&Effect::CancelCountdown { id }));
        assert!(effects.contains(&Effect::ReleaseDevice { id }));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::BuildArtifact { .. })));
    }

    #[test]
    fn teardown_during_recording_releases_without_artifact() {
        let id = Uuid::new_v4();
        let (next, effects) = reduce(&recording(id, None), Event::Teardown);
        assert!(matches!(next, State::Idle));
        assert!(effects.contains(&Effect::ReleaseDevice { id }));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::BuildArtifact { .. })));
    }

    #[test]
    fn reset_returns_stopped_to_idle() {
        let id = Uuid::new_v4();
        let (next, _) = reduce(
            &State::Stopped {
                session_id: id,
                countdown: None,
            },
            Event::Reset,
        );
        assert!(matches!(next, State::Idle));
    }

    #[test]
    fn start_is_ignored_outside_idle() {
        let id = Uuid::new_v4();
        let state = recording(id, None);
        let (next, effects) = reduce(&state, Event::StartRequested { countdown: None });
        assert_eq!(next.session_id(), Some(id));
        assert!(effects.is_empty());
    }

    /// Walk every event sequence up to length 5 and check that Stopped is never
    /// entered from anything but Stopping (and Stopping only from Recording).
    #[test]
    fn stopped_is_never_reached_without_recording() {
        fn alphabet(id: Uuid) -> Vec<Event> {
            vec![
                Event::StartRequested { countdown: None },
                Event::StopRequested {
                    reason: StopReason::Manual,
                },
                Event::Reset,
                Event::Teardown,
                Event::DeviceReady { id },
                Event::DeviceFinalized { id },
                Event::DeviceFailed {
                    id,
                    err: "x".to_string(),
                },
                Event::CountdownTick { id },
            ]
        }

        fn walk(state: State, depth: usize) {
            if depth == 0 {
                return;
            }
            let id = state.session_id().unwrap_or_else(Uuid::new_v4);
            for event in alphabet(id) {
                let (next, _) = reduce(&state, event);
                match (&state, &next) {
                    (State::Stopped { .. }, State::Stopped { .. }) => {}
                    (State::Stopping { .. }, State::Stopped { .. }) => {}
                    (_, State::Stopped { .. }) => panic!("{:?} jumped to Stopped", state),
                    (State::Recording { .. }, State::Stopping { .. }) => {}
                    (State::Stopping { .. }, State::Stopping { .. }) => {}
                    (_, State::Stopping { .. }) => panic!("{:?} jumped to Stopping", state),
                    _ => {}
                }
                walk(next, depth - 1);
            }
        }

        walk(State::Idle, 5);
    }
}
