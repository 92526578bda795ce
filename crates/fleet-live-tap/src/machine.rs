//! Tap state machine as a pure transition function.
//!
//! `Ready` moves to `Go` or `Denied` when a response arrives and back to
//! `Ready` when the reset timer for the latest response expires. I/O and
//! timers are returned as `Effect`s for the caller to carry out.

use std::time::Duration;

use fleet_live_core::TapConfig;

use crate::{
    history::TapHistory,
    protocol::{Decision, TapRequest, TapResponse},
    tone::Tone,
};

/// Screen state of the simulated reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TapState {
    #[default]
    Ready,
    Go,
    Denied,
}

impl From<Decision> for TapState {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Go => Self::Go,
            Decision::Denied => Self::Denied,
        }
    }
}

/// Input to the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TapEvent {
    /// The user tapped card `uid` at `now` (Unix seconds).
    Tapped { uid: String, now: i64 },
    /// A payload arrived on the response topic.
    Response(Vec<u8>),
    /// The reset timer armed with `generation` expired.
    ResetElapsed { generation: u64 },
}

/// Work requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Publish(TapRequest),
    PlayTone(Tone),
    /// Replace any pending reset timer with one firing after `after`.
    ArmReset { after: Duration, generation: u64 },
}

/// Tap state, current response and history.
///
/// Responses are not correlated with requests: whichever response arrives
/// is taken as the answer to the most recent tap. Taps are accepted in
/// every state.
#[derive(Debug, Clone)]
pub struct TapMachine {
    state: TapState,
    current: Option<TapResponse>,
    history: TapHistory,
    reset_after: Duration,
    generation: u64,
}

impl TapMachine {
    #[must_use]
    pub fn new(config: &TapConfig) -> Self {
        Self {
            state: TapState::Ready,
            current: None,
            history: TapHistory::new(config.history_capacity),
            reset_after: config.reset_after(),
            generation: 0,
        }
    }

    #[must_use]
    pub const fn state(&self) -> TapState {
        self.state
    }

    /// Response shown until the next reset.
    #[must_use]
    pub const fn current(&self) -> Option<&TapResponse> {
        self.current.as_ref()
    }

    #[must_use]
    pub const fn history(&self) -> &TapHistory {
        &self.history
    }

    /// Apply `event`, returning the effects to carry out in order.
    pub fn handle(&mut self, event: TapEvent) -> Vec<Effect> {
        match event {
            TapEvent::Tapped { uid, now } => vec![Effect::Publish(TapRequest::demo(uid, now))],
            TapEvent::Response(payload) => self.accept(&payload),
            TapEvent::ResetElapsed { generation } => {
                if generation == self.generation {
                    self.state = TapState::Ready;
                    self.current = None;
                } else {
                    tracing::trace!(generation, current = self.generation, "Stale reset ignored");
                }
                Vec::new()
            }
        }
    }

    fn accept(&mut self, payload: &[u8]) -> Vec<Effect> {
        let response = match TapResponse::parse(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("Dropping tap response: {e}");
                return Vec::new();
            }
        };

        let decision = response.decision();
        self.state = decision.into();
        self.history.push(response.to_history_entry());
        self.current = Some(response);
        self.generation += 1;

        vec![
            Effect::PlayTone(Tone::for_decision(decision)),
            Effect::ArmReset {
                after: self.reset_after,
                generation: self.generation,
            },
        ]
    }
}
