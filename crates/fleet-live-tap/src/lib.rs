//! Simulated fare-card tap transactions.
//!
//! Provides:
//! - Wire types for tap requests and validator responses
//! - `TapMachine` - pure `Ready`/`Go`/`Denied` transition function
//! - `TapHistory` - bounded newest-first response history
//! - `TapSimulator` - driver task wiring the machine to a `PubSubClient`

pub mod history;
pub mod machine;
pub mod protocol;
pub mod simulator;
pub mod tone;

pub use history::TapHistory;
pub use machine::{Effect, TapEvent, TapMachine, TapState};
pub use protocol::{
    CARD_PRESETS, CardPreset, Decision, FareDetails, HistoryEntry, TapError, TapRequest, TapResponse,
};
pub use simulator::{TapSimulator, TapView};
pub use tone::{SilentTones, TerminalBell, Tone, ToneSink, ToneStep, Waveform};
