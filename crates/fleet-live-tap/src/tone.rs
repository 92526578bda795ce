//! Notification tones distinguishing admitted and refused taps.
//!
//! Tones are plain data; a `ToneSink` decides how (or whether) to play them.

use std::{io::Write, time::Duration};

use crate::protocol::Decision;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
}

/// One note: attack to `peak_gain`, then decay to silence by `start + length`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneStep {
    pub frequency_hz: f32,
    pub start: Duration,
    pub length: Duration,
    pub peak_gain: f32,
}

/// A short notification sound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    pub waveform: Waveform,
    pub steps: &'static [ToneStep],
}

impl Tone {
    /// Rising two-note chirp.
    pub const GO: Self = Self {
        waveform: Waveform::Sine,
        steps: &[
            ToneStep {
                frequency_hz: 880.0,
                start: Duration::ZERO,
                length: Duration::from_millis(120),
                peak_gain: 0.22,
            },
            ToneStep {
                frequency_hz: 1320.0,
                start: Duration::from_millis(140),
                length: Duration::from_millis(140),
                peak_gain: 0.18,
            },
        ],
    };

    /// Low buzz.
    pub const DENIED: Self = Self {
        waveform: Waveform::Square,
        steps: &[ToneStep {
            frequency_hz: 220.0,
            start: Duration::ZERO,
            length: Duration::from_millis(220),
            peak_gain: 0.22,
        }],
    };

    #[must_use]
    pub const fn for_decision(decision: Decision) -> Self {
        match decision {
            Decision::Go => Self::GO,
            Decision::Denied => Self::DENIED,
        }
    }

    /// Time until the last note has decayed.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.steps
            .iter()
            .map(|step| step.start + step.length)
            .max()
            .unwrap_or_default()
    }
}

/// Plays notification tones.
///
/// Playback must not block; failures are the sink's own business.
pub trait ToneSink: Send + 'static {
    fn play(&mut self, tone: &Tone);
}

/// Discards every tone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentTones;

impl ToneSink for SilentTones {
    fn play(&mut self, _tone: &Tone) {}
}

/// Rings the terminal bell once per note.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalBell;

impl ToneSink for TerminalBell {
    fn play(&mut self, tone: &Tone) {
        let bells = "\x07".repeat(tone.steps.len());
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(bells.as_bytes()).and_then(|()| stderr.flush()) {
            tracing::debug!("Terminal bell failed: {e}");
        }
    }
}

impl<F> ToneSink for F
where
    F: FnMut(&Tone) + Send + 'static,
{
    fn play(&mut self, tone: &Tone) {
        self(tone);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tones_are_distinct() {
        assert_ne!(Tone::for_decision(Decision::Go), Tone::for_decision(Decision::Denied));
        assert_eq!(Tone::GO.waveform, Waveform::Sine);
        assert!((Tone::DENIED.steps[0].frequency_hz - 220.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_tone_duration() {
        assert_eq!(Tone::GO.duration(), Duration::from_millis(280));
        assert_eq!(Tone::DENIED.duration(), Duration::from_millis(220));
    }

    #[test]
    fn test_closure_sink() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut sink = move |tone: &Tone| tx.send(tone.steps.len()).unwrap();
        sink.play(&Tone::GO);
        sink.play(&Tone::DENIED);
        drop(sink);
        assert_eq!(rx.iter().collect::<Vec<_>>(), vec![2, 1]);
    }
}
