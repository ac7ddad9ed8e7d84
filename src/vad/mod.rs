//! Voice activity and barge-in detection (§4.9).
//!
//! Energy-based, not a neural VAD: a pre-roll ring buffer captures audio
//! just before speech is declared (so the ASR segment doesn't clip the
//! onset), an in-speech flag tracks whether we're mid-utterance, and a
//! silence run-length against a configurable threshold declares the
//! endpoint. The same detector doubles as the barge-in trigger while the
//! turn is SPEAKING: the first few frames of sustained energy above
//! threshold during playback are reported as a barge-in rather than an
//! endpoint.

use std::collections::VecDeque;
use std::time::Instant;

const DEFAULT_PRE_ROLL_MS: u32 = 300;
const DEFAULT_SILENCE_THRESHOLD_MS: u32 = 500;
const DEFAULT_BARGEIN_THRESHOLD_MS: u32 = 120;
const DEFAULT_ENERGY_THRESHOLD: f32 = 0.02;

/// Result of feeding one chunk of audio to the detector.
#[derive(Debug, Clone, Default)]
pub struct VadOutput {
    /// True on the chunk where speech was first declared.
    pub speech_started: bool,
    /// True while the detector considers the session actively speaking.
    pub is_speech: bool,
    /// Set once silence has run long enough to declare the endpoint; the
    /// caller should treat this as `EndpointDetected` and take the buffered
    /// samples for ASR.
    pub segment: Option<Vec<f32>>,
    /// Set once sustained energy during playback crosses the shorter
    /// barge-in threshold.
    pub barge_in: bool,
    pub rms: f32,
}

pub struct VoiceActivityDetector {
    sample_rate: u32,
    energy_threshold: f32,
    pre_roll: VecDeque<f32>,
    pre_roll_capacity: usize,
    speech_buffer: Vec<f32>,
    in_speech: bool,
    silence_samples: usize,
    silence_threshold_samples: usize,
    bargein_active_samples: usize,
    bargein_threshold_samples: usize,
    speech_start: Option<Instant>,
}

impl VoiceActivityDetector {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self::with_thresholds(
            sample_rate,
            DEFAULT_ENERGY_THRESHOLD,
            DEFAULT_PRE_ROLL_MS,
            DEFAULT_SILENCE_THRESHOLD_MS,
            DEFAULT_BARGEIN_THRESHOLD_MS,
        )
    }

    #[must_use]
    pub fn with_thresholds(
        sample_rate: u32,
        energy_threshold: f32,
        pre_roll_ms: u32,
        silence_threshold_ms: u32,
        bargein_threshold_ms: u32,
    ) -> Self {
        let samples_per_ms = sample_rate as usize / 1000;
        Self {
            sample_rate,
            energy_threshold,
            pre_roll: VecDeque::new(),
            pre_roll_capacity: pre_roll_ms as usize * samples_per_ms,
            speech_buffer: Vec::new(),
            in_speech: false,
            silence_samples: 0,
            silence_threshold_samples: silence_threshold_ms as usize * samples_per_ms,
            bargein_active_samples: 0,
            bargein_threshold_samples: bargein_threshold_ms as usize * samples_per_ms,
            speech_start: None,
        }
    }

    /// Narrow the endpoint threshold for barge-in detection; typically
    /// called when the turn enters SPEAKING so a shorter sustained-energy
    /// run is enough to interrupt than is needed to declare a fresh
    /// endpoint from LISTENING.
    pub fn set_bargein_threshold_ms(&mut self, ms: u32) {
        let samples_per_ms = self.sample_rate as usize / 1000;
        self.bargein_threshold_samples = ms as usize * samples_per_ms;
    }

    fn compute_rms(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
        (sum_sq / samples.len() as f32).sqrt()
    }

    /// Process one chunk during LISTENING: accumulate pre-roll, detect
    /// speech onset, buffer the utterance, and declare the endpoint once
    /// silence has run long enough.
    pub fn process_chunk(&mut self, samples: &[f32]) -> VadOutput {
        let rms = Self::compute_rms(samples);
        let is_loud = rms >= self.energy_threshold;
        let mut output = VadOutput {
            rms,
            ..Default::default()
        };

        if !self.in_speech {
            if is_loud {
                self.in_speech = true;
                self.speech_start = Some(Instant::now());
                self.speech_buffer.clear();
                self.speech_buffer.extend(self.pre_roll.iter().copied());
                self.speech_buffer.extend_from_slice(samples);
                self.silence_samples = 0;
                output.speech_started = true;
                output.is_speech = true;
            } else {
                self.push_pre_roll(samples);
            }
            return output;
        }

        self.speech_buffer.extend_from_slice(samples);
        output.is_speech = true;

        if is_loud {
            self.silence_samples = 0;
        } else {
            self.silence_samples += samples.len();
            if self.silence_samples >= self.silence_threshold_samples {
                output.segment = Some(std::mem::take(&mut self.speech_buffer));
                self.in_speech = false;
                self.silence_samples = 0;
                self.speech_start = None;
                output.is_speech = false;
            }
        }

        output
    }

    /// Process one chunk during SPEAKING: look only for sustained energy
    /// long enough to count as a barge-in, ignoring the endpoint logic
    /// above (there's no ongoing utterance to close out yet).
    pub fn process_chunk_for_bargein(&mut self, samples: &[f32]) -> VadOutput {
        let rms = Self::compute_rms(samples);
        let is_loud = rms >= self.energy_threshold;
        let mut output = VadOutput {
            rms,
            ..Default::default()
        };

        if is_loud {
            self.bargein_active_samples += samples.len();
            if self.bargein_active_samples >= self.bargein_threshold_samples {
                output.barge_in = true;
                self.bargein_active_samples = 0;
            }
        } else {
            self.bargein_active_samples = 0;
        }

        output
    }

    fn push_pre_roll(&mut self, samples: &[f32]) {
        self.pre_roll.extend(samples.iter().copied());
        while self.pre_roll.len() > self.pre_roll_capacity {
            self.pre_roll.pop_front();
        }
    }

    pub fn reset(&mut self) {
        self.pre_roll.clear();
        self.speech_buffer.clear();
        self.in_speech = false;
        self.silence_samples = 0;
        self.bargein_active_samples = 0;
        self.speech_start = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud(n: usize) -> Vec<f32> {
        vec![0.5; n]
    }

    fn quiet(n: usize) -> Vec<f32> {
        vec![0.0; n]
    }

    #[test]
    fn silence_never_starts_speech() {
        let mut vad = VoiceActivityDetector::new(16_000);
        let out = vad.process_chunk(&quiet(320));
        assert!(!out.speech_started);
        assert!(!out.is_speech);
    }

    #[test]
    fn loud_chunk_starts_speech_and_endpoint_after_silence() {
        let mut vad = VoiceActivityDetector::with_thresholds(16_000, 0.02, 100, 100, 60);
        let out = vad.process_chunk(&loud(320));
        assert!(out.speech_started);
        assert!(out.segment.is_none());

        // 100ms silence threshold @ 16kHz = 1600 samples.
        let out = vad.process_chunk(&quiet(1600));
        assert!(out.segment.is_some());
        assert!(!out.is_speech);
    }

    #[test]
    fn pre_roll_is_included_in_the_declared_segment() {
        let mut vad = VoiceActivityDetector::with_thresholds(16_000, 0.02, 50, 100, 60);
        // 50ms pre-roll @ 16kHz = 800 samples of silence first.
        vad.process_chunk(&quiet(800));
        let out = vad.process_chunk(&loud(320));
        assert!(out.speech_started);

        let out = vad.process_chunk(&quiet(1600));
        let segment = out.segment.expect("endpoint declared");
        assert!(segment.len() > 320);
    }

    #[test]
    fn bargein_requires_sustained_energy_not_a_single_loud_sample() {
        let mut vad = VoiceActivityDetector::with_thresholds(16_000, 0.02, 100, 500, 100);
        let out = vad.process_chunk_for_bargein(&loud(10));
        assert!(!out.barge_in);
        // 100ms @ 16kHz = 1600 samples total needed.
        let out = vad.process_chunk_for_bargein(&loud(1600));
        assert!(out.barge_in);
    }

    #[test]
    fn bargein_energy_resets_on_a_quiet_chunk() {
        let mut vad = VoiceActivityDetector::with_thresholds(16_000, 0.02, 100, 500, 100);
        vad.process_chunk_for_bargein(&loud(800));
        vad.process_chunk_for_bargein(&quiet(10));
        let out = vad.process_chunk_for_bargein(&loud(800));
        assert!(!out.barge_in);
    }
}
