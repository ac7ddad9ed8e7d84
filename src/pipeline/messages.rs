//! Message and wire types passed between pipeline stages and across the
//! media/control channels.

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::session::{SessionId, TurnId};

/// A chunk of raw inbound audio samples from the client's media channel.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved f32 samples, mono, at the configured input sample rate.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Server-monotonic timestamp when this chunk was received.
    pub captured_at: Instant,
}

/// A complete user speech segment detected by VAD, ready for ASR.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    /// Concatenated audio samples for the entire utterance.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Server-monotonic timestamp of utterance start.
    pub started_at: Instant,
    /// Server-monotonic timestamp of the endpoint (end of speech).
    pub endpoint_at: Instant,
}

/// A transcription result from the ASR engine. ASR emits zero or more
/// partials followed by exactly one final.
#[derive(Debug, Clone)]
pub struct Transcription {
    /// The transcribed text (may be partial).
    pub text: String,
    /// Whether this is the final transcription for the turn.
    pub is_final: bool,
}

/// A single token emitted by the LLM during streaming generation.
#[derive(Debug, Clone)]
pub struct LlmToken {
    /// The decoded text fragment.
    pub text: String,
    /// Whether this is the final token in the response.
    pub is_end: bool,
}

/// Synthesized PCM audio from TTS, ready for packetization.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    /// f32 audio samples.
    pub samples: Vec<f32>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Whether this is the last chunk of the current response.
    pub is_final: bool,
}

/// An outbound agent audio packet (§3, §4.4).
///
/// `seq` is strictly increasing per session; `t_audio_ms` is monotonic and
/// advances by exactly `duration_ms` between consecutively emitted packets
/// — overlap bytes never advance the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPacket {
    pub session_id: SessionId,
    pub seq: u64,
    pub t_audio_ms: u64,
    pub duration_ms: u32,
    pub overlap_ms: u32,
    pub codec: AudioCodec,
    pub payload: Vec<u8>,
}

/// Supported media codecs for the packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioCodec {
    Opus,
    Pcm16Le,
}

/// The 52 ARKit blendshape channel names, in the canonical order used by
/// [`BlendshapeFrame::weights`].
pub const ARKIT_52: [&str; 52] = [
    "eyeBlinkLeft",
    "eyeLookDownLeft",
    "eyeLookInLeft",
    "eyeLookOutLeft",
    "eyeLookUpLeft",
    "eyeSquintLeft",
    "eyeWideLeft",
    "eyeBlinkRight",
    "eyeLookDownRight",
    "eyeLookInRight",
    "eyeLookOutRight",
    "eyeLookUpRight",
    "eyeSquintRight",
    "eyeWideRight",
    "jawForward",
    "jawLeft",
    "jawRight",
    "jawOpen",
    "mouthClose",
    "mouthFunnel",
    "mouthPucker",
    "mouthLeft",
    "mouthRight",
    "mouthSmileLeft",
    "mouthSmileRight",
    "mouthFrownLeft",
    "mouthFrownRight",
    "mouthDimpleLeft",
    "mouthDimpleRight",
    "mouthStretchLeft",
    "mouthStretchRight",
    "mouthRollLower",
    "mouthRollUpper",
    "mouthShrugLower",
    "mouthShrugUpper",
    "mouthPressLeft",
    "mouthPressRight",
    "mouthLowerDownLeft",
    "mouthLowerDownRight",
    "mouthUpperUpLeft",
    "mouthUpperUpRight",
    "browDownLeft",
    "browDownRight",
    "browInnerUp",
    "browOuterUpLeft",
    "browOuterUpRight",
    "cheekPuff",
    "cheekSquintLeft",
    "cheekSquintRight",
    "noseSneerLeft",
    "noseSneerRight",
    "tongueOut",
];

/// Index of the first jaw/mouth channel in [`ARKIT_52`].
pub const ARTICULATION_START: usize = 14;

/// Index of the last jaw/mouth channel in [`ARKIT_52`] (inclusive).
/// Articulation is the contiguous span `[ARTICULATION_START..=ARTICULATION_END]`
/// (`jawForward`..`mouthUpperUpRight`); everything outside it — eyes
/// (`0..ARTICULATION_START`) and brows/cheeks/nose/tongue
/// (`ARTICULATION_END+1..52`) — is pinned at 0 in the neutral pose.
pub const ARTICULATION_END: usize = 40;

/// Zero every channel outside the jaw/mouth articulation span, in place.
/// The one place the neutral-pose invariant (§4.7, §8: "all other ARKit-52
/// channels (brows, eyes, cheeks, nose) pinned at 0") is enforced; callers
/// that build a frame from a raw animation engine output must route
/// through this rather than only masking the eye prefix.
pub fn pin_non_articulation(weights: &mut [f32; 52]) {
    weights[..ARTICULATION_START].fill(0.0);
    weights[ARTICULATION_END + 1..].fill(0.0);
}

/// An outbound blendshape frame (§3, §4.7). Each frame references an
/// audio clock sample so clients can lip-sync frame-accurately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendshapeFrame {
    pub session_id: SessionId,
    pub seq: u64,
    /// Non-strictly-monotonic reference to the audio clock: heartbeat
    /// frames may repeat the previous value.
    pub t_audio_ms: u64,
    pub fps: f32,
    /// Carries no new articulation; emitted only to maintain cadence.
    pub heartbeat: bool,
    /// 52 weights in `[0, 1]`, ordered per [`ARKIT_52`].
    pub weights: [f32; 52],
}

impl BlendshapeFrame {
    /// A frame with every channel at 0 (the neutral pose with silence).
    pub fn silent(session_id: SessionId, seq: u64, t_audio_ms: u64, fps: f32) -> Self {
        Self {
            session_id,
            seq,
            t_audio_ms,
            fps,
            heartbeat: true,
            weights: [0.0; 52],
        }
    }
}

/// Reason a [`crate::pipeline::cancellation::CancellationSignal`] was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    UserBargeIn,
    UserStop,
    SystemOverload,
    Timeout,
}

/// Low-latency control/state events exchanged between the orchestrator and
/// the client (server→client, §6) and internally between pipeline stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    StateChange {
        session_id: SessionId,
        state: String,
    },
    TtfaMeasured {
        session_id: SessionId,
        turn_id: TurnId,
        ttfa_ms: u64,
    },
    BargeinAck {
        session_id: SessionId,
        turn_id: TurnId,
        bargein_latency_ms: u64,
    },
    Degraded {
        level: String,
    },
    TurnTimeout {
        session_id: SessionId,
        turn_id: TurnId,
    },
}

/// Anything the orchestrator may push out to a session's transport layer
/// during a turn: media frames and control events interleaved on one
/// channel, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundMessage {
    Control(ControlEvent),
    Audio(AudioPacket),
    Blendshape(BlendshapeFrame),
}
