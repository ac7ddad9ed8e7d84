//! Chunks synthesized audio into fixed-size [`AudioPacket`]s (§4.4).
//!
//! Each packet carries `packet_ms` of new audio plus up to `overlap_ms`
//! duplicated from the *next* packet's leading samples, so a client can
//! cross-fade instead of hearing a hard seam. The overlap bytes never
//! advance the audio clock or the packet sequence — only whole packets do.
//! On cancellation the packetizer stops immediately and drops whatever
//! partially-buffered frame it was assembling.

use super::clock::AudioClock;
use crate::pipeline::messages::{AudioCodec, AudioPacket};
use crate::session::SessionId;

/// Stateful packetizer for one turn's TTS output stream. Not `Send` across
/// an await boundary by itself — owned by the single task driving the TTS
/// stage for a turn.
pub struct Packetizer {
    session_id: SessionId,
    sample_rate: u32,
    packet_ms: u32,
    overlap_ms: u32,
    pad_trailing_chunk: bool,
    buffer: Vec<f32>,
    seq: u64,
}

impl Packetizer {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        sample_rate: u32,
        packet_ms: u32,
        overlap_ms: u32,
        pad_trailing_chunk: bool,
    ) -> Self {
        Self {
            session_id,
            sample_rate,
            packet_ms,
            overlap_ms,
            pad_trailing_chunk,
            buffer: Vec::new(),
            seq: 0,
        }
    }

    fn samples_for_ms(&self, ms: u32) -> usize {
        (self.sample_rate as usize * ms as usize) / 1000
    }

    /// Feed newly synthesized samples, draining as many complete packets
    /// as the buffer allows. Call with `flush = true` on the final chunk
    /// of a turn to pad-or-drop the trailing partial packet.
    pub fn push(&mut self, samples: &[f32], flush: bool, clock: &AudioClock) -> Vec<AudioPacket> {
        self.buffer.extend_from_slice(samples);

        let core_len = self.samples_for_ms(self.packet_ms);
        let overlap_len = self.samples_for_ms(self.overlap_ms);
        let mut out = Vec::new();

        while self.buffer.len() >= core_len + overlap_len {
            let core = &self.buffer[..core_len];
            let overlap = &self.buffer[core_len..core_len + overlap_len];
            out.push(self.emit(core, overlap, clock));
            self.buffer.drain(..core_len);
        }

        if flush && !self.buffer.is_empty() {
            if self.buffer.len() >= core_len {
                // Enough for one more full packet but not enough lookahead
                // for a full overlap; use whatever overlap is available.
                let core = self.buffer[..core_len].to_vec();
                let overlap_avail = (self.buffer.len() - core_len).min(overlap_len);
                let overlap = self.buffer[core_len..core_len + overlap_avail].to_vec();
                out.push(self.emit(&core, &overlap, clock));
                self.buffer.drain(..core_len + overlap_avail);
            } else if self.pad_trailing_chunk {
                let mut core = std::mem::take(&mut self.buffer);
                core.resize(core_len, 0.0);
                out.push(self.emit(&core, &[], clock));
            } else {
                self.buffer.clear();
            }
        }

        out
    }

    fn emit(&mut self, core: &[f32], overlap: &[f32], clock: &AudioClock) -> AudioPacket {
        let t_audio_ms = clock.advance(self.packet_ms);
        let seq = self.seq;
        self.seq += 1;

        let mut payload = Vec::with_capacity((core.len() + overlap.len()) * 2);
        for sample in core.iter().chain(overlap.iter()) {
            payload.extend_from_slice(&f32_to_pcm16le(*sample).to_le_bytes());
        }

        let overlap_ms = ((overlap.len() * 1000) / self.sample_rate as usize) as u32;

        AudioPacket {
            session_id: self.session_id,
            seq,
            t_audio_ms,
            duration_ms: self.packet_ms,
            overlap_ms,
            codec: AudioCodec::Pcm16Le,
            payload,
        }
    }

    /// Discard any buffered, not-yet-emitted audio. Called on cancellation:
    /// the in-flight partial frame must never reach the client.
    pub fn abort(&mut self) {
        self.buffer.clear();
    }
}

fn f32_to_pcm16le(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(n: usize) -> Vec<f32> {
        (0..n).map(|i| (i as f32 * 0.01).sin()).collect()
    }

    #[test]
    fn packets_carry_monotonic_seq_and_audio_clock() {
        let clock = AudioClock::new();
        let mut packetizer = Packetizer::new(SessionId::new(), 16_000, 20, 5, true);
        // 20ms @ 16kHz = 320 samples; feed enough for 3 packets plus overlap lookahead.
        let packets = packetizer.push(&sine(320 * 4), false, &clock);
        assert!(packets.len() >= 3);
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(packet.seq, i as u64);
            assert_eq!(packet.t_audio_ms, i as u64 * 20);
            assert_eq!(packet.duration_ms, 20);
        }
    }

    #[test]
    fn overlap_bytes_never_advance_the_clock() {
        let clock = AudioClock::new();
        let mut packetizer = Packetizer::new(SessionId::new(), 16_000, 20, 5, true);
        let packets = packetizer.push(&sine(320 * 3), false, &clock);
        assert!(packets.len() >= 2);
        assert_eq!(packets[1].t_audio_ms - packets[0].t_audio_ms, 20);
        assert_eq!(clock.now_ms(), packets.len() as u64 * 20);
    }

    #[test]
    fn trailing_partial_chunk_is_padded_when_configured() {
        let clock = AudioClock::new();
        let mut packetizer = Packetizer::new(SessionId::new(), 16_000, 20, 5, true);
        // Fewer samples than one full packet (320).
        let packets = packetizer.push(&sine(100), true, &clock);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].duration_ms, 20);
        assert_eq!(packets[0].payload.len(), 320 * 2);
    }

    #[test]
    fn trailing_partial_chunk_is_dropped_when_not_configured() {
        let clock = AudioClock::new();
        let mut packetizer = Packetizer::new(SessionId::new(), 16_000, 20, 5, false);
        let packets = packetizer.push(&sine(100), true, &clock);
        assert!(packets.is_empty());
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn abort_discards_buffered_audio_without_emitting() {
        let clock = AudioClock::new();
        let mut packetizer = Packetizer::new(SessionId::new(), 16_000, 20, 5, true);
        packetizer.push(&sine(50), false, &clock);
        packetizer.abort();
        let packets = packetizer.push(&[], true, &clock);
        assert!(packets.is_empty());
    }
}
