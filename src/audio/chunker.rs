//! Accumulates captured PCM and cuts it into encoded [`AudioChunk`]s.
//!
//! Every chunk decodes on its own without reassembly:
//!
//! * [`ChunkEncoding::Opus`]: a run of 20 ms mono Opus packets, each
//!   prefixed with its length as a big-endian `u16`. Samples short of a
//!   whole frame wait for the next flush; the terminal chunk pads the last
//!   frame with silence. [`opus_packets`] splits a payload back apart.
//! * [`ChunkEncoding::Wav`]: one 16-bit mono PCM WAV file.

use std::io::Cursor;

use audiopus::{coder::Encoder, Application, Channels, SampleRate};
use thiserror::Error;

use crate::audio::capture::PcmFrame;
use crate::audio::resample::{downmix, Resampler};
use crate::config::ChunkEncoding;

/// Upper bound on one encoded Opus packet.
const MAX_OPUS_PACKET: usize = 4000;

// ---------------------------------------------------------------------------
// ChunkError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("WAV encoding failed: {0}")]
    Wav(#[from] hound::Error),

    #[error("Opus codec error: {0}")]
    Opus(#[from] audiopus::Error),

    /// Opus runs at 8, 12, 16, 24 or 48 kHz only.
    #[error("Opus does not support a {0} Hz sample rate")]
    UnsupportedRate(u32),

    #[error("malformed Opus chunk: {0}")]
    Framing(String),
}

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// An opaque, bounded time-slice of encoded audio.
///
/// Used in both directions: microphone chunks on the way out, synthesised
/// agent speech on the way in. Carries no sequence number or duration;
/// ordering is the transport's in-order delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioChunk {
    bytes: Vec<u8>,
}

impl AudioChunk {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

// ---------------------------------------------------------------------------
// encode_wav
// ---------------------------------------------------------------------------

/// Encode mono `f32` samples in `[-1.0, 1.0]` as a 16-bit PCM WAV file.
/// Out-of-range samples are clamped.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
    for &sample in samples {
        writer.write_sample(to_i16(sample))?;
    }
    writer.finalize()?;

    Ok(cursor.into_inner())
}

// ---------------------------------------------------------------------------
// Opus framing
// ---------------------------------------------------------------------------

struct OpusFrames {
    encoder: Encoder,
    /// Samples per 20 ms frame.
    frame_len: usize,
}

impl OpusFrames {
    fn new(sample_rate: u32) -> Result<Self, ChunkError> {
        let opus_rate = match sample_rate {
            8_000 => SampleRate::Hz8000,
            12_000 => SampleRate::Hz12000,
            16_000 => SampleRate::Hz16000,
            24_000 => SampleRate::Hz24000,
            48_000 => SampleRate::Hz48000,
            other => return Err(ChunkError::UnsupportedRate(other)),
        };
        let encoder = Encoder::new(opus_rate, Channels::Mono, Application::Voip)?;
        Ok(Self {
            encoder,
            frame_len: sample_rate as usize / 50,
        })
    }

    /// Encode every whole frame of `samples` onto `out`.
    fn encode(&mut self, samples: &[f32], out: &mut Vec<u8>) -> Result<(), ChunkError> {
        let mut pcm = vec![0_i16; self.frame_len];
        let mut packet = [0_u8; MAX_OPUS_PACKET];
        for frame in samples.chunks_exact(self.frame_len) {
            for (dst, &src) in pcm.iter_mut().zip(frame) {
                *dst = to_i16(src);
            }
            let len = self.encoder.encode(&pcm, &mut packet[..])?;
            out.extend_from_slice(&(len as u16).to_be_bytes());
            out.extend_from_slice(&packet[..len]);
        }
        Ok(())
    }
}

/// Split an Opus chunk payload into its packets.
pub fn opus_packets(payload: &[u8]) -> Result<Vec<&[u8]>, ChunkError> {
    let mut packets = Vec::new();
    let mut rest = payload;
    while !rest.is_empty() {
        let [hi, lo, tail @ ..] = rest else {
            return Err(ChunkError::Framing("truncated length prefix".into()));
        };
        let len = usize::from(u16::from_be_bytes([*hi, *lo]));
        if tail.len() < len {
            return Err(ChunkError::Framing(format!(
                "packet of {len} bytes but only {} remain",
                tail.len()
            )));
        }
        let (packet, next) = tail.split_at(len);
        packets.push(packet);
        rest = next;
    }
    Ok(packets)
}

// ---------------------------------------------------------------------------
// Chunker
// ---------------------------------------------------------------------------

enum ChunkEncoder {
    Opus(OpusFrames),
    Wav,
}

/// Buffers converted samples between flushes.
///
/// The capture loop calls [`flush`](Self::flush) on every timer tick and
/// [`finish`](Self::finish) exactly once when the recording span ends.
pub struct Chunker {
    sample_rate: u32,
    encoder: ChunkEncoder,
    resampler: Option<Resampler>,
    pending: Vec<f32>,
}

impl Chunker {
    /// `sample_rate` is the rate of the encoded output.
    pub fn new(sample_rate: u32, encoding: ChunkEncoding) -> Result<Self, ChunkError> {
        let encoder = match encoding {
            ChunkEncoding::Opus => ChunkEncoder::Opus(OpusFrames::new(sample_rate)?),
            ChunkEncoding::Wav => ChunkEncoder::Wav,
        };
        Ok(Self {
            sample_rate,
            encoder,
            resampler: None,
            pending: Vec::new(),
        })
    }

    /// Downmix and resample one device buffer into the pending chunk.
    pub fn push(&mut self, frame: &PcmFrame) {
        let mono = downmix(&frame.samples, frame.channels);
        if self.resampler.as_ref().map(Resampler::from_rate) != Some(frame.sample_rate) {
            if let Some(mut old) = self.resampler.take() {
                old.finish(&mut self.pending);
            }
            self.resampler = Some(Resampler::new(frame.sample_rate, self.sample_rate));
        }
        if let Some(resampler) = self.resampler.as_mut() {
            resampler.process(&mono, &mut self.pending);
        }
    }

    /// Samples waiting for the next flush.
    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }

    /// Encode the pending samples. `None` when there is nothing to send:
    /// no input since the last flush, or less than one Opus frame.
    pub fn flush(&mut self) -> Result<Option<AudioChunk>, ChunkError> {
        match &mut self.encoder {
            ChunkEncoder::Wav => {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                let bytes = encode_wav(&self.pending, self.sample_rate)?;
                self.pending.clear();
                Ok(Some(AudioChunk::from(bytes)))
            }
            ChunkEncoder::Opus(opus) => {
                let whole = self.pending.len() / opus.frame_len * opus.frame_len;
                if whole == 0 {
                    return Ok(None);
                }
                let mut bytes = Vec::new();
                opus.encode(&self.pending[..whole], &mut bytes)?;
                self.pending.drain(..whole);
                Ok(Some(AudioChunk::from(bytes)))
            }
        }
    }

    /// Encode whatever is left as the terminal chunk of the span.
    ///
    /// Always yields a chunk. It may hold zero samples: a bare WAV header, or
    /// an Opus payload with no packets.
    pub fn finish(mut self) -> Result<AudioChunk, ChunkError> {
        if let Some(mut resampler) = self.resampler.take() {
            resampler.finish(&mut self.pending);
        }
        match &mut self.encoder {
            ChunkEncoder::Wav => Ok(AudioChunk::from(encode_wav(
                &self.pending,
                self.sample_rate,
            )?)),
            ChunkEncoder::Opus(opus) => {
                let padded = self.pending.len().div_ceil(opus.frame_len) * opus.frame_len;
                self.pending.resize(padded, 0.0);
                let mut bytes = Vec::new();
                opus.encode(&self.pending, &mut bytes)?;
                Ok(AudioChunk::from(bytes))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use audiopus::{coder::Decoder, packet::Packet, MutSignals};

    fn frame(samples: Vec<f32>, sample_rate: u32, channels: u16) -> PcmFrame {
        PcmFrame {
            samples,
            sample_rate,
            channels,
        }
    }

    fn wav_chunker() -> Chunker {
        Chunker::new(16_000, ChunkEncoding::Wav).unwrap()
    }

    fn opus_chunker() -> Chunker {
        Chunker::new(16_000, ChunkEncoding::Opus).unwrap()
    }

    fn tone(samples: usize) -> Vec<f32> {
        (0..samples)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 16_000.0).sin())
            .collect()
    }

    fn read_wav(chunk: &AudioChunk) -> (hound::WavSpec, Vec<i16>) {
        let reader = hound::WavReader::new(Cursor::new(chunk.as_bytes().to_vec()))
            .expect("valid wav");
        let spec = reader.spec();
        let samples = reader
            .into_samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .expect("samples");
        (spec, samples)
    }

    fn decode_opus(chunk: &AudioChunk) -> Vec<i16> {
        let mut decoder = Decoder::new(SampleRate::Hz16000, Channels::Mono).unwrap();
        let mut pcm = Vec::new();
        for packet in opus_packets(chunk.as_bytes()).unwrap() {
            let mut out = [0_i16; 320];
            let decoded = decoder
                .decode(
                    Some(Packet::try_from(packet).unwrap()),
                    MutSignals::try_from(&mut out[..]).unwrap(),
                    false,
                )
                .unwrap();
            pcm.extend_from_slice(&out[..decoded]);
        }
        pcm
    }

    fn rms(samples: &[i16]) -> f64 {
        let sum: f64 = samples.iter().map(|&s| f64::from(s).powi(2)).sum();
        (sum / samples.len() as f64).sqrt()
    }

    #[test]
    fn flush_without_input_yields_nothing() {
        assert!(wav_chunker().flush().unwrap().is_none());
        assert!(opus_chunker().flush().unwrap().is_none());
    }

    #[test]
    fn flush_encodes_mono_16_bit_wav() {
        let mut chunker = wav_chunker();
        chunker.push(&frame(vec![0.5; 320], 16_000, 1));

        let chunk = chunker.flush().unwrap().expect("chunk");
        let (spec, samples) = read_wav(&chunk);

        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(samples.len(), 320);
        assert_eq!(samples[0], (0.5 * f32::from(i16::MAX)) as i16);
    }

    #[test]
    fn flush_clears_pending() {
        let mut chunker = wav_chunker();
        chunker.push(&frame(vec![0.1; 160], 16_000, 1));
        assert!(chunker.flush().unwrap().is_some());
        assert_eq!(chunker.pending_samples(), 0);
        assert!(chunker.flush().unwrap().is_none());
    }

    #[test]
    fn stereo_48k_is_converted_before_encoding() {
        let mut chunker = wav_chunker();
        // 10 ms of stereo at 48 kHz
        chunker.push(&frame(vec![0.2; 960], 48_000, 2));
        assert_eq!(chunker.pending_samples(), 160);
    }

    #[test]
    fn resampling_carries_across_device_buffers() {
        let mut chunker = wav_chunker();
        for _ in 0..100 {
            chunker.push(&frame(vec![0.0; 512], 44_100, 1));
        }
        // 51 200 samples at 44.1 kHz is 18 575.96 at 16 kHz
        assert!(
            chunker.pending_samples().abs_diff(18_576) <= 1,
            "got {}",
            chunker.pending_samples()
        );
    }

    #[test]
    fn finish_always_yields_terminal_chunk() {
        let chunk = wav_chunker().finish().unwrap();
        let (_, samples) = read_wav(&chunk);
        assert!(samples.is_empty());
        assert!(!chunk.is_empty(), "header is still present");
    }

    #[test]
    fn finish_carries_partial_buffer() {
        let mut chunker = wav_chunker();
        chunker.push(&frame(vec![0.0; 100], 16_000, 1));
        let (_, samples) = read_wav(&chunker.finish().unwrap());
        assert_eq!(samples.len(), 100);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let bytes = encode_wav(&[2.0, -3.0], 16_000).unwrap();
        let (_, samples) = read_wav(&AudioChunk::from(bytes));
        assert_eq!(samples, vec![i16::MAX, -i16::MAX]);
    }

    #[test]
    fn opus_flush_sends_whole_frames_and_keeps_the_rest() {
        let mut chunker = opus_chunker();
        chunker.push(&frame(tone(800), 16_000, 1));

        let chunk = chunker.flush().unwrap().expect("chunk");
        assert_eq!(opus_packets(chunk.as_bytes()).unwrap().len(), 2);
        assert_eq!(decode_opus(&chunk).len(), 640);
        assert_eq!(chunker.pending_samples(), 160);
    }

    #[test]
    fn opus_payload_decodes_to_the_captured_signal() {
        let input = tone(960);
        let mut chunker = opus_chunker();
        chunker.push(&frame(input.clone(), 16_000, 1));

        let chunk = chunker.flush().unwrap().expect("chunk");
        assert!(chunk.len() < input.len() * 2, "payload is compressed");

        let decoded = decode_opus(&chunk);
        assert_eq!(decoded.len(), 960);

        let expected: Vec<i16> = input.iter().map(|&s| to_i16(s)).collect();
        // skip the first frame, where the decoder is still converging
        let ratio = rms(&decoded[320..]) / rms(&expected[320..]);
        assert!((0.5..1.5).contains(&ratio), "energy ratio {ratio}");
    }

    #[test]
    fn opus_flush_below_one_frame_waits() {
        let mut chunker = opus_chunker();
        chunker.push(&frame(tone(100), 16_000, 1));
        assert!(chunker.flush().unwrap().is_none());
        assert_eq!(chunker.pending_samples(), 100);
    }

    #[test]
    fn opus_finish_pads_the_last_frame() {
        let mut chunker = opus_chunker();
        chunker.push(&frame(tone(100), 16_000, 1));

        let terminal = chunker.finish().unwrap();
        assert_eq!(opus_packets(terminal.as_bytes()).unwrap().len(), 1);
        assert_eq!(decode_opus(&terminal).len(), 320);
    }

    #[test]
    fn opus_finish_without_input_is_an_empty_terminal_chunk() {
        let terminal = opus_chunker().finish().unwrap();
        assert!(terminal.is_empty());
        assert!(opus_packets(terminal.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn opus_rejects_unsupported_rate() {
        assert!(matches!(
            Chunker::new(44_100, ChunkEncoding::Opus),
            Err(ChunkError::UnsupportedRate(44_100))
        ));
        assert!(Chunker::new(44_100, ChunkEncoding::Wav).is_ok());
    }

    #[test]
    fn truncated_opus_payload_is_malformed() {
        assert!(matches!(
            opus_packets(&[0, 5, 1, 2]),
            Err(ChunkError::Framing(_))
        ));
        assert!(matches!(opus_packets(&[0]), Err(ChunkError::Framing(_))));
    }
}
