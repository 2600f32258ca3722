//! Conversion of decoded audio to the fixed output PCM layout.
//!
//! Three steps, in order: channel mapping, sample-rate conversion (Rubato sinc
//! resampler, only when rates differ) and packing into the target sample format.

use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::error::DecodeError;
use crate::media::{AudioBlock, OutputFormat, SampleFormat};

/// Stateful converter from [`AudioBlock`]s to packed output PCM.
///
/// Input that does not fill a whole resampler chunk is carried over to the next
/// call, so output lags input by at most one chunk.
pub struct PcmConverter {
    target: OutputFormat,
    chunk_frames: usize,
    resampler: Option<ActiveResampler>,
}

struct ActiveResampler {
    src_rate: u32,
    inner: Box<dyn Resampler<f32>>,
    pending: Vec<f32>,
    out: Vec<f32>,
}

impl PcmConverter {
    pub fn new(target: OutputFormat, chunk_frames: usize) -> Self {
        Self {
            target,
            chunk_frames: chunk_frames.max(1),
            resampler: None,
        }
    }

    pub fn target(&self) -> OutputFormat {
        self.target
    }

    /// Drop resampler state and any carried-over input.
    pub fn reset(&mut self) {
        self.resampler = None;
    }

    /// Convert one block; the result holds whole output frames only.
    pub fn convert(&mut self, block: &AudioBlock) -> Result<Vec<u8>, DecodeError> {
        let dst_channels = self.target.channels.max(1) as usize;
        let mapped = map_channels(&block.samples, block.channels as usize, dst_channels);

        if block.sample_rate == 0 || block.sample_rate == self.target.sample_rate {
            return Ok(pack(&mapped, self.target.sample_format));
        }

        let needs_rebuild = self
            .resampler
            .as_ref()
            .is_none_or(|r| r.src_rate != block.sample_rate);
        if needs_rebuild {
            self.resampler = Some(ActiveResampler::new(
                block.sample_rate,
                self.target.sample_rate,
                self.chunk_frames,
                dst_channels,
            )?);
        }

        let Some(active) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };
        let resampled = active.process(&mapped, self.chunk_frames, dst_channels)?;
        Ok(pack(&resampled, self.target.sample_format))
    }
}

impl ActiveResampler {
    fn new(
        src_rate: u32,
        dst_rate: u32,
        chunk_frames: usize,
        channels: usize,
    ) -> Result<Self, DecodeError> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let inner = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| DecodeError::Codec(format!("resampler init: {e}")))?;

        let out_frames = inner.output_frames_max();
        tracing::debug!(src_rate, dst_rate, chunk_frames, "resampler ready");
        Ok(Self {
            src_rate,
            inner: Box::new(inner),
            pending: Vec::with_capacity(chunk_frames * channels * 2),
            out: vec![0.0; out_frames * channels],
        })
    }

    fn process(
        &mut self,
        input: &[f32],
        chunk_frames: usize,
        channels: usize,
    ) -> Result<Vec<f32>, DecodeError> {
        self.pending.extend_from_slice(input);
        let chunk_samples = chunk_frames * channels;
        let mut produced = Vec::new();

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len: None,
        };

        while self.pending.len() >= chunk_samples {
            let chunk = &self.pending[..chunk_samples];
            let input_adapter = InterleavedSlice::new(chunk, channels, chunk_frames)
                .map_err(|e| DecodeError::Codec(format!("resampler input: {e}")))?;
            let out_capacity = self.out.len() / channels;
            let mut output_adapter =
                InterleavedSlice::new_mut(&mut self.out, channels, out_capacity)
                    .map_err(|e| DecodeError::Codec(format!("resampler output: {e}")))?;

            let (_nbr_in, nbr_out) = self
                .inner
                .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
                .map_err(|e| DecodeError::Codec(format!("resample: {e}")))?;

            produced.extend_from_slice(&self.out[..nbr_out * channels]);
            self.pending.drain(..chunk_samples);
        }
        Ok(produced)
    }
}

/// Remap interleaved samples from `src_channels` to `dst_channels`.
///
/// Mono is duplicated to every output channel, stereo is averaged down to mono,
/// anything else maps output channel `n` to source channel `min(n, src - 1)`.
pub fn map_channels(samples: &[f32], src_channels: usize, dst_channels: usize) -> Vec<f32> {
    if src_channels == 0 || dst_channels == 0 {
        return Vec::new();
    }
    if src_channels == dst_channels {
        let whole = samples.len() / src_channels * src_channels;
        return samples[..whole].to_vec();
    }

    let frames = samples.len() / src_channels;
    let mut out = Vec::with_capacity(frames * dst_channels);
    for frame in samples.chunks_exact(src_channels) {
        for dst_ch in 0..dst_channels {
            let s = match (src_channels, dst_channels) {
                (2, 1) => 0.5 * (frame[0] + frame[1]),
                (1, _) => frame[0],
                _ => frame[dst_ch.min(src_channels - 1)],
            };
            out.push(s);
        }
    }
    out
}

/// Pack interleaved `f32` samples into native-endian bytes of `format`.
pub fn pack(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.bytes_per_sample());
    match format {
        SampleFormat::S16 => {
            for s in samples {
                let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
                out.extend_from_slice(&v.to_ne_bytes());
            }
        }
        SampleFormat::F32 => {
            for s in samples {
                out.extend_from_slice(&s.to_ne_bytes());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(samples: Vec<f32>, channels: u16, sample_rate: u32) -> AudioBlock {
        AudioBlock {
            samples,
            channels,
            sample_rate,
            pts: None,
        }
    }

    fn s16(bytes: &[u8]) -> Vec<i16> {
        bytes
            .chunks_exact(2)
            .map(|b| i16::from_ne_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        assert_eq!(map_channels(&[0.1, 0.2], 1, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        assert_eq!(map_channels(&[0.25, 0.75, -1.0, 1.0], 2, 1), vec![0.5, 0.0]);
    }

    #[test]
    fn surround_to_stereo_takes_leading_channels() {
        let six: Vec<f32> = (0..6).map(|c| c as f32).collect();
        assert_eq!(map_channels(&six, 6, 2), vec![0.0, 1.0]);
    }

    #[test]
    fn s16_packing_clamps() {
        let out = pack(&[0.0, 1.0, -2.0], SampleFormat::S16);
        assert_eq!(s16(&out), vec![0, i16::MAX, -i16::MAX]);
    }

    #[test]
    fn same_rate_skips_resampler() {
        let mut conv = PcmConverter::new(OutputFormat::default(), 256);
        let out = conv.convert(&block(vec![0.5; 10], 1, 44_100)).unwrap();
        // 10 mono frames -> 10 stereo S16 frames.
        assert_eq!(out.len(), 10 * 4);
        assert!(conv.resampler.is_none());
    }

    #[test]
    fn resampling_carries_partial_chunks() {
        let mut conv = PcmConverter::new(OutputFormat::default(), 256);
        let first = conv.convert(&block(vec![0.0; 100 * 2], 2, 48_000)).unwrap();
        assert!(first.is_empty());

        let mut total = 0;
        for _ in 0..20 {
            total += conv.convert(&block(vec![0.0; 256 * 2], 2, 48_000)).unwrap().len();
        }
        assert!(total > 0);
        assert_eq!(total % 4, 0);

        conv.reset();
        assert!(conv.resampler.is_none());
    }
}
