//! CPAL output stream fed from the pipeline's PCM ring buffer.
//!
//! The callback asks [`AudioOutput::fill`] for exactly as many bytes as the
//! device buffer needs; `fill` never blocks and pads with silence, so the
//! callback only converts the PCM bytes to the device sample type.

use anyhow::{Result, anyhow, bail};
use cpal::traits::DeviceTrait;

use av_player::{AudioOutput, SampleFormat};

/// Build a CPAL output stream that plays from `output`.
///
/// `config` must match the output's rate and channel count; the sample type
/// may differ from the ring buffer's encoding.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    output: AudioOutput,
) -> Result<cpal::Stream> {
    let format = output.format();
    if config.channels != format.channels || config.sample_rate != format.sample_rate {
        bail!(
            "stream config {}ch/{}Hz does not match pipeline output {}ch/{}Hz",
            config.channels,
            config.sample_rate,
            format.channels,
            format.sample_rate
        );
    }
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, output),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, output),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, output),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, output),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut output: AudioOutput,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let pcm_format = output.format().sample_format;
    let mut bytes: Vec<u8> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            bytes.resize(data.len() * pcm_format.bytes_per_sample(), 0);
            output.fill(&mut bytes);
            write_samples(data, &bytes, pcm_format);
        },
        err_fn,
        None,
    )?;
    Ok(stream)
}

/// Convert ring-buffer PCM into device samples; missing input becomes silence.
fn write_samples<T>(data: &mut [T], bytes: &[u8], format: SampleFormat)
where
    T: cpal::Sample + cpal::FromSample<f32>,
{
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);
    let written = match format {
        SampleFormat::S16 => {
            let mut n = 0;
            for (dst, c) in data.iter_mut().zip(bytes.chunks_exact(2)) {
                let s = i16::from_ne_bytes([c[0], c[1]]);
                *dst = <T as cpal::Sample>::from_sample::<f32>(s as f32 / 32768.0);
                n += 1;
            }
            n
        }
        SampleFormat::F32 => {
            let mut n = 0;
            for (dst, c) in data.iter_mut().zip(bytes.chunks_exact(4)) {
                let s = f32::from_ne_bytes([c[0], c[1], c[2], c[3]]);
                *dst = <T as cpal::Sample>::from_sample::<f32>(s);
                n += 1;
            }
            n
        }
    };
    data[written..].fill(silence);
}
