//! Symphonia-backed source and audio decoder.
//!
//! Uses Symphonia to:
//! - probe a local file and list its audio tracks
//! - hand out packets as [`CompressedUnit`]s
//! - decode packets into interleaved `f32` [`AudioBlock`]s
//!
//! Symphonia has no video codecs, so this backend never produces a video decoder.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::codec::{AudioDecoder, Decoder, Received, SubmitStatus, VideoDecoder};
use crate::controller::MediaBackend;
use crate::error::{DecodeError, SourceError};
use crate::media::{
    AudioBlock, AudioParams, CompressedUnit, MediaKind, StreamIndex, StreamParameters, TimeBase,
};
use crate::source::{MediaSource, ReadOutcome};

/// Backend for local audio files.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaBackend;

impl MediaBackend for SymphoniaBackend {
    fn create_source(&self) -> Box<dyn MediaSource> {
        Box::new(SymphoniaSource::default())
    }

    fn create_video_decoder(&self, _params: &StreamParameters) -> Option<Box<VideoDecoder>> {
        None
    }

    fn create_audio_decoder(&self, params: &StreamParameters) -> Option<Box<AudioDecoder>> {
        codec_params_of(params)?;
        Some(Box::new(SymphoniaAudioDecoder::default()))
    }
}

/// A probed container.
#[derive(Default)]
pub struct SymphoniaSource {
    reader: Option<Box<dyn FormatReader>>,
    duration: Option<Duration>,
}

impl MediaSource for SymphoniaSource {
    fn open(&mut self, uri: &str) -> Result<Vec<StreamParameters>, SourceError> {
        let path = Path::new(uri.strip_prefix("file://").unwrap_or(uri));
        let open_err = |reason: String| SourceError::Open {
            uri: uri.to_string(),
            reason,
        };
        let file = File::open(path).map_err(|e| open_err(e.to_string()))?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }
        let mss = MediaSourceStream::new(Box::new(file), Default::default());
        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| open_err(e.to_string()))?;
        let reader = probed.format;

        let default_id = reader.default_track().map(|t| t.id);
        let streams: Vec<StreamParameters> = reader
            .tracks()
            .iter()
            .filter(|t| {
                t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some()
            })
            .map(|t| stream_from_track(t.id, &t.codec_params, Some(t.id) == default_id))
            .collect();

        self.duration = reader
            .tracks()
            .iter()
            .filter_map(|t| duration_ms_from_codec_params(&t.codec_params))
            .max()
            .map(Duration::from_millis);
        tracing::debug!(
            path = %path.display(),
            tracks = streams.len(),
            duration = ?self.duration,
            "probed"
        );
        self.reader = Some(reader);
        Ok(streams)
    }

    fn read_next(&mut self) -> Result<ReadOutcome, SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::NotOpen)?;
        match reader.next_packet() {
            Ok(packet) => Ok(ReadOutcome::Unit(CompressedUnit::new(
                StreamIndex(packet.track_id()),
                i64::try_from(packet.ts()).ok(),
                true,
                packet.buf().to_vec(),
            ))),
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Ok(ReadOutcome::EndOfStream)
            }
            Err(SymphoniaError::ResetRequired) => Ok(ReadOutcome::EndOfStream),
            Err(e) => Err(SourceError::Read(e.to_string())),
        }
    }

    fn seek(&mut self, position: Duration) -> Result<(), SourceError> {
        let reader = self.reader.as_mut().ok_or(SourceError::NotOpen)?;
        let time = Time::new(position.as_secs(), position.subsec_nanos() as f64 / 1e9);
        reader
            .seek(SeekMode::Coarse, SeekTo::Time { time, track_id: None })
            .map_err(|e| SourceError::Seek(e.to_string()))?;
        Ok(())
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

/// Audio decoder over Symphonia's codec registry.
#[derive(Default)]
pub struct SymphoniaAudioDecoder {
    inner: Option<Box<dyn symphonia::core::codecs::Decoder>>,
    track_id: u32,
    pending: Option<AudioBlock>,
}

impl Decoder for SymphoniaAudioDecoder {
    type Frame = AudioBlock;

    fn open(&mut self, params: &StreamParameters) -> Result<(), DecodeError> {
        let codec_params = codec_params_of(params).ok_or_else(|| {
            DecodeError::Unsupported(format!("stream {} has no codec parameters", params.index))
        })?;
        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| DecodeError::Unsupported(e.to_string()))?;
        self.inner = Some(decoder);
        self.track_id = params.index.0;
        Ok(())
    }

    fn submit(&mut self, unit: &CompressedUnit) -> Result<SubmitStatus, DecodeError> {
        let decoder = self
            .inner
            .as_mut()
            .ok_or_else(|| DecodeError::Codec("decoder not open".into()))?;
        let ts = unit.pts.and_then(|p| u64::try_from(p).ok()).unwrap_or(0);
        let packet = Packet::new_from_slice(self.track_id, ts, 0, &unit.payload);

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                return Err(DecodeError::Malformed(e.to_string()));
            }
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                return Ok(SubmitStatus::NeedMoreInput);
            }
            Err(e) => return Err(DecodeError::Codec(e.to_string())),
        };
        if decoded.frames() == 0 {
            return Ok(SubmitStatus::NeedMoreInput);
        }

        let spec = *decoded.spec();
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.frames() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        self.pending = Some(AudioBlock {
            samples: sample_buf.samples().to_vec(),
            channels: spec.channels.count() as u16,
            sample_rate: spec.rate,
            pts: unit.pts,
        });
        Ok(SubmitStatus::Accepted)
    }

    fn receive(&mut self) -> Result<Received<AudioBlock>, DecodeError> {
        Ok(self.pending.take().map_or(Received::None, Received::Frame))
    }

    fn flush(&mut self) {
        if let Some(d) = self.inner.as_mut() {
            d.reset();
        }
        self.pending = None;
    }
}

fn codec_params_of(params: &StreamParameters) -> Option<&CodecParameters> {
    params.extra.as_ref()?.downcast_ref::<CodecParameters>()
}

fn stream_from_track(id: u32, codec_params: &CodecParameters, default: bool) -> StreamParameters {
    let codec = codec_name_from_params(codec_params).unwrap_or_else(|| "unknown".to_string());
    let mut stream = StreamParameters::new(StreamIndex(id), MediaKind::Audio, codec);
    let rate = codec_params.sample_rate.unwrap_or(0);
    stream.time_base = match codec_params.time_base {
        Some(tb) => TimeBase::new(tb.numer, tb.denom),
        None if rate > 0 => TimeBase::new(1, rate),
        None => TimeBase::default(),
    };
    stream.duration_pts = duration_ms_from_codec_params(codec_params)
        .map(|ms| stream.time_base.seconds_to_pts(ms as f64 / 1000.0));
    stream.default = default;
    stream.audio = Some(AudioParams {
        sample_rate: rate,
        channels: codec_params.channels.map(|c| c.count() as u16).unwrap_or(0),
    });
    stream.extra = Some(Arc::new(codec_params.clone()));
    stream
}

/// Best-effort duration in milliseconds from codec metadata.
///
/// Returns `None` if the container does not provide total frames or sample rate.
fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label.
fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name.to_string())
}
