//! Input probing and the demux adapter over Symphonia.
//!
//! Implements the pipeline's `PacketSource` seam: packets come out tagged
//! with a dense stream index (their position in the container's track
//! list) so the demux stage can route them.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use frameflow_core::codec::{DemuxPoll, PacketSource};
use frameflow_core::element::{Element, StreamPacket};
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// One demuxed packet, routed by its stream index.
pub struct MediaPacket {
    stream: usize,
    inner: Packet,
}

impl MediaPacket {
    pub fn inner(&self) -> &Packet {
        &self.inner
    }
}

impl Element for MediaPacket {
    fn size_bytes(&self) -> usize {
        self.inner.data.len()
    }
}

impl StreamPacket for MediaPacket {
    fn stream_index(&self) -> usize {
        self.stream
    }
}

/// `PacketSource` adapter over a probed Symphonia format reader.
pub struct SymphoniaSource {
    reader: Box<dyn FormatReader>,
    track_indices: HashMap<u32, usize>,
}

impl PacketSource for SymphoniaSource {
    type Packet = MediaPacket;

    fn read_next(&mut self) -> frameflow_core::Result<DemuxPoll<MediaPacket>> {
        loop {
            match self.reader.next_packet() {
                Ok(packet) => {
                    // Packets from tracks that appeared mid-stream have no
                    // dense index; skip them like any unrouted stream.
                    let Some(&stream) = self.track_indices.get(&packet.track_id()) else {
                        continue;
                    };
                    return Ok(DemuxPoll::Packet(MediaPacket {
                        stream,
                        inner: packet,
                    }));
                }
                Err(symphonia::core::errors::Error::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(DemuxPoll::EndOfStream);
                }
                Err(e) => {
                    return Err(frameflow_core::Error::demux(e.to_string()));
                }
            }
        }
    }
}

/// Metadata captured while probing the source.
#[derive(Clone, Debug, Default)]
pub struct SourceInfo {
    /// Codec name (best-effort).
    pub codec: Option<String>,
    /// Source bit depth (best-effort).
    pub bit_depth: Option<u16>,
}

/// The audio track selected for playback.
pub struct AudioTrack {
    pub stream_index: usize,
    pub codec_params: CodecParameters,
    pub channels: usize,
    pub rate: u32,
    pub duration_ms: Option<u64>,
    pub info: SourceInfo,
}

/// Per-track summary for `probe` output.
pub struct TrackSummary {
    pub stream_index: usize,
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<usize>,
    pub duration_ms: Option<u64>,
}

pub struct OpenedInput {
    pub source: SymphoniaSource,
    pub audio: Option<AudioTrack>,
    pub tracks: Vec<TrackSummary>,
}

/// Probe a local file and prepare the demux adapter.
pub fn open_input(path: &Path) -> Result<OpenedInput> {
    let file = File::open(path).with_context(|| format!("open {path:?}"))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let mss = MediaSourceStream::new(Box::new(file), Default::default());
    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("probe {path:?}"))?;

    let reader = probed.format;

    let mut track_indices = HashMap::new();
    let mut tracks = Vec::new();
    for (index, track) in reader.tracks().iter().enumerate() {
        track_indices.insert(track.id, index);
        tracks.push(TrackSummary {
            stream_index: index,
            codec: codec_name_from_params(&track.codec_params),
            sample_rate: track.codec_params.sample_rate,
            channels: track.codec_params.channels.map(|c| c.count()),
            duration_ms: duration_ms_from_codec_params(&track.codec_params),
        });
    }

    let audio = select_audio_track(&*reader)
        .map(|(index, params)| audio_track_from_params(index, params))
        .transpose()?;

    Ok(OpenedInput {
        source: SymphoniaSource {
            reader,
            track_indices,
        },
        audio,
        tracks,
    })
}

/// Pick the track playback should decode: the container default if it is
/// audio, otherwise the first track with audio parameters.
fn select_audio_track(reader: &dyn FormatReader) -> Option<(usize, CodecParameters)> {
    let tracks = reader.tracks();
    if let Some(default) = reader.default_track() {
        if default.codec_params.sample_rate.is_some() {
            let index = tracks.iter().position(|t| t.id == default.id)?;
            return Some((index, default.codec_params.clone()));
        }
    }
    tracks
        .iter()
        .enumerate()
        .find(|(_, t)| t.codec_params.sample_rate.is_some())
        .map(|(index, t)| (index, t.codec_params.clone()))
}

fn audio_track_from_params(index: usize, params: CodecParameters) -> Result<AudioTrack> {
    let channels = params
        .channels
        .ok_or_else(|| anyhow!("Unknown channels"))?
        .count();
    let rate = params
        .sample_rate
        .ok_or_else(|| anyhow!("Unknown sample rate"))?;
    let duration_ms = duration_ms_from_codec_params(&params);
    let info = SourceInfo {
        codec: codec_name_from_params(&params),
        bit_depth: params
            .bits_per_sample
            .or(params.bits_per_coded_sample)
            .and_then(|v| u16::try_from(v).ok()),
    };
    Ok(AudioTrack {
        stream_index: index,
        codec_params: params,
        channels,
        rate,
        duration_ms,
        info,
    })
}

/// Best-effort duration in milliseconds from codec metadata.
pub fn duration_ms_from_codec_params(codec_params: &CodecParameters) -> Option<u64> {
    let frames = codec_params.n_frames?;
    let rate = codec_params.sample_rate? as u64;
    if rate == 0 {
        return None;
    }
    Some(frames.saturating_mul(1000) / rate)
}

/// Best-effort codec label for probe/status output.
pub fn codec_name_from_params(params: &CodecParameters) -> Option<String> {
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

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::codecs::*;

    #[test]
    fn duration_ms_from_codec_params_handles_zero_rate() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(0);
        params.n_frames = Some(100);
        assert!(duration_ms_from_codec_params(&params).is_none());
    }

    #[test]
    fn duration_ms_from_codec_params_computes() {
        let mut params = CodecParameters::new();
        params.sample_rate = Some(48_000);
        params.n_frames = Some(96_000);
        assert_eq!(duration_ms_from_codec_params(&params), Some(2000));
    }

    #[test]
    fn codec_name_from_params_maps_known_codecs() {
        let mut params = CodecParameters::new();
        params.codec = CODEC_TYPE_FLAC;
        assert_eq!(codec_name_from_params(&params), Some("FLAC".to_string()));
        params.codec = CODEC_TYPE_PCM_S16LE;
        assert_eq!(codec_name_from_params(&params), Some("PCM_S16".to_string()));
    }

    #[test]
    fn codec_name_from_params_unknown_returns_none() {
        let params = CodecParameters::new();
        assert!(codec_name_from_params(&params).is_none());
    }

    #[test]
    fn audio_track_requires_rate_and_channels() {
        let params = CodecParameters::new();
        assert!(audio_track_from_params(0, params).is_err());

        let mut params = CodecParameters::new();
        params.sample_rate = Some(44_100);
        params.channels = Some(symphonia::core::audio::Channels::FRONT_LEFT
            | symphonia::core::audio::Channels::FRONT_RIGHT);
        params.bits_per_sample = Some(16);
        let track = audio_track_from_params(3, params).unwrap();
        assert_eq!(track.stream_index, 3);
        assert_eq!(track.channels, 2);
        assert_eq!(track.rate, 44_100);
        assert_eq!(track.info.bit_depth, Some(16));
    }
}
