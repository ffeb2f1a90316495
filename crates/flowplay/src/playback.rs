//! Playback stage (CPAL output stream).
//!
//! Builds the CPAL output stream whose callback pulls decoded samples on
//! demand through the pipeline's pull sink, applies basic channel mapping
//! (mono↔stereo, best-effort otherwise), and converts `f32` samples to
//! the device sample format. The device contract is honored by the sink:
//! every callback buffer is fully written, with silence where no data can
//! be produced in time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;
use frameflow_core::sink::PacketPullSink;

use crate::decode::SymphoniaDecoder;

/// Counters and flags shared between the playback callback and the main
/// event loop.
#[derive(Clone)]
pub struct PlaybackShared {
    /// Output frames actually produced (drives the elapsed display).
    pub played_frames: Arc<AtomicU64>,
    /// Frames emitted as silence because the pull path had no data.
    pub underrun_frames: Arc<AtomicU64>,
    /// Underrun incidents.
    pub underrun_events: Arc<AtomicU64>,
    /// Decode failures absorbed as silence.
    pub decode_errors: Arc<AtomicU64>,
    /// Set once the decoder reported end of stream and the carry drained.
    pub finished: Arc<AtomicBool>,
}

impl PlaybackShared {
    pub fn new() -> Self {
        PlaybackShared {
            played_frames: Arc::new(AtomicU64::new(0)),
            underrun_frames: Arc::new(AtomicU64::new(0)),
            underrun_events: Arc::new(AtomicU64::new(0)),
            decode_errors: Arc::new(AtomicU64::new(0)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Relaxed)
    }
}

impl Default for PlaybackShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a CPAL output stream that pulls audio through `sink`.
///
/// `src_channels` is the channel count of the samples the sink produces;
/// the callback maps them onto the device channel layout.
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    sink: PacketPullSink<SymphoniaDecoder>,
    src_channels: usize,
    shared: PlaybackShared,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, sink, src_channels, shared),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, sink, src_channels, shared),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, sink, src_channels, shared),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, sink, src_channels, shared),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut sink: PacketPullSink<SymphoniaDecoder>,
    src_channels: usize,
    shared: PlaybackShared,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            let frames = data.len() / channels_out;
            let wanted = frames * src_channels;
            scratch.resize(wanted, 0.0);

            let produced = sink.fill(&mut scratch);
            let produced_frames = produced / src_channels;

            for frame in 0..frames {
                for ch in 0..channels_out {
                    let sample = mapped_sample(&scratch, frame, src_channels, ch, channels_out);
                    data[frame * channels_out + ch] =
                        <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }

            if produced_frames > 0 {
                shared
                    .played_frames
                    .fetch_add(produced_frames as u64, Ordering::Relaxed);
            }
            if produced < wanted && !sink.is_finished() {
                shared.underrun_events.fetch_add(1, Ordering::Relaxed);
                shared
                    .underrun_frames
                    .fetch_add((frames - produced_frames) as u64, Ordering::Relaxed);
            }
            shared
                .decode_errors
                .store(sink.decode_errors(), Ordering::Relaxed);
            if sink.is_finished() {
                shared.finished.store(true, Ordering::Relaxed);
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Read one output sample for `dst_ch`, applying a simple channel
/// mapping:
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to available channels
fn mapped_sample(
    src: &[f32],
    frame: usize,
    src_channels: usize,
    dst_ch: usize,
    dst_channels: usize,
) -> f32 {
    let base = frame * src_channels;
    if base >= src.len() {
        return 0.0;
    }
    let get = |ch: usize| src.get(base + ch).copied().unwrap_or(0.0);
    match (src_channels, dst_channels) {
        (1, 1) => get(0),
        (2, 2) => get(dst_ch.min(1)),
        (2, 1) => 0.5 * (get(0) + get(1)),
        (1, 2) => get(0),
        _ => get(dst_ch.min(src_channels.saturating_sub(1))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stereo_passthrough() {
        let src = [0.1, 0.2, 0.3, 0.4];
        assert_eq!(mapped_sample(&src, 0, 2, 0, 2), 0.1);
        assert_eq!(mapped_sample(&src, 0, 2, 1, 2), 0.2);
        assert_eq!(mapped_sample(&src, 1, 2, 0, 2), 0.3);
        assert_eq!(mapped_sample(&src, 1, 2, 1, 2), 0.4);
    }

    #[test]
    fn mono_upmixes_to_both_channels() {
        let src = [0.5, 0.7];
        assert_eq!(mapped_sample(&src, 0, 1, 0, 2), 0.5);
        assert_eq!(mapped_sample(&src, 0, 1, 1, 2), 0.5);
        assert_eq!(mapped_sample(&src, 1, 1, 0, 2), 0.7);
    }

    #[test]
    fn stereo_downmix_averages() {
        let src = [0.2, 0.4];
        assert!((mapped_sample(&src, 0, 2, 0, 1) - 0.3).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_frame_is_silence() {
        let src = [0.1, 0.2];
        assert_eq!(mapped_sample(&src, 5, 2, 0, 2), 0.0);
    }
}
