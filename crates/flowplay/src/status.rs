//! Shared playback status state updated by the pipeline and rendered by
//! the main event loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use frameflow_types::{PlaybackEndReason, PlayerStatus};

/// Live playback state; snapshots feed the status line and the optional
/// JSON summary.
#[derive(Debug, Default)]
pub struct PlayerStatusState {
    /// Human-readable track identifier/path currently playing.
    pub now_playing: Option<String>,
    /// Selected output device name.
    pub device: Option<String>,
    /// Source sample rate in Hz.
    pub sample_rate: Option<u32>,
    /// Output sample rate when resampling is active.
    pub output_rate: Option<u32>,
    /// Source channel count.
    pub channels: Option<u16>,
    /// Total track duration in milliseconds when known.
    pub duration_ms: Option<u64>,
    /// Source codec name (for example, FLAC/MP3).
    pub source_codec: Option<String>,
    /// Source bit depth when available.
    pub source_bit_depth: Option<u16>,
    /// Counter updated by the playback callback for elapsed progress.
    pub played_frames: Option<Arc<AtomicU64>>,
    /// Total frames emitted as silence due to underruns.
    pub underrun_frames: Option<Arc<AtomicU64>>,
    /// Number of underrun incidents observed by the callback.
    pub underrun_events: Option<Arc<AtomicU64>>,
    /// Decode failures absorbed as silence.
    pub decode_errors: Option<Arc<AtomicU64>>,
    /// Packets currently queued for the pull path.
    pub queued_packets: Option<u64>,
    /// Bytes currently queued for the pull path.
    pub queued_bytes: Option<u64>,
    /// Packet queue capacity.
    pub packet_queue_capacity: Option<u64>,
    /// Terminal playback reason from the current run.
    pub end_reason: Option<PlaybackEndReason>,
}

impl PlayerStatusState {
    /// Create a shared, mutex-protected status store.
    pub fn shared() -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Elapsed playback milliseconds derived from the output frame
    /// counter; uses the output rate when resampling is active.
    pub fn elapsed_ms(&self) -> Option<u64> {
        let rate = self.output_rate.or(self.sample_rate)?;
        if rate == 0 {
            return None;
        }
        let frames = self.played_frames.as_ref()?.load(Ordering::Relaxed);
        Some(frames.saturating_mul(1000) / rate as u64)
    }

    /// Return a snapshot suitable for display or serialization.
    pub fn snapshot(&self) -> PlayerStatus {
        PlayerStatus {
            now_playing: self.now_playing.clone(),
            elapsed_ms: self.elapsed_ms(),
            duration_ms: self.duration_ms,
            source_codec: self.source_codec.clone(),
            source_bit_depth: self.source_bit_depth,
            sample_rate: self.sample_rate,
            output_rate: self.output_rate,
            channels: self.channels,
            device: self.device.clone(),
            underrun_frames: self
                .underrun_frames
                .as_ref()
                .map(|v| v.load(Ordering::Relaxed)),
            underrun_events: self
                .underrun_events
                .as_ref()
                .map(|v| v.load(Ordering::Relaxed)),
            queued_packets: self.queued_packets,
            queued_bytes: self.queued_bytes,
            packet_queue_capacity: self.packet_queue_capacity,
            decode_errors: self
                .decode_errors
                .as_ref()
                .map(|v| v.load(Ordering::Relaxed)),
            end_reason: self.end_reason,
        }
    }
}

/// `m:ss` (or `h:mm:ss`) rendering for the status line.
pub fn format_hms(ms: u64) -> String {
    let total_secs = ms / 1000;
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes}:{seconds:02}")
    }
}
