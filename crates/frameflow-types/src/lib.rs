use serde::{Deserialize, Serialize};

/// Reason why a playback session ended.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEndReason {
    /// Natural end of stream/file.
    Eof,
    /// Decoder, demuxer, or output error interrupted playback.
    Error,
    /// Playback was explicitly stopped by the user.
    Stopped,
}

/// Playback status snapshot reported by the player.
///
/// This payload is focused on pipeline and renderer details: what is
/// playing, how far along it is, and how the queues and output device are
/// holding up.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStatus {
    /// Current file/path being played, if available.
    pub now_playing: Option<String>,
    /// Elapsed playback time in milliseconds.
    pub elapsed_ms: Option<u64>,
    /// Total media duration in milliseconds.
    pub duration_ms: Option<u64>,
    /// Source codec (for example `flac`, `mp3`).
    pub source_codec: Option<String>,
    /// Source bit depth, if known.
    pub source_bit_depth: Option<u16>,
    /// Source sample rate (Hz).
    pub sample_rate: Option<u32>,
    /// Output sample rate after resampling (Hz), when it differs.
    pub output_rate: Option<u32>,
    /// Channel count.
    pub channels: Option<u16>,
    /// Active output device name, if known.
    pub device: Option<String>,
    /// Count of frames emitted as silence by the output pipeline.
    pub underrun_frames: Option<u64>,
    /// Count of underrun incidents observed by the output pipeline.
    pub underrun_events: Option<u64>,
    /// Packets currently waiting in the playback queue.
    pub queued_packets: Option<u64>,
    /// Bytes currently waiting in the playback queue.
    pub queued_bytes: Option<u64>,
    /// Packet queue capacity.
    pub packet_queue_capacity: Option<u64>,
    /// Decode failures absorbed as silence by the playback pull path.
    pub decode_errors: Option<u64>,
    /// End reason once playback is over.
    pub end_reason: Option<PlaybackEndReason>,
}
