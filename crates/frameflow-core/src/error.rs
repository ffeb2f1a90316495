//! Error types shared by the queue and pipeline stages.

use thiserror::Error;

/// Errors surfaced by pipeline stages and sink adapters.
///
/// Queue-empty is deliberately *not* represented here: a drained queue is a
/// normal termination signal and is reported as `None` by
/// [`crate::queue::BlockingQueue::dequeue`]. End of stream is likewise a
/// state, not an error.
#[derive(Error, Debug)]
pub enum Error {
    /// A bounded queue refused an element at capacity.
    #[error("queue is at capacity")]
    ResourceExhausted,

    /// The demuxer collaborator failed while reading the input.
    #[error("demux failed: {reason}")]
    Demux { reason: String },

    /// The codec collaborator reported a legitimate decode failure
    /// (distinct from would-block and end-of-stream).
    #[error("decode failed: {reason}")]
    Decode { reason: String },

    /// Frame conversion (color space / sample format) failed.
    #[error("frame conversion failed: {reason}")]
    Convert { reason: String },

    /// The display collaborator failed to present a buffer.
    #[error("presentation failed: {reason}")]
    Present { reason: String },

    /// A worker thread could not be spawned.
    #[error("failed to spawn stage thread: {source}")]
    Spawn {
        #[from]
        source: std::io::Error,
    },

    /// A joined worker thread panicked. Surfaced to the caller instead of
    /// re-panicking; the core never terminates the process.
    #[error("stage '{stage}' panicked")]
    StagePanicked { stage: String },
}

impl Error {
    /// Convenience constructor for collaborator decode failures.
    pub fn decode(reason: impl Into<String>) -> Self {
        Error::Decode {
            reason: reason.into(),
        }
    }

    /// Convenience constructor for collaborator demux failures.
    pub fn demux(reason: impl Into<String>) -> Self {
        Error::Demux {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
