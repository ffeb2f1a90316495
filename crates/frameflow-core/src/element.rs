//! Traits describing the opaque units that flow through queues.

/// An opaque media unit owned by a queue node: a compressed packet or a
/// decoded frame.
///
/// Ownership transfers into the queue on enqueue and back to the caller on
/// dequeue. The reported size feeds the queue's byte accounting.
pub trait Element {
    /// Payload size in bytes.
    fn size_bytes(&self) -> usize;
}

/// A demuxed packet tagged with the index of the stream it came from.
///
/// The demux stage uses the index to route packets to per-stream queues.
pub trait StreamPacket: Element {
    fn stream_index(&self) -> usize;
}

/// A decoded audio frame exposing its interleaved `f32` samples.
///
/// Interleaved `f32` is the wire format between the decode side and the
/// playback callback; the device layer converts to the hardware sample
/// format.
pub trait PcmFrame {
    fn samples(&self) -> &[f32];
}
