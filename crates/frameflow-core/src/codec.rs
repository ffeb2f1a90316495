//! Collaborator traits consumed by the pipeline stages.
//!
//! The core drives demuxing, decoding, conversion, and presentation
//! through these seams and stays correct regardless of what implements
//! them: a real container/codec library in the player binary, fakes in
//! tests. No queue lock is ever held across a call into a collaborator.

use crate::element::StreamPacket;
use crate::error::Result;

/// Result of handing one compressed unit to the decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Input consumed; decoded output may now be available.
    Accepted,
    /// The decoder's internal buffer must be drained via
    /// [`StreamDecoder::receive`] before it accepts more input.
    WouldBlock,
}

/// Result of asking the decoder for one decoded unit.
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome<F> {
    Frame(F),
    /// Nothing buffered; feed more input.
    WouldBlock,
    /// The decoder is fully flushed and will emit nothing more.
    EndOfStream,
}

/// Result of reading the next unit from the demuxer.
#[derive(Debug, PartialEq, Eq)]
pub enum DemuxPoll<P> {
    Packet(P),
    /// The input is exhausted; no packet will follow.
    EndOfStream,
}

/// Demultiplexer collaborator: yields packets tagged with their stream
/// index until the input runs out.
pub trait PacketSource {
    type Packet: StreamPacket;

    fn read_next(&mut self) -> Result<DemuxPoll<Self::Packet>>;
}

/// Codec collaborator with the send/receive state machine the decode
/// stage drives.
///
/// `send(None)` requests a flush: the decoder must then hand out any
/// internally buffered frames through `receive` and finally report
/// [`ReceiveOutcome::EndOfStream`]. Legitimate failures are `Err`,
/// distinct from would-block and end-of-stream.
pub trait StreamDecoder {
    type Packet;
    type Frame;

    fn send(&mut self, packet: Option<&Self::Packet>) -> Result<SendOutcome>;

    fn receive(&mut self) -> Result<ReceiveOutcome<Self::Frame>>;
}

/// Conversion collaborator (color space for video, sample format for
/// audio), invoked only when the decoded format differs from the target.
pub trait FrameConverter {
    type Frame;
    type Output;

    fn convert(&mut self, frame: &Self::Frame) -> Result<Self::Output>;
}

/// Presentation collaborator: uploads/presents one converted buffer.
pub trait DisplaySink {
    type Buffer;

    fn present(&mut self, buffer: Self::Buffer) -> Result<()>;
}
