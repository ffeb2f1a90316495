//! Decode stage: drives the collaborator codec state machine from a
//! packet queue into a frame queue.
//!
//! The feed protocol matters: when `send` reports would-block, the
//! decoder's internal buffer must be drained via `receive` before the
//! same packet is retried, otherwise the decoder deadlocks internally.
//! When the upstream queue finishes, the stage sends one final empty
//! packet to flush any frames still buffered inside the decoder and
//! drains until end of stream.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{ReceiveOutcome, SendOutcome, StreamDecoder};
use crate::element::Element;
use crate::error::{Error, Result};
use crate::queue::{BlockingQueue, DequeueMode, QueueFull};
use crate::session::{SessionState, StageHandle};

/// Outcome of pumping one packet (or the flush request) through the
/// decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PumpOutcome {
    /// The decoder may accept more input.
    Continue,
    /// The decoder reported end of stream; it will emit nothing more.
    Finished,
}

enum DrainEnd {
    WouldBlock,
    EndOfStream,
}

/// Feed one packet (`None` = flush request) to the decoder and hand every
/// decoded frame to `emit`.
///
/// Drains buffered output whenever `send` refuses input, and errors out
/// if the decoder refuses input twice without emitting anything in
/// between (no forward progress).
pub fn pump_packet<D, E>(
    decoder: &mut D,
    packet: Option<&D::Packet>,
    mut emit: E,
) -> Result<PumpOutcome>
where
    D: StreamDecoder,
    E: FnMut(D::Frame) -> Result<()>,
{
    let mut drained_since_refusal = true;
    loop {
        match decoder.send(packet)? {
            SendOutcome::Accepted => break,
            SendOutcome::WouldBlock => {
                if !drained_since_refusal {
                    return Err(Error::decode(
                        "decoder refused input without emitting output",
                    ));
                }
                let (end, emitted) = drain(decoder, &mut emit)?;
                match end {
                    DrainEnd::EndOfStream => return Ok(PumpOutcome::Finished),
                    DrainEnd::WouldBlock => drained_since_refusal = emitted > 0,
                }
            }
        }
    }
    let (end, _) = drain(decoder, &mut emit)?;
    match end {
        DrainEnd::EndOfStream => Ok(PumpOutcome::Finished),
        DrainEnd::WouldBlock => Ok(PumpOutcome::Continue),
    }
}

fn drain<D, E>(decoder: &mut D, emit: &mut E) -> Result<(DrainEnd, usize)>
where
    D: StreamDecoder,
    E: FnMut(D::Frame) -> Result<()>,
{
    let mut emitted = 0;
    loop {
        match decoder.receive()? {
            ReceiveOutcome::Frame(frame) => {
                emit(frame)?;
                emitted += 1;
            }
            ReceiveOutcome::WouldBlock => return Ok((DrainEnd::WouldBlock, emitted)),
            ReceiveOutcome::EndOfStream => return Ok((DrainEnd::EndOfStream, emitted)),
        }
    }
}

/// Spawn a decode worker: dequeue packets from `input`, decode, enqueue
/// frames into `output`.
///
/// On decoder end of stream (including after the final flush) the stage
/// finishes the output queue, the terminal marker downstream sinks stop
/// waiting on, and records itself finished in the session. A decode
/// error stops this stage the same way but is surfaced through the stage
/// handle; sibling stages are unaffected.
pub fn spawn_decode<D>(
    name: &'static str,
    input: Arc<BlockingQueue<D::Packet>>,
    output: Arc<BlockingQueue<D::Frame>>,
    decoder: D,
    session: Arc<SessionState>,
    enqueue_patience: Duration,
) -> Result<StageHandle>
where
    D: StreamDecoder + Send + 'static,
    D::Packet: Element + Send + 'static,
    D::Frame: Element + Send + 'static,
{
    session.register_stage(name);
    StageHandle::spawn(name, move || {
        let outcome = decode_loop(name, &input, &output, decoder, &session, enqueue_patience);
        output.finish();
        session.mark_stage_finished(name);
        outcome
    })
}

fn decode_loop<D>(
    name: &str,
    input: &BlockingQueue<D::Packet>,
    output: &BlockingQueue<D::Frame>,
    mut decoder: D,
    session: &SessionState,
    enqueue_patience: Duration,
) -> Result<()>
where
    D: StreamDecoder,
    D::Packet: Element,
    D::Frame: Element,
{
    let mut emit = |frame: D::Frame| push_frame(output, frame, enqueue_patience);
    loop {
        if session.is_cancelled() {
            tracing::debug!(stage = name, "decode cancelled");
            return Ok(());
        }
        match input.dequeue(DequeueMode::Blocking) {
            Some(packet) => {
                if pump_packet(&mut decoder, Some(&packet), &mut emit)? == PumpOutcome::Finished {
                    tracing::info!(stage = name, "decoder reported end of stream");
                    return Ok(());
                }
            }
            None => {
                if input.is_blocked() {
                    // Paused; wait for release rather than spinning.
                    input.wait_unblocked(Duration::from_millis(100));
                    continue;
                }
                if !(input.is_finished() || session.is_stream_finished()) {
                    continue;
                }
                // Input drained for good: flush the decoder until it has
                // handed out everything it buffered.
                while pump_packet(&mut decoder, None, &mut emit)? == PumpOutcome::Continue {}
                tracing::info!(stage = name, "decoder flushed");
                return Ok(());
            }
        }
    }
}

/// Enqueue one decoded frame, waiting up to `patience` for space.
///
/// A finished output queue (the consumer is gone) drops the frame
/// silently; exhausted patience drops it with a warning. Either way the
/// stage keeps running; frame drops must never wedge the decoder.
fn push_frame<F: Element>(
    output: &BlockingQueue<F>,
    frame: F,
    patience: Duration,
) -> Result<()> {
    let mut frame = frame;
    loop {
        match output.enqueue(frame) {
            Ok(()) => return Ok(()),
            Err(QueueFull(refused)) => {
                if output.is_finished() {
                    return Ok(());
                }
                frame = refused;
                if !output.wait_not_full(patience) && output.is_full() {
                    tracing::warn!(queued = output.len(), "frame queue full; dropping frame");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Pkt(u32);

    impl Element for Pkt {
        fn size_bytes(&self) -> usize {
            4
        }
    }

    #[derive(Debug, PartialEq)]
    struct Frm(u32);

    impl Element for Frm {
        fn size_bytes(&self) -> usize {
            4
        }
    }

    /// Fake codec that holds `lookahead` packets internally before
    /// emitting anything, the way a real decoder buffers reference
    /// frames. Flushing releases the held tail.
    struct BufferingDecoder {
        lookahead: usize,
        held: Vec<u32>,
        ready: Vec<u32>,
        flushing: bool,
        fail_on: Option<u32>,
    }

    impl BufferingDecoder {
        fn new(lookahead: usize) -> Self {
            BufferingDecoder {
                lookahead,
                held: Vec::new(),
                ready: Vec::new(),
                flushing: false,
                fail_on: None,
            }
        }
    }

    impl StreamDecoder for BufferingDecoder {
        type Packet = Pkt;
        type Frame = Frm;

        fn send(&mut self, packet: Option<&Pkt>) -> Result<SendOutcome> {
            // Undrained output refuses input, like a real codec.
            if !self.ready.is_empty() {
                return Ok(SendOutcome::WouldBlock);
            }
            match packet {
                Some(p) => {
                    if self.fail_on == Some(p.0) {
                        return Err(Error::decode("scripted decode failure"));
                    }
                    self.held.push(p.0);
                    if self.held.len() > self.lookahead {
                        self.ready.push(self.held.remove(0));
                    }
                    Ok(SendOutcome::Accepted)
                }
                None => {
                    self.flushing = true;
                    self.ready.append(&mut self.held);
                    Ok(SendOutcome::Accepted)
                }
            }
        }

        fn receive(&mut self) -> Result<ReceiveOutcome<Frm>> {
            if !self.ready.is_empty() {
                return Ok(ReceiveOutcome::Frame(Frm(self.ready.remove(0))));
            }
            if self.flushing {
                Ok(ReceiveOutcome::EndOfStream)
            } else {
                Ok(ReceiveOutcome::WouldBlock)
            }
        }
    }

    /// Decoder that holds two packets and releases them only after a
    /// refused `send`, to pin the feed protocol's drain-before-retry
    /// ordering.
    struct RefusingDecoder {
        held: Vec<u32>,
        refused: bool,
        flushing: bool,
        sends_refused: u32,
    }

    impl RefusingDecoder {
        fn new() -> Self {
            RefusingDecoder {
                held: Vec::new(),
                refused: false,
                flushing: false,
                sends_refused: 0,
            }
        }
    }

    impl StreamDecoder for RefusingDecoder {
        type Packet = Pkt;
        type Frame = Frm;

        fn send(&mut self, packet: Option<&Pkt>) -> Result<SendOutcome> {
            match packet {
                Some(p) => {
                    if self.held.len() >= 2 {
                        self.refused = true;
                        self.sends_refused += 1;
                        return Ok(SendOutcome::WouldBlock);
                    }
                    self.held.push(p.0);
                    Ok(SendOutcome::Accepted)
                }
                None => {
                    self.flushing = true;
                    Ok(SendOutcome::Accepted)
                }
            }
        }

        fn receive(&mut self) -> Result<ReceiveOutcome<Frm>> {
            // Output is handed out only while refusing input or flushing,
            // so the stage must drain before its retry can succeed.
            if (self.refused || self.flushing) && !self.held.is_empty() {
                return Ok(ReceiveOutcome::Frame(Frm(self.held.remove(0))));
            }
            if self.flushing {
                return Ok(ReceiveOutcome::EndOfStream);
            }
            self.refused = false;
            Ok(ReceiveOutcome::WouldBlock)
        }
    }

    fn collect_emitted<D: StreamDecoder<Packet = Pkt, Frame = Frm>>(
        decoder: &mut D,
        packets: &[Option<Pkt>],
    ) -> (Vec<u32>, PumpOutcome) {
        let mut frames = Vec::new();
        let mut last = PumpOutcome::Continue;
        for p in packets {
            last = pump_packet(decoder, p.as_ref(), |f| {
                frames.push(f.0);
                Ok(())
            })
            .unwrap();
            if last == PumpOutcome::Finished {
                break;
            }
        }
        (frames, last)
    }

    #[test]
    fn flush_releases_buffered_lookahead() {
        // Decoder holds 3 packets back; 5 packets + flush must still
        // yield all 5 frames.
        let mut decoder = BufferingDecoder::new(3);
        let feed: Vec<Option<Pkt>> = (1..=5).map(|i| Some(Pkt(i))).chain([None]).collect();
        let (frames, last) = collect_emitted(&mut decoder, &feed);
        assert_eq!(frames, vec![1, 2, 3, 4, 5]);
        assert_eq!(last, PumpOutcome::Finished);
    }

    #[test]
    fn send_refusal_forces_drain_before_retry() {
        let mut decoder = RefusingDecoder::new();
        let feed: Vec<Option<Pkt>> = (1..=5).map(|i| Some(Pkt(i))).chain([None]).collect();
        let (frames, last) = collect_emitted(&mut decoder, &feed);
        // Every refusal was resolved by draining, never by dropping input.
        assert_eq!(frames, vec![1, 2, 3, 4, 5]);
        assert_eq!(last, PumpOutcome::Finished);
        assert!(decoder.sends_refused >= 1);
    }

    #[test]
    fn stuck_decoder_is_an_error_not_a_hang() {
        struct Stuck;
        impl StreamDecoder for Stuck {
            type Packet = Pkt;
            type Frame = Frm;
            fn send(&mut self, _p: Option<&Pkt>) -> Result<SendOutcome> {
                Ok(SendOutcome::WouldBlock)
            }
            fn receive(&mut self) -> Result<ReceiveOutcome<Frm>> {
                Ok(ReceiveOutcome::WouldBlock)
            }
        }
        let res = pump_packet(&mut Stuck, Some(&Pkt(1)), |_f| Ok(()));
        assert!(matches!(res, Err(Error::Decode { .. })));
    }

    #[test]
    fn stage_decodes_and_flushes_through_queues() {
        let input = Arc::new(BlockingQueue::new(16));
        let output = Arc::new(BlockingQueue::new(16));
        let session = SessionState::shared();

        for i in 1..=8 {
            input.enqueue(Pkt(i)).unwrap();
        }
        input.finish();
        session.finish_stream();

        let stage = spawn_decode(
            "audio-decode",
            input,
            output.clone(),
            BufferingDecoder::new(2),
            session.clone(),
            Duration::from_millis(100),
        )
        .unwrap();
        stage.join().unwrap();

        let mut frames = Vec::new();
        while let Some(f) = output.dequeue(DequeueMode::Blocking) {
            frames.push(f.0);
        }
        assert_eq!(frames, (1..=8).collect::<Vec<_>>());
        assert!(output.is_finished());
        assert!(session.is_stage_finished("audio-decode"));
        assert!(session.all_stages_finished());
    }

    #[test]
    fn decode_error_finishes_stage_without_killing_sibling() {
        let input = Arc::new(BlockingQueue::new(16));
        let output: Arc<BlockingQueue<Frm>> = Arc::new(BlockingQueue::new(16));
        let session = SessionState::shared();

        let sibling_in = Arc::new(BlockingQueue::new(16));
        let sibling_out: Arc<BlockingQueue<Frm>> = Arc::new(BlockingQueue::new(16));

        input.enqueue(Pkt(1)).unwrap();
        input.enqueue(Pkt(13)).unwrap();
        input.finish();
        sibling_in.enqueue(Pkt(2)).unwrap();
        sibling_in.finish();
        session.finish_stream();

        let mut failing = BufferingDecoder::new(0);
        failing.fail_on = Some(13);
        let bad = spawn_decode(
            "audio-decode",
            input,
            output.clone(),
            failing,
            session.clone(),
            Duration::from_millis(100),
        )
        .unwrap();
        let good = spawn_decode(
            "video-decode",
            sibling_in,
            sibling_out.clone(),
            BufferingDecoder::new(0),
            session.clone(),
            Duration::from_millis(100),
        )
        .unwrap();

        assert!(matches!(bad.join(), Err(Error::Decode { .. })));
        good.join().unwrap();

        // The failed stage still marked itself finished and closed its
        // output; the sibling completed normally.
        assert!(output.is_finished());
        assert!(session.all_stages_finished());
        assert_eq!(sibling_out.dequeue(DequeueMode::Blocking), Some(Frm(2)));
    }

    #[test]
    fn blocked_input_pauses_stage_without_exit() {
        let input = Arc::new(BlockingQueue::new(16));
        let output = Arc::new(BlockingQueue::new(16));
        let session = SessionState::shared();

        input.enqueue(Pkt(1)).unwrap();
        input.set_blocked(true);

        let stage = spawn_decode(
            "audio-decode",
            input.clone(),
            output.clone(),
            BufferingDecoder::new(0),
            session.clone(),
            Duration::from_millis(100),
        )
        .unwrap();

        // While blocked nothing is decoded even though data is queued.
        std::thread::sleep(Duration::from_millis(50));
        assert!(output.is_empty());

        input.set_blocked(false);
        input.finish();
        session.finish_stream();
        stage.join().unwrap();
        assert_eq!(output.dequeue(DequeueMode::Blocking), Some(Frm(1)));
    }
}
