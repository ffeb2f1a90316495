//! Sink adapters: pull-model audio fill and push-model timed refresh.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::codec::{DisplaySink, FrameConverter, StreamDecoder};
use crate::decode::{PumpOutcome, pump_packet};
use crate::element::{Element, PcmFrame};
use crate::error::Result;
use crate::queue::{BlockingQueue, DequeueMode};

/// Pull-model audio sink: satisfies fixed-size sample requests from the
/// playback device callback.
///
/// The device invokes `fill` on its own real-time thread and requires the
/// whole buffer written every call. The sink keeps a carry-over buffer of
/// decoded samples across calls; when it runs dry it dequeues one packet
/// and decodes it. The dequeue may block, but once the queue is finished
/// it returns immediately and the sink switches to flushing the decoder.
/// Decode failures and end of stream fill the remainder with silence; the
/// sink never leaves caller bytes uninitialized.
pub struct PacketPullSink<D>
where
    D: StreamDecoder,
{
    queue: Arc<BlockingQueue<D::Packet>>,
    decoder: D,
    carry: Vec<f32>,
    consumed: usize,
    finished: bool,
    decode_errors: u64,
}

impl<D> PacketPullSink<D>
where
    D: StreamDecoder,
    D::Packet: Element,
    D::Frame: PcmFrame,
{
    pub fn new(queue: Arc<BlockingQueue<D::Packet>>, decoder: D) -> Self {
        PacketPullSink {
            queue,
            decoder,
            carry: Vec::new(),
            consumed: 0,
            finished: false,
            decode_errors: 0,
        }
    }

    /// Fill `out` with decoded samples, zero-filling whatever cannot be
    /// produced. Returns the number of real (non-silence) samples written.
    pub fn fill(&mut self, out: &mut [f32]) -> usize {
        let mut filled = 0;
        while filled < out.len() {
            if self.consumed >= self.carry.len() {
                // Carry-over exhausted; a finished decoder has nothing
                // more, otherwise decode the next packet. Either way any
                // flush tail is copied out before the loop ends.
                if self.finished || !self.refill() {
                    break;
                }
            }
            let n = (self.carry.len() - self.consumed).min(out.len() - filled);
            out[filled..filled + n]
                .copy_from_slice(&self.carry[self.consumed..self.consumed + n]);
            filled += n;
            self.consumed += n;
        }
        for sample in &mut out[filled..] {
            *sample = 0.0;
        }
        filled
    }

    /// Decode until the carry-over buffer holds samples again.
    ///
    /// Returns `false` when no samples can be produced right now: the
    /// queue is paused, a decode error consumed this round's packet, or
    /// the decoder reported end of stream with nothing left over.
    fn refill(&mut self) -> bool {
        self.carry.clear();
        self.consumed = 0;
        loop {
            let packet = self.queue.dequeue(DequeueMode::Blocking);
            if packet.is_none() && !self.queue.is_finished() {
                // Paused queue: deliver silence without tearing down.
                return false;
            }
            // `None` with a finished queue is the flush request.
            let carry = &mut self.carry;
            let outcome = pump_packet(&mut self.decoder, packet.as_ref(), |frame| {
                carry.extend_from_slice(frame.samples());
                Ok(())
            });
            match outcome {
                Ok(PumpOutcome::Finished) => {
                    self.finished = true;
                    return !self.carry.is_empty();
                }
                Ok(PumpOutcome::Continue) => {
                    if !self.carry.is_empty() {
                        return true;
                    }
                    // Nothing decoded from this packet; feed the next one.
                }
                Err(e) => {
                    self.decode_errors += 1;
                    tracing::warn!("decode error in playback pull: {e}");
                    // Keep whatever decoded before the failure; the next
                    // refill moves on to the following packet.
                    return !self.carry.is_empty();
                }
            }
        }
    }

    /// Whether the decoder reported end of stream (playback is over once
    /// the carry-over drains).
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn decode_errors(&self) -> u64 {
        self.decode_errors
    }
}

/// Event observed by the display/refresh loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshEvent {
    /// Periodic refresh: present the next frame if one is ready.
    Tick,
    /// Stop the loop.
    Quit,
}

/// Periodic timer posting [`RefreshEvent::Tick`] into the event queue the
/// display loop observes, decoupling decode throughput from display
/// cadence.
pub struct RefreshTimer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshTimer {
    pub fn spawn(interval: Duration, events: Sender<RefreshEvent>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) {
                if events.send(RefreshEvent::Tick).is_err() {
                    break;
                }
                thread::sleep(interval);
            }
        });
        RefreshTimer {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop ticking and join the timer thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for RefreshTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Display refresh interval for a `num/den` frame rate.
pub fn refresh_interval(frame_rate_num: u32, frame_rate_den: u32) -> Duration {
    if frame_rate_num == 0 || frame_rate_den == 0 {
        // 25 fps fallback when the container reports no usable rate.
        return Duration::from_millis(40);
    }
    Duration::from_millis((1000 * frame_rate_den as u64) / frame_rate_num as u64)
}

/// Push-model display loop: on each tick, take one decoded frame
/// (non-blocking), convert it, and present it.
///
/// A tick with no frame ready is skipped. The loop ends on
/// [`RefreshEvent::Quit`], when the event channel disconnects, or once the
/// frame queue is finished and drained. Converter/presenter failures end
/// the loop with the error.
pub fn run_refresh_loop<C, S>(
    events: &Receiver<RefreshEvent>,
    frames: &BlockingQueue<C::Frame>,
    converter: &mut C,
    display: &mut S,
) -> Result<()>
where
    C: FrameConverter,
    C::Frame: Element,
    S: DisplaySink<Buffer = C::Output>,
{
    loop {
        match events.recv() {
            Ok(RefreshEvent::Tick) => match frames.dequeue(DequeueMode::NonBlocking) {
                Some(frame) => {
                    let buffer = converter.convert(&frame)?;
                    display.present(buffer)?;
                }
                None => {
                    if frames.is_finished() {
                        tracing::info!("frame queue drained; display loop done");
                        return Ok(());
                    }
                    // Decoder is behind; skip this tick.
                }
            },
            Ok(RefreshEvent::Quit) | Err(_) => return Ok(()),
        }
    }
}
