//! Demux stage: reads packets from the source collaborator and routes
//! them to per-stream queues.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::codec::{DemuxPoll, PacketSource};
use crate::element::StreamPacket;
use crate::error::Result;
use crate::queue::{BlockingQueue, QueueFull};
use crate::session::{SessionState, StageHandle};

/// Maps stream indices to the packet queues that consume them.
///
/// Packets for indices with no route are dropped; the original player did
/// the same for streams it was not playing.
pub struct PacketRouter<P> {
    routes: HashMap<usize, Arc<BlockingQueue<P>>>,
}

impl<P: StreamPacket> PacketRouter<P> {
    pub fn new() -> Self {
        PacketRouter {
            routes: HashMap::new(),
        }
    }

    pub fn route(&mut self, stream_index: usize, queue: Arc<BlockingQueue<P>>) {
        self.routes.insert(stream_index, queue);
    }

    pub fn queue_for(&self, stream_index: usize) -> Option<&Arc<BlockingQueue<P>>> {
        self.routes.get(&stream_index)
    }

    /// Mark every routed queue finished so consumers stop waiting.
    pub fn finish_all(&self) {
        for queue in self.routes.values() {
            queue.finish();
        }
    }
}

impl<P: StreamPacket> Default for PacketRouter<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the demux worker thread.
///
/// The worker reads until the source reports end of stream, routing each
/// packet by its stream index. On end of stream (or a source error, or
/// session cancellation) it marks the session stream-finished and
/// finishes every routed queue so downstream stages can flush.
pub fn spawn_demux<S>(
    mut source: S,
    router: PacketRouter<S::Packet>,
    session: Arc<SessionState>,
    enqueue_patience: Duration,
) -> Result<StageHandle>
where
    S: PacketSource + Send + 'static,
    S::Packet: Send + 'static,
{
    StageHandle::spawn("demux", move || {
        let outcome = demux_loop(&mut source, &router, &session, enqueue_patience);
        session.finish_stream();
        router.finish_all();
        outcome
    })
}

fn demux_loop<S>(
    source: &mut S,
    router: &PacketRouter<S::Packet>,
    session: &SessionState,
    enqueue_patience: Duration,
) -> Result<()>
where
    S: PacketSource,
{
    loop {
        if session.is_cancelled() {
            tracing::debug!("demux cancelled");
            return Ok(());
        }
        match source.read_next()? {
            DemuxPoll::Packet(packet) => route_packet(router, packet, enqueue_patience),
            DemuxPoll::EndOfStream => {
                tracing::info!("input exhausted; all packets enqueued");
                return Ok(());
            }
        }
    }
}

/// Enqueue one packet, waiting up to `patience` for queue space.
///
/// Bounded queues surface backpressure as a refusal; the routing policy
/// here is to wait for the consumer to make room and, failing that, drop
/// the packet with a warning rather than stall the whole pipeline.
fn route_packet<P: StreamPacket>(
    router: &PacketRouter<P>,
    mut packet: P,
    patience: Duration,
) {
    let stream = packet.stream_index();
    let Some(queue) = router.queue_for(stream) else {
        tracing::debug!(stream, "dropping packet for unrouted stream");
        return;
    };

    let deadline = Instant::now() + patience;
    loop {
        match queue.enqueue(packet) {
            Ok(()) => return,
            Err(QueueFull(refused)) => {
                packet = refused;
                let now = Instant::now();
                if queue.is_finished() || now >= deadline {
                    tracing::warn!(
                        stream,
                        queued = queue.len(),
                        "packet queue full; dropping packet"
                    );
                    return;
                }
                queue.wait_not_full(deadline - now);
            }
        }
    }
}
