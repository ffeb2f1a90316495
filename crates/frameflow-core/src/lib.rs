//! Queue and pipeline core for media playback.
//!
//! ## Pipeline
//! 1. **Demux**: a background thread pulls packets from the source
//!    collaborator and routes them to per-stream bounded queues.
//! 2. **Decode**: per-media-type workers drive the codec collaborator's
//!    send/receive state machine from a packet queue into a frame queue.
//! 3. **Sinks**: the audio device pulls samples on demand through
//!    [`sink::PacketPullSink`]; video frames are pushed to the display on
//!    a timer cadence by [`sink::run_refresh_loop`].
//!
//! Stages communicate only through [`queue::BlockingQueue`] handoff;
//! end-of-stream and teardown are coordinated per session by
//! [`session::SessionState`], and every worker is joined through its
//! [`session::StageHandle`].
//!
//! Demuxing, decoding, conversion, and presentation themselves are
//! collaborator concerns behind the traits in [`codec`]; the pipeline is
//! correct regardless of what implements them.

mod chain;

pub mod codec;
pub mod config;
pub mod decode;
pub mod demux;
pub mod element;
pub mod error;
pub mod queue;
pub mod session;
pub mod sink;

pub use error::{Error, Result};

#[cfg(test)]
mod pipeline_tests {
    //! End-to-end graph over fake collaborators: demux feeding two
    //! streams, a decode stage on one, a pull sink on the other, and the
    //! timed refresh loop presenting decoded frames.

    use std::sync::Arc;
    use std::time::Duration;

    use crate::codec::{
        DemuxPoll, DisplaySink, FrameConverter, PacketSource, ReceiveOutcome, SendOutcome,
        StreamDecoder,
    };
    use crate::config::PipelineConfig;
    use crate::element::{Element, PcmFrame, StreamPacket};
    use crate::error::Result;
    use crate::demux::{PacketRouter, spawn_demux};
    use crate::decode::spawn_decode;
    use crate::queue::BlockingQueue;
    use crate::session::{SessionState, StageSet};
    use crate::sink::{PacketPullSink, RefreshTimer, run_refresh_loop};

    const AUDIO: usize = 1;
    const VIDEO: usize = 0;

    #[derive(Debug)]
    struct Pkt {
        stream: usize,
        seq: u32,
    }

    impl Element for Pkt {
        fn size_bytes(&self) -> usize {
            4
        }
    }

    impl StreamPacket for Pkt {
        fn stream_index(&self) -> usize {
            self.stream
        }
    }

    struct InterleavedSource {
        packets: Vec<(usize, u32)>,
        at: usize,
    }

    impl PacketSource for InterleavedSource {
        type Packet = Pkt;

        fn read_next(&mut self) -> Result<DemuxPoll<Pkt>> {
            match self.packets.get(self.at) {
                Some(&(stream, seq)) => {
                    self.at += 1;
                    Ok(DemuxPoll::Packet(Pkt { stream, seq }))
                }
                None => Ok(DemuxPoll::EndOfStream),
            }
        }
    }

    #[derive(Debug)]
    struct Frame(u32);

    impl Element for Frame {
        fn size_bytes(&self) -> usize {
            4
        }
    }

    impl PcmFrame for Frame {
        fn samples(&self) -> &[f32] {
            // One silent sample per decoded packet is enough for counting.
            &[0.0]
        }
    }

    /// 1:1 fake codec: each packet becomes one frame; flush ends the
    /// stream.
    struct OneToOne {
        pending: Option<u32>,
        flushing: bool,
    }

    impl StreamDecoder for OneToOne {
        type Packet = Pkt;
        type Frame = Frame;

        fn send(&mut self, packet: Option<&Pkt>) -> Result<SendOutcome> {
            if self.pending.is_some() {
                return Ok(SendOutcome::WouldBlock);
            }
            match packet {
                Some(p) => {
                    self.pending = Some(p.seq);
                    Ok(SendOutcome::Accepted)
                }
                None => {
                    self.flushing = true;
                    Ok(SendOutcome::Accepted)
                }
            }
        }

        fn receive(&mut self) -> Result<ReceiveOutcome<Frame>> {
            if let Some(seq) = self.pending.take() {
                return Ok(ReceiveOutcome::Frame(Frame(seq)));
            }
            if self.flushing {
                Ok(ReceiveOutcome::EndOfStream)
            } else {
                Ok(ReceiveOutcome::WouldBlock)
            }
        }
    }

    struct Identity;

    impl FrameConverter for Identity {
        type Frame = Frame;
        type Output = u32;

        fn convert(&mut self, frame: &Frame) -> Result<u32> {
            Ok(frame.0)
        }
    }

    struct Recorder(Vec<u32>);

    impl DisplaySink for Recorder {
        type Buffer = u32;

        fn present(&mut self, buffer: u32) -> Result<()> {
            self.0.push(buffer);
            Ok(())
        }
    }

    #[test]
    fn full_graph_plays_both_streams_to_completion() {
        let packets: Vec<(usize, u32)> = (0..40)
            .map(|i| if i % 2 == 0 { (VIDEO, i / 2) } else { (AUDIO, i / 2) })
            .collect();

        let cfg = PipelineConfig {
            packet_queue_capacity: 8,
            frame_queue_capacity: 32,
            enqueue_patience: Duration::from_millis(200),
        };
        let video_pq = Arc::new(BlockingQueue::new(cfg.packet_queue_capacity));
        let audio_pq = Arc::new(BlockingQueue::new(cfg.packet_queue_capacity));
        let video_fq = Arc::new(BlockingQueue::new(cfg.frame_queue_capacity));

        let mut router = PacketRouter::new();
        router.route(VIDEO, video_pq.clone());
        router.route(AUDIO, audio_pq.clone());

        let session = SessionState::shared();
        let mut stages = StageSet::new();
        stages.push(
            spawn_demux(
                InterleavedSource { packets, at: 0 },
                router,
                session.clone(),
                cfg.enqueue_patience,
            )
            .unwrap(),
        );
        stages.push(
            spawn_decode(
                "video-decode",
                video_pq,
                video_fq.clone(),
                OneToOne {
                    pending: None,
                    flushing: false,
                },
                session.clone(),
                cfg.enqueue_patience,
            )
            .unwrap(),
        );

        // Audio side: the device callback pulls samples on demand.
        let mut audio = PacketPullSink::new(
            audio_pq,
            OneToOne {
                pending: None,
                flushing: false,
            },
        );
        let mut pulled = 0;
        while !audio.is_finished() {
            let mut buf = [0.0f32; 4];
            pulled += audio.fill(&mut buf);
        }
        assert_eq!(pulled, 20);

        // Video side: a fast timer drives the loop until the frame queue
        // is finished and drained.
        let (tx, rx) = crossbeam_channel::unbounded();
        let timer = RefreshTimer::spawn(Duration::from_millis(1), tx);
        let mut display = Recorder(Vec::new());
        run_refresh_loop(&rx, &video_fq, &mut Identity, &mut display).unwrap();
        timer.stop();
        assert_eq!(display.0, (0..20).collect::<Vec<_>>());

        assert!(session.wait_stages_finished(Duration::from_secs(5)));
        let failures = stages.shutdown();
        assert!(failures.is_empty(), "stage failures: {failures:?}");
    }
}
