//! Symphonia-backed decoder adapter for the playback pull path.
//!
//! Implements the pipeline's send/receive decoder seam: one packet in,
//! interleaved `f32` out, resampled to the device rate when it differs
//! from the source (the conversion happens inside the decode step, so the
//! playback side only ever sees device-rate samples).

use std::collections::VecDeque;

use anyhow::Result;
use frameflow_core::codec::{ReceiveOutcome, SendOutcome, StreamDecoder};
use frameflow_core::element::{Element, PcmFrame};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, DecoderOptions};

use crate::input::MediaPacket;
use crate::resample::StreamResampler;

/// A run of interleaved `f32` samples at the output rate.
pub struct PcmChunk {
    samples: Vec<f32>,
}

impl PcmChunk {
    fn new(samples: Vec<f32>) -> Self {
        PcmChunk { samples }
    }
}

impl Element for PcmChunk {
    fn size_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

impl PcmFrame for PcmChunk {
    fn samples(&self) -> &[f32] {
        &self.samples
    }
}

/// Decoder adapter: Symphonia codec plus optional inline resampler.
pub struct SymphoniaDecoder {
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    resampler: Option<StreamResampler>,
    ready: VecDeque<PcmChunk>,
    flushed: bool,
}

impl SymphoniaDecoder {
    /// Build a decoder for `codec_params`, resampling from the source
    /// rate to `output_rate` when they differ.
    pub fn new(
        codec_params: &CodecParameters,
        channels: usize,
        src_rate: u32,
        output_rate: u32,
        chunk_frames: usize,
    ) -> Result<Self> {
        let decoder =
            symphonia::default::get_codecs().make(codec_params, &DecoderOptions::default())?;

        let resampler = if src_rate == output_rate {
            tracing::info!(rate_hz = src_rate, "resample skipped");
            None
        } else {
            tracing::info!(from_hz = src_rate, to_hz = output_rate, "resampling");
            Some(StreamResampler::new(
                src_rate,
                output_rate,
                channels,
                chunk_frames,
            )?)
        };

        Ok(SymphoniaDecoder {
            decoder,
            resampler,
            ready: VecDeque::new(),
            flushed: false,
        })
    }

    fn queue_output(&mut self, samples: Vec<f32>) {
        if !samples.is_empty() {
            self.ready.push_back(PcmChunk::new(samples));
        }
    }
}

impl StreamDecoder for SymphoniaDecoder {
    type Packet = MediaPacket;
    type Frame = PcmChunk;

    fn send(&mut self, packet: Option<&MediaPacket>) -> frameflow_core::Result<SendOutcome> {
        // Undrained output refuses input, like the codec it wraps.
        if !self.ready.is_empty() {
            return Ok(SendOutcome::WouldBlock);
        }
        match packet {
            Some(p) => {
                let decoded = self
                    .decoder
                    .decode(p.inner())
                    .map_err(|e| frameflow_core::Error::decode(e.to_string()))?;
                let mut sample_buf =
                    SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
                sample_buf.copy_interleaved_ref(decoded);

                let samples = match &mut self.resampler {
                    Some(r) => r
                        .push(sample_buf.samples())
                        .map_err(|e| frameflow_core::Error::decode(e.to_string()))?,
                    None => sample_buf.samples().to_vec(),
                };
                self.queue_output(samples);
                Ok(SendOutcome::Accepted)
            }
            None => {
                if !self.flushed {
                    self.flushed = true;
                    if let Some(r) = &mut self.resampler {
                        let tail = r
                            .finish()
                            .map_err(|e| frameflow_core::Error::decode(e.to_string()))?;
                        self.queue_output(tail);
                    }
                }
                Ok(SendOutcome::Accepted)
            }
        }
    }

    fn receive(&mut self) -> frameflow_core::Result<ReceiveOutcome<PcmChunk>> {
        if let Some(chunk) = self.ready.pop_front() {
            return Ok(ReceiveOutcome::Frame(chunk));
        }
        if self.flushed {
            Ok(ReceiveOutcome::EndOfStream)
        } else {
            Ok(ReceiveOutcome::WouldBlock)
        }
    }
}
