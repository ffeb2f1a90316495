//! Streaming sample-rate conversion for the decode path.
//!
//! Wraps Rubato's streaming sinc resampler behind a push interface: the
//! decoder adapter feeds whatever each packet produced, samples are
//! accumulated into fixed-size chunks for the steady-state loop, and the
//! tail is converted with a partial chunk at flush time.

use anyhow::{Result, anyhow};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

pub struct StreamResampler {
    resampler: Box<dyn Resampler<f32>>,
    channels: usize,
    chunk_in_frames: usize,
    pending: Vec<f32>,
    out_buf: Vec<f32>,
}

impl StreamResampler {
    pub fn new(
        src_rate: u32,
        dst_rate: u32,
        channels: usize,
        chunk_in_frames: usize,
    ) -> Result<Self> {
        let f_ratio = dst_rate as f64 / src_rate as f64;

        let sinc_len = 128;
        let oversampling_factor = 256;
        let interpolation = SincInterpolationType::Cubic;
        let window = WindowFunction::BlackmanHarris2;
        let f_cutoff = calculate_cutoff(sinc_len, window);

        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff,
            interpolation,
            oversampling_factor,
            window,
        };

        let chunk_in_frames = chunk_in_frames.max(1);
        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_in_frames,
            channels,
            FixedAsync::Input,
        )
        .map_err(|e| anyhow!("resampler init: {e}"))?;

        // Output capacity must cover the conversion ratio plus filter
        // transients.
        let headroom = (f_ratio.ceil() as usize + 2).max(3);
        Ok(StreamResampler {
            resampler: Box::new(resampler),
            channels,
            chunk_in_frames,
            pending: Vec::new(),
            out_buf: vec![0.0; channels * chunk_in_frames * headroom],
        })
    }

    /// Feed decoded samples; returns whatever full chunks converted to.
    pub fn push(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.pending.extend_from_slice(samples);

        let mut produced = Vec::new();
        while self.pending.len() / self.channels >= self.chunk_in_frames {
            let take = self.chunk_in_frames * self.channels;
            let chunk: Vec<f32> = self.pending.drain(..take).collect();
            let n = self.process_chunk(&chunk, self.chunk_in_frames, None)?;
            produced.extend_from_slice(&self.out_buf[..n]);
        }
        Ok(produced)
    }

    /// Convert the remaining partial chunk at end of stream.
    pub fn finish(&mut self) -> Result<Vec<f32>> {
        let frames = self.pending.len() / self.channels;
        if frames == 0 {
            return Ok(Vec::new());
        }
        let tail: Vec<f32> = self.pending.drain(..).collect();
        let n = self.process_chunk(&tail, frames, Some(frames))?;
        Ok(self.out_buf[..n].to_vec())
    }

    fn process_chunk(
        &mut self,
        input: &[f32],
        frames: usize,
        partial_len: Option<usize>,
    ) -> Result<usize> {
        let input_adapter = InterleavedSlice::new(input, self.channels, frames)
            .map_err(|e| anyhow!("interleaved slice (input): {e}"))?;

        let out_capacity_frames = self.out_buf.len() / self.channels;
        let mut output_adapter =
            InterleavedSlice::new_mut(&mut self.out_buf, self.channels, out_capacity_frames)
                .map_err(|e| anyhow!("interleaved slice (output): {e}"))?;

        let indexing = Indexing {
            input_offset: 0,
            output_offset: 0,
            active_channels_mask: None,
            partial_len,
        };

        let (_nbr_in, nbr_out) = self
            .resampler
            .process_into_buffer(&input_adapter, &mut output_adapter, Some(&indexing))
            .map_err(|e| anyhow!("resampler process: {e}"))?;

        Ok(nbr_out * self.channels)
    }
}
