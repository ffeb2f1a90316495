//! Pipeline tuning parameters.

use std::time::Duration;

/// Queue sizing and backpressure knobs shared by the pipeline stages.
#[derive(Clone, Copy, Debug)]
pub struct PipelineConfig {
    /// Capacity, in packets, of each per-stream packet queue.
    pub packet_queue_capacity: usize,
    /// Capacity, in frames, of each decoded-frame queue.
    pub frame_queue_capacity: usize,
    /// How long a producer stage waits for queue space before dropping the
    /// element with a warning.
    pub enqueue_patience: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            packet_queue_capacity: 512,
            frame_queue_capacity: 16,
            enqueue_patience: Duration::from_millis(500),
        }
    }
}
