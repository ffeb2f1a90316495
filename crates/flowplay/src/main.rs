//! flowplay: a small CLI media player built on the frameflow pipeline.
//!
//! ## Pipeline
//! 1. **Demux**: a background stage reads packets with Symphonia and
//!    routes the audio stream into a bounded packet queue.
//! 2. **Pull playback**: the CPAL output callback pulls samples on
//!    demand; each refill dequeues one packet, decodes it, and resamples
//!    inline to the device rate when needed.
//! 3. **Event loop**: a refresh timer drives the status line; Ctrl-C
//!    posts a quit event. Every stage is joined before exit.
//!
//! ## Modes
//! - `play`: play a local file.
//! - `probe`: print stream information and exit.

mod cli;
mod decode;
mod device;
mod input;
mod playback;
mod resample;
mod status;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::unbounded;
use frameflow_core::config::PipelineConfig;
use frameflow_core::queue::BlockingQueue;
use frameflow_core::session::{SessionState, StageSet};
use frameflow_core::sink::{PacketPullSink, RefreshEvent, RefreshTimer};
use frameflow_core::demux::{PacketRouter, spawn_demux};
use frameflow_types::PlaybackEndReason;
use tracing_subscriber::EnvFilter;

use crate::input::MediaPacket;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,flowplay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let host = cpal::default_host();

    if args.list_devices {
        device::list_devices(&host)?;
        return Ok(());
    }

    match &args.cmd {
        cli::Command::Probe { path } => probe(path),
        cli::Command::Play { path } => play(&host, &args, path),
    }
}

/// Print stream information for a local file.
fn probe(path: &Path) -> Result<()> {
    let opened = input::open_input(path)?;
    println!("{}: {} track(s)", path.display(), opened.tracks.len());
    for track in &opened.tracks {
        let codec = track.codec.as_deref().unwrap_or("unknown");
        let rate = track
            .sample_rate
            .map(|r| format!("{r} Hz"))
            .unwrap_or_else(|| "-".to_string());
        let channels = track
            .channels
            .map(|c| format!("{c} ch"))
            .unwrap_or_else(|| "-".to_string());
        let duration = track
            .duration_ms
            .map(status::format_hms)
            .unwrap_or_else(|| "-".to_string());
        println!("#{}: {codec}, {rate}, {channels}, {duration}", track.stream_index);
    }
    Ok(())
}

/// Play one local file to completion (or Ctrl-C).
fn play(host: &cpal::Host, args: &cli::Args, path: &Path) -> Result<()> {
    let opened = input::open_input(path)?;
    let audio = opened
        .audio
        .ok_or_else(|| anyhow!("No audio track in {path:?}"))?;

    let device = device::pick_device(host, args.device.as_deref())?;
    tracing::info!(device = %device.description()?, "output device");

    let config = device::pick_output_config(&device, Some(audio.rate))?;
    let mut stream_config: cpal::StreamConfig = config.clone().into();
    if let Some(buf) = device::pick_buffer_size(&config) {
        stream_config.buffer_size = buf;
    }
    let output_rate = stream_config.sample_rate;
    tracing::info!(
        source_rate_hz = audio.rate,
        output_rate_hz = output_rate,
        channels = audio.channels,
        buffer_size = ?stream_config.buffer_size,
        "device output config"
    );

    let pipeline = PipelineConfig {
        packet_queue_capacity: args.packet_queue_capacity,
        enqueue_patience: Duration::from_millis(args.enqueue_patience_ms),
        ..Default::default()
    };

    // One bounded packet queue between the demux stage and the pull path.
    let packets: Arc<BlockingQueue<MediaPacket>> =
        Arc::new(BlockingQueue::new(pipeline.packet_queue_capacity));

    let session = SessionState::shared();
    let mut router = PacketRouter::new();
    router.route(audio.stream_index, packets.clone());

    let mut stages = StageSet::new();
    stages.push(spawn_demux(
        opened.source,
        router,
        session.clone(),
        pipeline.enqueue_patience,
    )?);

    let decoder = decode::SymphoniaDecoder::new(
        &audio.codec_params,
        audio.channels,
        audio.rate,
        output_rate,
        args.chunk_frames,
    )?;
    let sink = PacketPullSink::new(packets.clone(), decoder);

    let shared = playback::PlaybackShared::new();
    let stream = playback::build_output_stream(
        &device,
        &stream_config,
        config.sample_format(),
        sink,
        audio.channels,
        shared.clone(),
    )?;
    stream.play().context("start output stream")?;

    let state = status::PlayerStatusState::shared();
    {
        let mut s = state.lock().unwrap();
        s.now_playing = Some(path.display().to_string());
        s.device = device.description().ok().map(|d| d.to_string());
        s.sample_rate = Some(audio.rate);
        s.output_rate = (audio.rate != output_rate).then_some(output_rate);
        s.channels = Some(audio.channels as u16);
        s.duration_ms = audio.duration_ms;
        s.source_codec = audio.info.codec.clone();
        s.source_bit_depth = audio.info.bit_depth;
        s.played_frames = Some(shared.played_frames.clone());
        s.underrun_frames = Some(shared.underrun_frames.clone());
        s.underrun_events = Some(shared.underrun_events.clone());
        s.decode_errors = Some(shared.decode_errors.clone());
        s.packet_queue_capacity = Some(packets.capacity() as u64);
    }

    // Single event queue observed by the main loop: refresh ticks from
    // the timer, quit from Ctrl-C.
    let (tx, rx) = unbounded();
    let tx_ctrlc = tx.clone();
    let _ = ctrlc::set_handler(move || {
        let _ = tx_ctrlc.send(RefreshEvent::Quit);
    });
    let timer = RefreshTimer::spawn(Duration::from_millis(args.refresh_ms.max(1)), tx);

    let mut end_reason = PlaybackEndReason::Eof;
    loop {
        match rx.recv() {
            Ok(RefreshEvent::Tick) => {
                {
                    let mut s = state.lock().unwrap();
                    s.queued_packets = Some(packets.len() as u64);
                    s.queued_bytes = Some(packets.byte_len() as u64);
                }
                print_status_line(&state.lock().unwrap());
                if shared.is_finished() {
                    break;
                }
            }
            Ok(RefreshEvent::Quit) | Err(_) => {
                end_reason = PlaybackEndReason::Stopped;
                break;
            }
        }
    }
    println!();

    // Teardown: stop the timer, cancel the demuxer, and release a
    // callback that may be waiting on the queue before dropping the
    // stream, then join every stage.
    timer.stop();
    session.cancel();
    packets.finish();
    packets.clear();
    drop(stream);

    let failures = stages.shutdown();
    if !failures.is_empty() && end_reason == PlaybackEndReason::Eof {
        end_reason = PlaybackEndReason::Error;
    }

    let snapshot = {
        let mut s = state.lock().unwrap();
        s.end_reason = Some(end_reason);
        s.snapshot()
    };
    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        tracing::info!(
            elapsed_ms = snapshot.elapsed_ms,
            underrun_events = snapshot.underrun_events,
            decode_errors = snapshot.decode_errors,
            end_reason = ?end_reason,
            "playback finished"
        );
    }

    Ok(())
}

/// Render the one-line progress display.
fn print_status_line(state: &status::PlayerStatusState) {
    use std::io::Write;

    let elapsed = state
        .elapsed_ms()
        .map(status::format_hms)
        .unwrap_or_else(|| "0:00".to_string());
    let duration = state
        .duration_ms
        .map(status::format_hms)
        .unwrap_or_else(|| "?".to_string());
    let queued = state.queued_packets.unwrap_or(0);
    let capacity = state.packet_queue_capacity.unwrap_or(0);
    let underruns = state
        .underrun_events
        .as_ref()
        .map(|v| v.load(Ordering::Relaxed))
        .unwrap_or(0);

    print!("\r{elapsed} / {duration}  queue {queued}/{capacity} pkts  underruns {underruns}   ");
    let _ = std::io::stdout().flush();
}
