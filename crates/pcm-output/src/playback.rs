//! CPAL sink.
//!
//! The graph's streaming thread writes interleaved `f32` into a bounded [`SharedAudio`]
//! queue; a CPAL output stream drains it from the real-time callback. The stream lives on
//! its own thread because `cpal::Stream` is not `Send` on every host.
//!
//! The callback:
//! - outputs silence without draining the queue while paused
//! - refills a small local buffer from the shared queue without blocking
//! - applies basic channel mapping (mono↔stereo, best-effort otherwise)
//! - converts `f32` samples to the device sample format

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cpal::traits::{DeviceTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender, bounded};

use crate::config::OutputConfig;
use crate::device::{device_name, pick_buffer_size, pick_device, pick_output_config};
use crate::queue::{SharedAudio, calc_max_buffered_samples};
use crate::sink::{AudioSink, SinkControl, SinkSpec};

const WRITE_WAIT: Duration = Duration::from_millis(100);

/// Plays graph output on a CPAL device (`None` = host default).
pub struct CpalSink {
    device: Option<String>,
    refill_max_frames: usize,
    buffer_seconds: f32,
    queue: Option<Arc<SharedAudio>>,
    control: Option<Arc<SinkControl>>,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(device: Option<String>, config: &OutputConfig) -> Self {
        Self {
            device,
            refill_max_frames: config.refill_max_frames,
            buffer_seconds: config.sink_buffer_seconds,
            queue: None,
            control: None,
            stop_tx: None,
            thread: None,
        }
    }
}

impl AudioSink for CpalSink {
    fn name(&self) -> String {
        match &self.device {
            Some(d) => format!("cpal:{d}"),
            None => "cpal:default".to_string(),
        }
    }

    fn open(&mut self, spec: SinkSpec, control: Arc<SinkControl>) -> Result<()> {
        let channels = usize::from(spec.channels);
        let max_samples = calc_max_buffered_samples(spec.sample_rate, channels, self.buffer_seconds);
        let queue = Arc::new(SharedAudio::new(channels, max_samples));

        let (ready_tx, ready_rx) = bounded::<Result<()>>(1);
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let device = self.device.clone();
        let refill_max_frames = self.refill_max_frames;
        let queue_thread = queue.clone();
        let control_thread = control.clone();

        let handle = thread::Builder::new()
            .name("pcm-cpal-out".to_string())
            .spawn(move || {
                run_output(
                    device,
                    spec,
                    refill_max_frames,
                    queue_thread,
                    control_thread,
                    ready_tx,
                    stop_rx,
                )
            })
            .context("spawn output thread")?;

        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(anyhow!("output thread exited before the stream started"));
            }
        }

        tracing::debug!(
            sink = %self.name(),
            capacity_frames = queue.max_frames(),
            "output stream started"
        );
        self.queue = Some(queue);
        self.control = Some(control);
        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        let (Some(queue), Some(control)) = (&self.queue, &self.control) else {
            return Err(anyhow!("sink not open"));
        };
        let mut offset = 0;
        while offset < samples.len() {
            if control.is_closing() || queue.is_done() {
                return Ok(());
            }
            offset += queue.push_interleaved_timeout(&samples[offset..], WRITE_WAIT);
        }
        Ok(())
    }

    fn flush(&mut self) {
        if let Some(queue) = &self.queue {
            queue.clear();
        }
    }

    fn close(&mut self) {
        if let Some(queue) = self.queue.take() {
            let pending = queue.len_frames();
            if pending > 0 {
                tracing::debug!(pending_frames = pending, "closing output with unplayed audio");
            }
            queue.close();
        }
        // Dropping the sender wakes the output thread, which drops the stream.
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                tracing::warn!("output thread panicked");
            }
        }
        self.control = None;
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_output(
    device: Option<String>,
    spec: SinkSpec,
    refill_max_frames: usize,
    queue: Arc<SharedAudio>,
    control: Arc<SinkControl>,
    ready_tx: Sender<Result<()>>,
    stop_rx: Receiver<()>,
) {
    let stream = match start_stream(device.as_deref(), spec, refill_max_frames, &queue, &control) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    let _ = ready_tx.send(Ok(()));
    // Blocks until the sink closes.
    let _ = stop_rx.recv();
    drop(stream);
    tracing::debug!("output stream stopped");
}

fn start_stream(
    device: Option<&str>,
    spec: SinkSpec,
    refill_max_frames: usize,
    queue: &Arc<SharedAudio>,
    control: &Arc<SinkControl>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = pick_device(&host, device)?;
    let supported = pick_output_config(&device, spec.sample_rate, spec.bit_depth)?;
    let sample_format = supported.sample_format();
    let mut config: cpal::StreamConfig = supported.config();
    if let Some(size) = pick_buffer_size(&supported) {
        config.buffer_size = size;
    }

    tracing::info!(
        device = %device_name(&device).unwrap_or_default(),
        rate_hz = config.sample_rate,
        channels = config.channels,
        format = ?sample_format,
        "opening output stream"
    );

    let stream = build_output_stream(&device, &config, sample_format, queue, control, refill_max_frames)?;
    stream.play().context("start output stream")?;
    Ok(stream)
}

/// Build a CPAL output stream that plays audio from `queue`.
///
/// `queue` must contain **interleaved `f32` samples** already at the device sample rate.
/// Underruns are filled with zeros (silence).
pub fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SharedAudio>,
    control: &Arc<SinkControl>,
    refill_max_frames: usize,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, control, refill_max_frames),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, control, refill_max_frames),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, control, refill_max_frames),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, control, refill_max_frames),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SharedAudio>,
    control: &Arc<SinkControl>,
    refill_max_frames: usize,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let channels_out = usize::from(config.channels).max(1);
    let mut st = PlaybackState {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    };
    let refill_max_frames = refill_max_frames.max(1);
    let queue_cb = queue.clone();
    let control_cb = control.clone();
    let silence = <T as cpal::Sample>::from_sample::<f32>(0.0);

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if control_cb.is_paused() {
                data.fill(silence);
                return;
            }

            let frames = data.len() / channels_out;
            for frame in 0..frames {
                if st.pos >= st.src.len() {
                    st.pos = 0;
                    st.src.clear();
                    match queue_cb.try_pop(refill_max_frames) {
                        Some(v) => st.src = v,
                        None => {
                            data[frame * channels_out..].fill(silence);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = next_sample_mapped(&mut st, channels_out, ch);
                    data[frame * channels_out + ch] = <T as cpal::Sample>::from_sample::<f32>(sample);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

/// Local buffer of interleaved samples fetched from [`SharedAudio`], so the callback
/// does not lock the queue per frame.
struct PlaybackState {
    pos: usize,
    src_channels: usize,
    src: Vec<f32>,
}

/// Read one output sample for `dst_ch`, applying a simple channel mapping.
///
/// - mono → stereo: duplicate channel 0
/// - stereo → mono: average L/R
/// - other layouts: clamp to the available channels
///
/// `st.pos` advances once per destination frame (after the last channel).
fn next_sample_mapped(st: &mut PlaybackState, dst_channels: usize, dst_ch: usize) -> f32 {
    if st.pos >= st.src.len() {
        return 0.0;
    }

    let frame_start = st.pos;
    let get_src = |ch: usize, st: &PlaybackState| -> f32 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0.0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => 0.5 * (get_src(0, st) + get_src(1, st)),
        (1, _) => get_src(0, st),
        _ => get_src(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(src_channels: usize, src: Vec<f32>) -> PlaybackState {
        PlaybackState {
            pos: 0,
            src_channels,
            src,
        }
    }

    fn render(st: &mut PlaybackState, dst_channels: usize, frames: usize) -> Vec<f32> {
        let mut out = Vec::new();
        for _ in 0..frames {
            for ch in 0..dst_channels {
                out.push(next_sample_mapped(st, dst_channels, ch));
            }
        }
        out
    }

    #[test]
    fn mono_is_duplicated_to_stereo() {
        let mut st = state(1, vec![0.1, 0.2]);
        assert_eq!(render(&mut st, 2, 2), vec![0.1, 0.1, 0.2, 0.2]);
    }

    #[test]
    fn stereo_is_averaged_to_mono() {
        let mut st = state(2, vec![0.2, 0.4, -1.0, 1.0]);
        let out = render(&mut st, 1, 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn extra_output_channels_repeat_last_source_channel() {
        let mut st = state(2, vec![0.1, 0.2]);
        assert_eq!(render(&mut st, 4, 1), vec![0.1, 0.2, 0.2, 0.2]);
    }

    #[test]
    fn exhausted_buffer_yields_silence() {
        let mut st = state(2, vec![0.5, 0.5]);
        assert_eq!(render(&mut st, 2, 2), vec![0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn unopened_sink_rejects_writes() {
        let mut sink = CpalSink::new(Some("nowhere".into()), &OutputConfig::default());
        assert_eq!(sink.name(), "cpal:nowhere");
        assert!(sink.write(&[0.0; 4]).is_err());
        sink.close();
    }
}
