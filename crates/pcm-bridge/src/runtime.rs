//! Bridge runtime: output pipeline startup, TCP listening and raw file playback.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::net::{SocketAddr, TcpListener};
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use eq_presets::{OpraPreset, PresetStore, ShelfHandling, apply_preset_by_name};
use pcm_output::controller::{ControlCommand, ControllerHandle, spawn_controller};
use pcm_output::manager::GraphManager;
use pcm_output::output::{CpalOutput, OutputTarget};
use pcm_output::stages::NativeStages;
use pcm_types::{BandTarget, StreamFormat};

use crate::cli::PlayRawArgs;
use crate::config::{EqualizerSection, Settings};
use crate::net;

/// How far ahead of real time `play-raw` submits chunks.
const PLAY_RAW_LEAD: Duration = Duration::from_millis(150);

/// Controller thread plus its handle. Dropping it stops the controller and tears the
/// graph down.
pub struct Pipeline {
    handle: ControllerHandle,
    join: Option<JoinHandle<()>>,
}

impl Pipeline {
    pub fn start(settings: &Settings, preset: Option<&str>) -> Result<Self> {
        let target: Arc<dyn OutputTarget> = Arc::new(CpalOutput::new(
            settings.device.clone(),
            settings.output.clone(),
        ));
        let stages = Arc::new(NativeStages::with_disabled(
            settings.output.disabled_stages.iter().copied(),
        ));
        let manager = GraphManager::new(stages, target.clone(), settings.output.clone());
        let (handle, join) = spawn_controller(manager, target).context("spawn output controller")?;
        let mut pipeline = Self {
            handle,
            join: Some(join),
        };

        let shelf = settings.presets.shelf_handling;
        let store_config = settings.presets.clone();
        apply_equalizer(&mut pipeline.handle, &settings.equalizer, preset, shelf, || {
            PresetStore::new(store_config).load(false)
        });
        Ok(pipeline)
    }

    pub fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    /// Stop the controller and wait for the graph to be torn down.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.handle.shutdown();
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("controller thread panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Load the configured band layout, then a preset (flag first, then config), then the
/// enabled flag. A preset that cannot be found is logged and skipped.
pub fn apply_equalizer(
    target: &mut impl BandTarget,
    eq: &EqualizerSection,
    preset: Option<&str>,
    shelf: ShelfHandling,
    load_presets: impl FnOnce() -> Arc<Vec<OpraPreset>>,
) {
    match (&eq.bands, eq.num_bands) {
        (Some(bands), num_bands) => target.configure_bands(num_bands.unwrap_or(bands.len()), bands),
        (None, Some(num_bands)) => target.configure_bands(num_bands, &[]),
        (None, None) => {}
    }
    if let Some(name) = preset.or(eq.preset.as_deref()) {
        let presets = load_presets();
        if apply_preset_by_name(&presets, name, shelf, target).is_none() {
            tracing::warn!(preset = name, available = presets.len(), "EQ preset not found; keeping configured bands");
        }
    }
    if let Some(enabled) = eq.enabled {
        target.set_enabled(enabled);
    }
}

fn install_stop_handler() -> Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })
    .context("install Ctrl-C handler")?;
    Ok(rx)
}

/// Block until Ctrl-C. Returns `false` if the handler's channel closed instead.
fn wait_for_stop(stop: &Receiver<()>) -> bool {
    match stop.recv() {
        Ok(()) => {
            tracing::info!("interrupted; shutting down");
            true
        }
        Err(_) => {
            tracing::warn!("stop handler disconnected; shutting down");
            false
        }
    }
}

/// Serve framed PCM clients until Ctrl-C.
pub fn run_listen(settings: &Settings, bind: SocketAddr, preset: Option<&str>) -> Result<()> {
    let listener = TcpListener::bind(bind).with_context(|| format!("bind {bind}"))?;
    let stop = install_stop_handler()?;
    let pipeline = Pipeline::start(settings, preset)?;
    tracing::info!(bind = %bind, "listening (one client at a time)");

    let handle = pipeline.handle().clone();
    std::thread::Builder::new()
        .name("pcm-listen".to_string())
        .spawn(move || net::accept_loop(listener, handle))
        .context("spawn listener thread")?;

    wait_for_stop(&stop);
    pipeline.shutdown();
    Ok(())
}

/// Maps frame counts to host-clock timestamps and submission deadlines.
#[derive(Clone, Copy, Debug)]
pub struct PacedClock {
    start: Instant,
    start_us: i64,
    rate: u32,
    lead: Duration,
}

impl PacedClock {
    pub fn new(rate: u32, lead: Duration) -> Self {
        let start_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self {
            start: Instant::now(),
            start_us,
            rate,
            lead,
        }
    }

    pub fn media_offset(&self, frames: u64) -> Duration {
        let nanos = u128::from(frames) * 1_000_000_000 / u128::from(self.rate.max(1));
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Capture timestamp (µs since the epoch) of the frame at `frames`.
    pub fn timestamp_us(&self, frames: u64) -> i64 {
        let offset = i64::try_from(self.media_offset(frames).as_micros()).unwrap_or(i64::MAX);
        self.start_us.saturating_add(offset)
    }

    /// When the chunk starting at `frames` should be submitted.
    pub fn due(&self, frames: u64) -> Instant {
        let at = self.start + self.media_offset(frames);
        at.checked_sub(self.lead).map_or(self.start, |t| t.max(self.start))
    }
}

/// Wait until `deadline`. Returns `true` if a stop was requested first.
fn stopped_before(stop: &Receiver<()>, deadline: Instant) -> bool {
    match stop.recv_deadline(deadline) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
            false
        }
    }
}

/// Bytes per chunk: whole frames covering `chunk_ms`, at least one frame.
pub fn chunk_bytes(format: &StreamFormat, chunk_ms: u32) -> usize {
    let frames = (u64::from(format.sample_rate) * u64::from(chunk_ms) / 1000).max(1);
    usize::try_from(frames).unwrap_or(usize::MAX / 64) * frame_bytes(format)
}

fn frame_bytes(format: &StreamFormat) -> usize {
    usize::from(format.channels) * format.packed_bytes_per_sample()
}

/// Fill `buf` from `r`, stopping early only at end of input.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Play raw interleaved PCM, paced to real time.
pub fn run_play_raw(settings: &Settings, raw: &PlayRawArgs) -> Result<()> {
    let format = StreamFormat::new(raw.rate, raw.bits, raw.channels).context("invalid stream format")?;
    let input: Box<dyn Read> = if raw.path == Path::new("-") {
        Box::new(io::stdin().lock())
    } else {
        Box::new(File::open(&raw.path).with_context(|| format!("open {:?}", raw.path))?)
    };
    let mut reader = BufReader::new(input);
    let stop = install_stop_handler()?;
    let pipeline = Pipeline::start(settings, raw.preset.as_deref())?;
    let handle = pipeline.handle().clone();

    tracing::info!(%format, path = ?raw.path, "playing raw PCM");
    handle.send(ControlCommand::StreamStart { format });

    let frame_len = frame_bytes(&format);
    let mut buf = vec![0u8; chunk_bytes(&format, raw.chunk_ms)];
    let clock = PacedClock::new(format.sample_rate, PLAY_RAW_LEAD);
    let mut frames_sent: u64 = 0;
    let mut interrupted = false;

    loop {
        if stopped_before(&stop, clock.due(frames_sent)) {
            interrupted = true;
            break;
        }
        let n = read_full(&mut reader, &mut buf).context("read PCM input")?;
        let whole = n - n % frame_len;
        if whole > 0 {
            let sent = handle.send(ControlCommand::Chunk {
                ts_us: clock.timestamp_us(frames_sent),
                data: buf[..whole].to_vec(),
                format,
            });
            if !sent {
                break;
            }
            frames_sent += (whole / frame_len) as u64;
        }
        if n < buf.len() {
            if n != whole {
                tracing::warn!(bytes = n - whole, "ignoring trailing partial frame");
            }
            break;
        }
    }

    if !interrupted {
        // Let queued audio reach the device; stream end flushes whatever is left.
        let sink_buffer = Duration::from_secs_f32(settings.output.sink_buffer_seconds.clamp(0.0, 60.0));
        let drained = clock.due(frames_sent) + PLAY_RAW_LEAD + sink_buffer;
        if !stopped_before(&stop, drained) {
            handle.send(ControlCommand::StreamEnd);
        }
    }
    if let Some(status) = handle.status() {
        tracing::info!(
            chunks = status.chunks_pushed,
            dropped = status.chunks_dropped,
            push_failures = status.push_failures,
            "playback finished"
        );
    }
    pipeline.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pcm_types::EqBandConfig;

    #[test]
    fn wait_for_stop_reports_signal_and_disconnect() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        tx.send(()).unwrap();
        assert!(wait_for_stop(&rx));
        drop(tx);
        assert!(!wait_for_stop(&rx));
    }

    #[derive(Default)]
    struct Recorder {
        calls: Vec<String>,
    }

    impl BandTarget for Recorder {
        fn configure_bands(&mut self, num_bands: usize, configs: &[EqBandConfig]) {
            self.calls.push(format!("configure {num_bands} {}", configs.len()));
        }

        fn set_enabled(&mut self, enabled: bool) {
            self.calls.push(format!("enabled {enabled}"));
        }
    }

    fn preset() -> OpraPreset {
        eq_presets::parse_records([r#"{"name":"Warm","filters":[{"frequency":200,"gain":2,"Q":1}]}"#])
            .remove(0)
    }

    #[test]
    fn equalizer_bands_then_preset_then_flag() {
        let eq = EqualizerSection {
            enabled: Some(false),
            num_bands: None,
            bands: Some(vec![EqBandConfig::new(100.0, 50.0, 1.0)]),
            preset: Some("warm".into()),
        };
        let mut target = Recorder::default();
        apply_equalizer(&mut target, &eq, None, ShelfHandling::Approximate, || Arc::new(vec![preset()]));
        assert_eq!(
            target.calls,
            ["configure 1 1", "configure 1 1", "enabled true", "enabled false"]
        );
    }

    #[test]
    fn missing_preset_keeps_bands_and_skips_loading_without_name() {
        let mut target = Recorder::default();
        let eq = EqualizerSection {
            num_bands: Some(5),
            ..EqualizerSection::default()
        };
        apply_equalizer(&mut target, &eq, None, ShelfHandling::Approximate, || {
            panic!("presets loaded without a preset name")
        });
        assert_eq!(target.calls, ["configure 5 0"]);

        let mut target = Recorder::default();
        apply_equalizer(&mut target, &EqualizerSection::default(), Some("nope"), ShelfHandling::Approximate, || {
            Arc::new(vec![preset()])
        });
        assert!(target.calls.is_empty());
    }

    #[test]
    fn chunk_bytes_cover_whole_frames() {
        let f = StreamFormat::new(48_000, 24, 2).unwrap();
        assert_eq!(chunk_bytes(&f, 20), 960 * 6);
        let f = StreamFormat::new(8_000, 16, 1).unwrap();
        assert_eq!(chunk_bytes(&f, 0), 2);
    }

    #[test]
    fn clock_timestamps_follow_frames() {
        let clock = PacedClock::new(48_000, Duration::from_millis(100));
        assert_eq!(clock.timestamp_us(48_000) - clock.timestamp_us(0), 1_000_000);
        assert_eq!(clock.media_offset(480), Duration::from_millis(10));
        assert_eq!(clock.due(0), clock.start);
        assert_eq!(clock.due(9_600), clock.start + Duration::from_millis(100));
    }

    #[test]
    fn read_full_stops_at_eof() {
        let mut src = io::Cursor::new(vec![1u8; 10]);
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 8);
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 0);
    }
}
