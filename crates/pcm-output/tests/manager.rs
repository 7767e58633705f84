mod support;

use std::sync::Arc;

use pcm_output::config::OutputConfig;
use pcm_output::graph::BuildError;
use pcm_output::manager::{GraphManager, PushOutcome};
use pcm_output::stages::{NativeStages, StageKind};
use pcm_types::{EqBandConfig, GraphState, SupportedFormat};

use support::{CollectingSink, FakeTarget, fmt, s16_bytes, wait_for};

fn manager_with(target: Arc<FakeTarget>, factory: NativeStages) -> GraphManager {
    GraphManager::new(Arc::new(factory), target, OutputConfig::default())
}

fn manager(target: Arc<FakeTarget>) -> GraphManager {
    manager_with(target, NativeStages::new())
}

fn explicit_sink(target: &FakeTarget) -> Option<Box<dyn pcm_output::sink::AudioSink>> {
    Some(Box::new(CollectingSink::new("explicit", target.recorded.clone())))
}

#[test]
fn starts_uninitialized_with_default_volume() {
    let m = manager(Arc::new(FakeTarget::new(vec![])));
    assert_eq!(m.state(), GraphState::Uninitialized);
    assert!(!m.is_active());
    assert!((m.volume() - 0.65).abs() < 1e-9);
    let eq = m.eq_state();
    assert!(!eq.enabled);
    assert_eq!(eq.num_bands, 10);
}

#[test]
fn create_with_same_format_keeps_graph_instance() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager(target.clone());
    m.create(fmt(48_000, 16, 2), None, 0.5, false).unwrap();
    let id = m.graph_id().unwrap();

    m.pause();
    m.create(fmt(48_000, 16, 2), None, 0.8, true).unwrap();
    assert_eq!(m.graph_id(), Some(id));
    assert!((m.volume() - 0.8).abs() < 1e-9);
    assert!(m.is_muted());
    assert!(!m.status().paused);
    assert_eq!(target.recorded.lock().unwrap().specs.len(), 1);
}

#[test]
fn create_with_new_format_rebuilds() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager(target);
    m.create(fmt(48_000, 16, 2), None, 0.5, false).unwrap();
    let first = m.graph_id().unwrap();
    m.create(fmt(44_100, 24, 2), None, 0.5, false).unwrap();
    assert_ne!(m.graph_id(), Some(first));
    assert_eq!(m.format(), Some(fmt(44_100, 24, 2)));
}

#[test]
fn missing_required_stage_fails_closed() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager_with(target.clone(), NativeStages::new().disable(StageKind::Convert));
    let err = m.create(fmt(48_000, 16, 2), None, 0.5, false).unwrap_err();
    assert!(matches!(err, BuildError::Unavailable(e) if e.stage() == StageKind::Convert));
    assert_eq!(m.state(), GraphState::Uninitialized);
    assert!(m.graph_id().is_none());
    // The sink was never opened.
    assert!(target.recorded.lock().unwrap().specs.is_empty());
}

#[test]
fn missing_resampler_fails_only_when_rates_differ() {
    let target = Arc::new(FakeTarget::new(vec![SupportedFormat::new(48_000, 16)]));
    let mut m = manager_with(target.clone(), NativeStages::new().disable(StageKind::Resample));
    assert!(m.create(fmt(44_100, 16, 2), explicit_sink(&target), 1.0, false).is_err());
    assert_eq!(m.state(), GraphState::Uninitialized);
    m.create(fmt(48_000, 16, 2), explicit_sink(&target), 1.0, false).unwrap();
    assert!(m.is_active());
}

#[test]
fn missing_optional_stage_is_skipped() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager_with(target, NativeStages::new().disable(StageKind::Equalizer));
    m.create(fmt(48_000, 16, 2), None, 0.5, false).unwrap();
    assert_eq!(m.state(), GraphState::Active);
    assert!(!m.has_stage(StageKind::Equalizer));
    assert!(m.has_stage(StageKind::Source));
    assert!(m.has_stage(StageKind::Volume));
    assert!(m.has_stage(StageKind::Sink));

    // Stored even without a live stage.
    m.configure_bands(2, &[EqBandConfig::new(100.0, 50.0, 3.0)]);
    assert_eq!(m.eq_state().band_configs.len(), 1);
}

#[test]
fn missing_buffer_falls_back_to_handoff() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager_with(target, NativeStages::new().disable(StageKind::Buffer));
    m.create(fmt(48_000, 16, 2), None, 0.5, false).unwrap();
    assert!(!m.has_stage(StageKind::Buffer));
    assert!(m.has_stage(StageKind::Convert));

    m.destroy();
    assert!(!m.has_stage(StageKind::Source));
}

#[test]
fn sink_open_failure_fails_closed() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager(target.clone());
    let sink = Box::new(CollectingSink::failing("broken", target.recorded.clone()));
    let err = m.create(fmt(48_000, 16, 2), Some(sink), 0.5, false).unwrap_err();
    assert!(matches!(err, BuildError::Unavailable(e) if e.stage() == StageKind::Sink));
    assert_eq!(m.state(), GraphState::Uninitialized);
}

#[test]
fn no_default_sink_fails_closed() {
    let mut target = FakeTarget::new(vec![]);
    target.has_default = false;
    let mut m = manager(Arc::new(target));
    assert!(m.create(fmt(48_000, 16, 2), None, 0.5, false).is_err());
    assert!(!m.is_active());
}

#[test]
fn explicit_sink_negotiates_output_format() {
    let target = Arc::new(FakeTarget::new(vec![
        SupportedFormat::new(48_000, 16),
        SupportedFormat::new(96_000, 32),
    ]));
    let mut m = manager(target.clone());
    m.create(fmt(44_100, 24, 2), explicit_sink(&target), 1.0, false).unwrap();

    let status = m.status();
    assert_eq!(status.output_rate, Some(48_000));
    assert_eq!(status.output_bit_depth, Some(16));
    assert!(status.resampling);
    let topology: Vec<&str> = status.topology.iter().map(String::as_str).collect();
    assert_eq!(
        topology,
        [
            "source",
            "buffer",
            "convert",
            "volume",
            "equalizer",
            "post_convert",
            "resample",
            "format_fix",
            "sink"
        ]
    );
    let spec = target.recorded.lock().unwrap().specs[0];
    assert_eq!((spec.sample_rate, spec.bit_depth, spec.channels), (48_000, 16, 2));
}

#[test]
fn default_sink_keeps_native_format() {
    let target = Arc::new(FakeTarget::new(vec![SupportedFormat::new(48_000, 16)]));
    let mut m = manager(target.clone());
    m.create(fmt(44_100, 24, 2), None, 1.0, false).unwrap();
    let status = m.status();
    assert_eq!(status.output_rate, Some(44_100));
    assert!(!status.resampling);
    assert_eq!(status.sink.as_deref(), Some("default"));
    assert_eq!(target.recorded.lock().unwrap().opened_by, vec!["default"]);
}

#[test]
fn destroy_keeps_volume_and_equalizer() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager(target);
    m.create(fmt(48_000, 16, 2), None, 0.3, true).unwrap();
    let bands = vec![EqBandConfig::new(100.0, 70.0, 3.0)];
    m.configure_bands(3, &bands);
    m.set_eq_enabled(true);

    m.destroy();
    assert_eq!(m.state(), GraphState::Destroyed);
    assert!(m.graph_id().is_none());
    assert!((m.volume() - 0.3).abs() < 1e-9);
    assert!(m.is_muted());
    assert_eq!(m.eq_state().band_configs, bands);
    assert!(m.eq_state().enabled);

    // Idempotent.
    m.destroy();
    assert_eq!(m.state(), GraphState::Destroyed);

    m.create(fmt(48_000, 16, 2), None, 0.3, true).unwrap();
    assert_eq!(m.state(), GraphState::Active);
}

#[test]
fn volume_is_clamped() {
    let mut m = manager(Arc::new(FakeTarget::new(vec![])));
    m.set_volume(4.0);
    assert_eq!(m.volume(), 1.0);
    m.set_volume(-0.5);
    assert_eq!(m.volume(), 0.0);
}

#[test]
fn push_without_graph_is_inactive() {
    let mut m = manager(Arc::new(FakeTarget::new(vec![])));
    let f = fmt(48_000, 16, 2);
    assert_eq!(m.push_chunk(0, vec![0; 8], &f), PushOutcome::Inactive);
}

#[test]
fn pushed_audio_reaches_sink() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager(target.clone());
    let f = fmt(48_000, 16, 2);
    m.create(f, None, 1.0, false).unwrap();

    let outcome = m.push_chunk(1_000, s16_bytes(&[16_384, -16_384, 8_192, 0]), &f);
    assert_eq!(outcome, PushOutcome::Queued);
    wait_for(&target.recorded, "samples", |r| r.samples.len() >= 4);
    assert_eq!(target.recorded.lock().unwrap().samples, vec![0.5, -0.5, 0.25, 0.0]);
    assert_eq!(m.status().chunks_pushed, 1);
}

#[test]
fn misaligned_chunk_is_dropped() {
    let mut m = manager(Arc::new(FakeTarget::new(vec![])));
    let f = fmt(48_000, 16, 2);
    m.create(f, None, 1.0, false).unwrap();
    assert_eq!(m.push_chunk(0, vec![0; 6], &f), PushOutcome::Dropped);
    assert_eq!(m.status().chunks_dropped, 1);
    assert!(m.is_active());
}

#[test]
fn padded_24_bit_chunk_switches_source_encoding() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager(target.clone());
    let f = fmt(48_000, 24, 2);
    m.create(f, None, 1.0, false).unwrap();
    assert_eq!(m.status().source_encoding.as_deref(), Some("S24LE"));

    // Two 4-byte-container frames: 0.5 left, silence right.
    let chunk = vec![0x00, 0x00, 0x40, 0x00, 0, 0, 0, 0, 0x00, 0x00, 0x40, 0x00, 0, 0, 0, 0];
    assert_eq!(m.push_chunk(0, chunk, &f), PushOutcome::Queued);
    let status = m.status();
    assert_eq!(status.source_encoding.as_deref(), Some("S24_32LE"));
    assert_eq!(status.width_switches, 1);

    wait_for(&target.recorded, "samples", |r| r.samples.len() >= 4);
    assert_eq!(target.recorded.lock().unwrap().samples, vec![0.5, 0.0, 0.5, 0.0]);

    // Teardown forgets the container width.
    m.destroy();
    m.create(f, None, 1.0, false).unwrap();
    assert_eq!(m.status().source_encoding.as_deref(), Some("S24LE"));
}

#[test]
fn flush_reaches_stages_and_sink() {
    let target = Arc::new(FakeTarget::new(vec![]));
    let mut m = manager(target.clone());
    m.create(fmt(48_000, 16, 2), None, 1.0, false).unwrap();
    m.flush();
    wait_for(&target.recorded, "flush", |r| r.flushes == 1);
    assert!(m.is_active());

    // Flushing with no graph is a no-op.
    m.destroy();
    m.flush();
    wait_for(&target.recorded, "close", |r| r.closes == 1);
}

#[test]
fn equalizer_round_trip_through_manager() {
    let mut m = manager(Arc::new(FakeTarget::new(vec![])));
    m.create(fmt(48_000, 16, 2), None, 1.0, false).unwrap();
    let cfgs = vec![
        EqBandConfig::new(60.0, 40.0, 4.0),
        EqBandConfig::new(1_000.0, 500.0, -3.0),
        EqBandConfig::new(10_000.0, 5_000.0, 2.5),
    ];
    m.configure_bands(3, &cfgs);
    m.set_eq_enabled(false);
    m.set_eq_enabled(true);
    assert_eq!(m.eq_state().band_configs, cfgs);
    assert!(m.status().eq_enabled);
}
