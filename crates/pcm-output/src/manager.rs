//! Processing graph manager.
//!
//! Owns at most one [`Graph`] and the state that outlives it: volume, mute and the
//! equalizer configuration, which are reapplied to every new graph.
//!
//! The manager takes `&mut self` for every mutation and does no locking of its own. It
//! is meant to be owned by a single control thread; see [`crate::controller`] for the
//! actor that provides that.

use std::sync::Arc;

use pcm_types::{BandTarget, EqBandConfig, EqualizerState, GraphState, PipelineStatus, StreamFormat};

use crate::config::OutputConfig;
use crate::equalizer::EqualizerController;
use crate::graph::{self, BuildError, Graph, GraphPlan};
use crate::output::OutputTarget;
use crate::queue::FlowReturn;
use crate::sink::AudioSink;
use crate::stages::{StageFactory, StageKind};
use crate::timeline::TimestampSequencer;
use crate::width::{SampleWidthDetector, WidthDecision};

/// What happened to a submitted chunk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Accepted by the source.
    Queued,
    /// No active graph.
    Inactive,
    /// Length fits no frame layout.
    Dropped,
    /// The source did not accept it in time.
    Rejected(FlowReturn),
}

#[derive(Clone, Copy, Debug, Default)]
struct Counters {
    chunks_pushed: u64,
    chunks_dropped: u64,
    push_failures: u64,
    width_switches: u64,
}

pub struct GraphManager {
    factory: Arc<dyn StageFactory>,
    target: Arc<dyn OutputTarget>,
    config: OutputConfig,
    state: GraphState,
    graph: Option<Graph>,
    width: SampleWidthDetector,
    timeline: TimestampSequencer,
    volume: f64,
    muted: bool,
    equalizer: EqualizerController,
    counters: Counters,
}

impl GraphManager {
    pub fn new(
        factory: Arc<dyn StageFactory>,
        target: Arc<dyn OutputTarget>,
        config: OutputConfig,
    ) -> Self {
        let volume = config.default_volume.clamp(0.0, 1.0);
        Self {
            factory,
            target,
            config,
            state: GraphState::Uninitialized,
            graph: None,
            width: SampleWidthDetector::new(),
            timeline: TimestampSequencer::new(),
            volume,
            muted: false,
            equalizer: EqualizerController::new(),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &OutputConfig {
        &self.config
    }

    pub fn state(&self) -> GraphState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == GraphState::Active && self.graph.is_some()
    }

    /// Identity of the live graph instance.
    pub fn graph_id(&self) -> Option<u64> {
        self.graph.as_ref().map(Graph::id)
    }

    /// Whether the live graph linked a `kind` stage.
    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.graph.as_ref().is_some_and(|g| g.has_stage(kind))
    }

    /// Format the live graph was built for.
    pub fn format(&self) -> Option<StreamFormat> {
        self.graph.as_ref().map(|g| g.plan().format)
    }

    /// Build (or reuse) a graph for `format`.
    ///
    /// An active graph for the same format is kept: it is resumed and gets the new
    /// volume and mute. Anything else tears the old graph down and links a new one; on
    /// failure the manager is left `Uninitialized` and the caller may retry.
    pub fn create(
        &mut self,
        format: StreamFormat,
        sink: Option<Box<dyn AudioSink>>,
        volume: f64,
        muted: bool,
    ) -> Result<(), BuildError> {
        if self.is_active() && self.format() == Some(format) {
            tracing::debug!(%format, "graph already active for format; resuming");
            self.resume();
            self.set_volume(volume);
            self.set_muted(muted);
            return Ok(());
        }

        self.destroy();
        self.store_volume(volume);
        self.muted = muted;

        let graph = match self.link(format, sink) {
            Ok(graph) => graph,
            Err(e) => {
                self.state = GraphState::Uninitialized;
                tracing::error!(%format, "graph construction failed: {e}");
                return Err(e);
            }
        };
        let plan = *graph.plan();

        if let Some(vol) = graph.volume() {
            vol.set_volume(self.volume as f32);
            vol.set_muted(self.muted);
        } else if self.volume < 1.0 || self.muted {
            tracing::warn!("no volume stage; volume and mute are not applied");
        }
        if let Some(bank) = graph.equalizer() {
            self.equalizer.attach(bank.clone());
        }

        tracing::info!(
            graph_id = graph.id(),
            %format,
            output_rate = plan.output_rate,
            output_depth = plan.output_bit_depth,
            sink = graph.sink_name(),
            "output graph active"
        );
        self.graph = Some(graph);
        self.state = GraphState::Active;
        self.timeline.flush();
        Ok(())
    }

    fn link(&self, format: StreamFormat, sink: Option<Box<dyn AudioSink>>) -> Result<Graph, BuildError> {
        let encoding = self
            .width
            .encoding(&format)
            .ok_or(BuildError::Encoding(format))?;
        let explicit_sink = sink.is_some();
        let supported = if explicit_sink {
            self.target.supported_formats()
        } else {
            Vec::new()
        };
        let plan = GraphPlan::negotiate(format, encoding, explicit_sink, &supported);
        let sink = match sink {
            Some(sink) => Ok(sink),
            None => self.target.default_sink(),
        };
        graph::build(self.factory.as_ref(), plan, sink, &self.config)
    }

    /// Tear down the live graph. Volume, mute and equalizer settings are kept.
    pub fn destroy(&mut self) {
        self.equalizer.detach();
        if let Some(graph) = self.graph.take() {
            let id = graph.id();
            drop(graph);
            self.state = GraphState::Destroyed;
            tracing::info!(graph_id = id, "output graph destroyed");
        }
        self.timeline.flush();
        self.width.reset();
    }

    /// Discard queued audio and restart the timeline. No-op for the graph when inactive.
    pub fn flush(&mut self) {
        if let Some(graph) = &self.graph {
            graph.flush();
        }
        self.timeline.flush();
    }

    /// Restart the timeline without touching the graph.
    pub fn reset_stream_timing(&mut self) {
        self.timeline.flush();
    }

    /// Submit one chunk captured at `ts_us`.
    ///
    /// Failures are logged and reported in the outcome; they never tear the graph down.
    pub fn push_chunk(&mut self, ts_us: i64, bytes: Vec<u8>, format: &StreamFormat) -> PushOutcome {
        let active = self.state == GraphState::Active;
        let Some(graph) = self.graph.as_mut().filter(|_| active) else {
            tracing::debug!(len = bytes.len(), "chunk ignored: no active graph");
            return PushOutcome::Inactive;
        };

        let frame_size = match self.width.inspect(format, bytes.len()) {
            WidthDecision::Accept { frame_size } => frame_size,
            WidthDecision::Switched { frame_size, encoding } => {
                self.counters.width_switches += 1;
                graph.set_source_encoding(encoding);
                frame_size
            }
            WidthDecision::Drop => {
                self.counters.chunks_dropped += 1;
                tracing::warn!(
                    len = bytes.len(),
                    frame_size = self.width.frame_size(format),
                    "chunk length is not a whole number of frames; dropped"
                );
                return PushOutcome::Dropped;
            }
        };

        let frames = (bytes.len() / frame_size) as u64;
        let timing = self.timeline.next(ts_us, frames, format.sample_rate);
        match graph.push(bytes, timing) {
            FlowReturn::Ok => {
                self.counters.chunks_pushed += 1;
                PushOutcome::Queued
            }
            flow => {
                self.counters.push_failures += 1;
                tracing::warn!(%flow, pts_ns = timing.pts_ns, "chunk submission failed");
                PushOutcome::Rejected(flow)
            }
        }
    }

    fn store_volume(&mut self, volume: f64) {
        self.volume = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
    }

    /// Store `volume` (clamped to `[0, 1]`) and apply it to the live graph.
    pub fn set_volume(&mut self, volume: f64) {
        self.store_volume(volume);
        if let Some(vol) = self.graph.as_ref().and_then(Graph::volume) {
            vol.set_volume(self.volume as f32);
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(vol) = self.graph.as_ref().and_then(Graph::volume) {
            vol.set_muted(muted);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn pause(&mut self) {
        if let Some(graph) = &self.graph {
            graph.pause();
        }
    }

    pub fn resume(&mut self) {
        if let Some(graph) = &self.graph {
            graph.resume();
        }
    }

    pub fn configure_bands(&mut self, num_bands: usize, configs: &[EqBandConfig]) {
        self.equalizer.configure_bands(num_bands, configs);
    }

    pub fn set_eq_enabled(&mut self, enabled: bool) {
        self.equalizer.set_enabled(enabled);
    }

    pub fn eq_state(&self) -> EqualizerState {
        self.equalizer.get_state()
    }

    pub fn status(&self) -> PipelineStatus {
        let eq = self.equalizer.get_state();
        let mut status = PipelineStatus {
            state: self.state,
            volume: self.volume,
            muted: self.muted,
            eq_enabled: eq.enabled,
            eq_num_bands: eq.num_bands,
            chunks_pushed: self.counters.chunks_pushed,
            chunks_dropped: self.counters.chunks_dropped,
            push_failures: self.counters.push_failures,
            width_switches: self.counters.width_switches,
            ..PipelineStatus::default()
        };
        if let Some(graph) = &self.graph {
            let plan = graph.plan();
            status.graph_id = Some(graph.id());
            status.stream_format = Some(plan.format);
            status.source_encoding = Some(graph.source_encoding().to_string());
            status.output_rate = Some(plan.output_rate);
            status.output_bit_depth = Some(plan.output_bit_depth);
            status.resampling = plan.needs_resample();
            status.topology = graph.topology().iter().map(|k| k.to_string()).collect();
            status.sink = Some(graph.sink_name().to_string());
            status.paused = graph.is_paused();
        }
        status
    }
}

impl BandTarget for GraphManager {
    fn configure_bands(&mut self, num_bands: usize, configs: &[EqBandConfig]) {
        GraphManager::configure_bands(self, num_bands, configs);
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.set_eq_enabled(enabled);
    }
}

impl Drop for GraphManager {
    fn drop(&mut self) {
        self.destroy();
    }
}
