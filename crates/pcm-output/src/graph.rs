//! Graph planning, linking and the streaming thread.
//!
//! A graph is linked in one pass by [`build`]. Every stage comes from the
//! [`StageFactory`] as a `Result`; optional stages that are unavailable are skipped
//! with a warning, required ones abort the build before anything is started. Nothing is
//! ever left half-linked: the streaming thread is only spawned once every stage exists
//! and the sink is open.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use pcm_types::{StreamFormat, SupportedFormat};
use thiserror::Error;

use crate::config::OutputConfig;
use crate::format::{SampleEncoding, pick_output_format};
use crate::queue::{BufferQueue, FlowReturn, QueueItem, QueueLimit};
use crate::sink::{AudioSink, SinkControl, SinkSpec};
use crate::source::AppSource;
use crate::stages::equalizer::EqualizerBank;
use crate::stages::volume::VolumeControl;
use crate::stages::{AudioBlock, Stage, StageContext, StageError, StageFactory, StageKind};
use crate::timeline::BufferTiming;

static NEXT_GRAPH_ID: AtomicU64 = AtomicU64::new(1);

/// What a graph has to deliver, decided before any stage is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GraphPlan {
    pub format: StreamFormat,
    /// Encoding the source declares initially.
    pub encoding: SampleEncoding,
    pub output_rate: u32,
    pub output_bit_depth: u16,
    /// Device format chosen by negotiation, if negotiation took place.
    pub negotiated: Option<SupportedFormat>,
}

impl GraphPlan {
    /// Deliver the stream's own rate and depth.
    pub fn native(format: StreamFormat, encoding: SampleEncoding) -> Self {
        Self {
            format,
            encoding,
            output_rate: format.sample_rate,
            output_bit_depth: format.bit_depth,
            negotiated: None,
        }
    }

    /// Negotiate against the device formats when an explicit sink was given.
    pub fn negotiate(
        format: StreamFormat,
        encoding: SampleEncoding,
        explicit_sink: bool,
        supported: &[SupportedFormat],
    ) -> Self {
        let mut plan = Self::native(format, encoding);
        if !explicit_sink {
            return plan;
        }
        if let Some(chosen) = pick_output_format(format.sample_rate, supported) {
            pcm_types::verbose!(
                stream_rate = format.sample_rate,
                stream_depth = format.bit_depth,
                output_rate = chosen.sample_rate,
                output_depth = chosen.bit_depth,
                candidates = supported.len(),
                "negotiated output format"
            );
            plan.output_rate = chosen.sample_rate;
            plan.output_bit_depth = chosen.bit_depth;
            plan.negotiated = Some(chosen);
        }
        plan
    }

    pub fn needs_resample(&self) -> bool {
        self.output_rate != self.format.sample_rate
    }

    pub fn needs_format_fix(&self) -> bool {
        self.negotiated.is_some()
            && (self.output_rate, self.output_bit_depth)
                != (self.format.sample_rate, self.format.bit_depth)
    }
}

/// Why a graph could not be built.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Unavailable(#[from] StageError),
    #[error("no sample encoding for {0}")]
    Encoding(StreamFormat),
    #[error("failed to spawn streaming thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A linked, running graph.
///
/// Dropping it stops the streaming thread and closes the sink.
pub struct Graph {
    id: u64,
    plan: GraphPlan,
    topology: Vec<StageKind>,
    source: AppSource,
    sink_name: String,
    control: Arc<SinkControl>,
    volume: Option<Arc<VolumeControl>>,
    equalizer: Option<Arc<EqualizerBank>>,
    worker: Option<JoinHandle<()>>,
}

impl Graph {
    /// Process-unique identity of this instance.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn plan(&self) -> &GraphPlan {
        &self.plan
    }

    /// Linked stages, source first.
    pub fn topology(&self) -> &[StageKind] {
        &self.topology
    }

    pub fn has_stage(&self, kind: StageKind) -> bool {
        self.topology.contains(&kind)
    }

    pub fn sink_name(&self) -> &str {
        &self.sink_name
    }

    pub fn source_encoding(&self) -> SampleEncoding {
        self.source.encoding()
    }

    pub fn set_source_encoding(&mut self, encoding: SampleEncoding) {
        if self.source.encoding() != encoding {
            tracing::info!(
                graph_id = self.id,
                from = %self.source.encoding(),
                to = %encoding,
                "source caps updated"
            );
            self.source.set_encoding(encoding);
        }
    }

    pub fn push(&self, data: Vec<u8>, timing: BufferTiming) -> FlowReturn {
        self.source.push(data, timing)
    }

    /// Drop queued audio and reset every stage. The graph stays linked.
    pub fn flush(&self) {
        self.source.queue().flush();
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    pub fn resume(&self) {
        self.control.set_paused(false);
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    /// Volume handle, if a volume stage is linked.
    pub fn volume(&self) -> Option<&Arc<VolumeControl>> {
        self.volume.as_ref()
    }

    /// Band slots, if an equalizer stage is linked.
    pub fn equalizer(&self) -> Option<&Arc<EqualizerBank>> {
        self.equalizer.as_ref()
    }

    fn shutdown(&mut self) {
        self.control.begin_close();
        self.source.queue().close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!(graph_id = self.id, "streaming thread panicked");
            }
        }
    }
}

impl Drop for Graph {
    fn drop(&mut self) {
        self.shutdown();
        tracing::debug!(graph_id = self.id, "graph torn down");
    }
}

fn optional_stage(
    factory: &dyn StageFactory,
    kind: StageKind,
    ctx: &StageContext<'_>,
    stages: &mut Vec<Box<dyn Stage>>,
) -> bool {
    match factory.stage(kind, ctx) {
        Ok(stage) => {
            stages.push(stage);
            true
        }
        Err(e) => {
            tracing::warn!("{e}; continuing without it");
            false
        }
    }
}

/// Link a graph for `plan`, or fail without leaving anything running.
///
/// `sink` is the already-resolved sink; an `Err` there fails the build like any other
/// required stage.
pub fn build(
    factory: &dyn StageFactory,
    plan: GraphPlan,
    sink: Result<Box<dyn AudioSink>, StageError>,
    config: &OutputConfig,
) -> Result<Graph, BuildError> {
    let id = NEXT_GRAPH_ID.fetch_add(1, Ordering::Relaxed);
    let mut topology = vec![StageKind::Source];

    let limit = match factory.buffer(config) {
        Ok(limit) => {
            topology.push(StageKind::Buffer);
            limit
        }
        Err(e) => {
            tracing::warn!("{e}; using a single-buffer hand-off");
            QueueLimit::Buffers(1)
        }
    };
    let queue = Arc::new(BufferQueue::new(limit));
    let source = factory
        .source(&plan, queue.clone())?
        .with_push_timeout(config.push_timeout());

    let volume = Arc::new(VolumeControl::new(1.0, false));
    let equalizer = Arc::new(EqualizerBank::new());
    let ctx = StageContext {
        plan: &plan,
        config,
        volume: &volume,
        equalizer: &equalizer,
    };

    let mut stages: Vec<Box<dyn Stage>> = Vec::new();
    stages.push(factory.stage(StageKind::Convert, &ctx)?);

    let has_volume = optional_stage(factory, StageKind::Volume, &ctx, &mut stages);
    let has_eq = optional_stage(factory, StageKind::Equalizer, &ctx, &mut stages);
    if plan.needs_resample() && has_eq {
        optional_stage(factory, StageKind::PostConvert, &ctx, &mut stages);
    }
    if plan.needs_resample() {
        stages.push(factory.stage(StageKind::Resample, &ctx)?);
    }
    if plan.needs_format_fix() {
        stages.push(factory.stage(StageKind::FormatFix, &ctx)?);
    }
    topology.extend(stages.iter().map(|s| s.kind()));

    let mut sink = sink?;
    let sink_name = sink.name();
    let control = Arc::new(SinkControl::default());
    let spec = SinkSpec {
        sample_rate: plan.output_rate,
        bit_depth: plan.output_bit_depth,
        channels: plan.format.channels,
    };
    sink.open(spec, control.clone())
        .map_err(|e| StageError::unavailable(StageKind::Sink, format!("{sink_name}: {e:#}")))?;
    topology.push(StageKind::Sink);

    let worker_queue = queue.clone();
    let worker = thread::Builder::new()
        .name(format!("pcm-graph-{id}"))
        .spawn(move || run_stream(id, &worker_queue, stages, sink))?;

    let names: Vec<&str> = topology.iter().map(|k| k.name()).collect();
    pcm_types::verbose!(
        graph_id = id,
        format = %plan.format,
        encoding = %plan.encoding,
        output_rate = plan.output_rate,
        output_depth = plan.output_bit_depth,
        sink = %sink_name,
        topology = %names.join(" ! "),
        "graph linked"
    );

    Ok(Graph {
        id,
        plan,
        topology,
        source,
        sink_name,
        control,
        volume: has_volume.then_some(volume),
        equalizer: has_eq.then_some(equalizer),
        worker: Some(worker),
    })
}

/// Streaming thread body: pull buffers, run the chain, hand samples to the sink.
fn run_stream(
    id: u64,
    queue: &BufferQueue,
    mut stages: Vec<Box<dyn Stage>>,
    mut sink: Box<dyn AudioSink>,
) {
    tracing::debug!(graph_id = id, "streaming thread started");
    while let Some(item) = queue.pop() {
        let buf = match item {
            QueueItem::Flush => {
                stages.iter_mut().for_each(|s| s.flush());
                sink.flush();
                tracing::debug!(graph_id = id, "graph flushed");
                continue;
            }
            QueueItem::Buffer(buf) => buf,
        };

        let mut block = AudioBlock::from_raw(buf);
        let pts_ns = block.timing.pts_ns;
        let failed = stages
            .iter_mut()
            .find_map(|s| s.process(&mut block).err().map(|e| (s.kind(), e)));
        if let Some((kind, e)) = failed {
            tracing::warn!(graph_id = id, stage = %kind, "stage error, buffer dropped");
            pcm_types::verbose!(graph_id = id, stage = %kind, pts_ns, "stage error detail: {e:#}");
            continue;
        }
        if block.samples.is_empty() {
            continue;
        }
        if let Err(e) = sink.write(&block.samples) {
            tracing::warn!(graph_id = id, "sink write failed: {e:#}");
        }
    }
    sink.close();
    tracing::debug!(graph_id = id, "streaming thread stopped");
}
