//! Output controller: one thread owns the [`GraphManager`].
//!
//! Stream events, chunks and settings arrive as [`ControlCommand`]s over a channel, so
//! every graph mutation is serialized. Teardown after a stream ends is debounced by a
//! [`DelayedAction`]; new chunks or a new stream cancel it.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use pcm_types::{BandTarget, EqBandConfig, EqualizerState, PipelineStatus, StreamFormat};

use crate::manager::GraphManager;
use crate::output::OutputTarget;

/// Commands accepted by the controller thread.
#[derive(Debug)]
pub enum ControlCommand {
    StreamStart {
        format: StreamFormat,
    },
    Chunk {
        ts_us: i64,
        data: Vec<u8>,
        format: StreamFormat,
    },
    StreamEnd,
    StreamClear,
    Pause,
    Resume,
    SetVolume(f64),
    SetMuted(bool),
    ConfigureEq {
        num_bands: usize,
        configs: Vec<EqBandConfig>,
    },
    SetEqEnabled(bool),
    Destroy,
    Status {
        reply: Sender<PipelineStatus>,
    },
    EqState {
        reply: Sender<EqualizerState>,
    },
    Shutdown,
}

/// A cancelable deadline.
///
/// Scheduling again replaces the previous deadline, so a stale timer can never fire.
#[derive(Clone, Copy, Debug, Default)]
pub struct DelayedAction {
    deadline: Option<Instant>,
}

impl DelayedAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Cancel the pending action. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Channel that fires at the deadline, or never when nothing is scheduled.
    pub fn timer(&self) -> Receiver<Instant> {
        match self.deadline {
            Some(at) => crossbeam_channel::at(at),
            None => crossbeam_channel::never(),
        }
    }
}

/// Handle for sending commands to the controller thread.
#[derive(Clone)]
pub struct ControllerHandle {
    pub cmd_tx: Sender<ControlCommand>,
}

impl ControllerHandle {
    /// Queue `cmd`. Returns `false` once the controller has stopped.
    pub fn send(&self, cmd: ControlCommand) -> bool {
        self.cmd_tx.send(cmd).is_ok()
    }

    pub fn status(&self) -> Option<PipelineStatus> {
        let (reply, rx) = bounded(1);
        if !self.send(ControlCommand::Status { reply }) {
            return None;
        }
        rx.recv().ok()
    }

    pub fn eq_state(&self) -> Option<EqualizerState> {
        let (reply, rx) = bounded(1);
        if !self.send(ControlCommand::EqState { reply }) {
            return None;
        }
        rx.recv().ok()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ControlCommand::Shutdown);
    }
}

impl BandTarget for ControllerHandle {
    fn configure_bands(&mut self, num_bands: usize, configs: &[EqBandConfig]) {
        self.send(ControlCommand::ConfigureEq {
            num_bands,
            configs: configs.to_vec(),
        });
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.send(ControlCommand::SetEqEnabled(enabled));
    }
}

/// Spawn the controller thread. It runs until `Shutdown` or until every handle is dropped,
/// then destroys the graph.
pub fn spawn_controller(
    manager: GraphManager,
    target: Arc<dyn OutputTarget>,
) -> std::io::Result<(ControllerHandle, JoinHandle<()>)> {
    let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
    let join = std::thread::Builder::new()
        .name("pcm-controller".to_string())
        .spawn(move || controller_main(manager, target, cmd_rx))?;
    Ok((ControllerHandle { cmd_tx }, join))
}

struct Controller {
    manager: GraphManager,
    target: Arc<dyn OutputTarget>,
    grace: Duration,
    teardown: DelayedAction,
    /// Format whose graph failed to build; chunks do not retry it until the next stream start.
    failed: Option<StreamFormat>,
}

fn controller_main(manager: GraphManager, target: Arc<dyn OutputTarget>, cmd_rx: Receiver<ControlCommand>) {
    let grace = manager.config().teardown_grace();
    let mut ctl = Controller {
        manager,
        target,
        grace,
        teardown: DelayedAction::new(),
        failed: None,
    };

    loop {
        let timer = ctl.teardown.timer();
        select! {
            recv(cmd_rx) -> msg => {
                let Ok(cmd) = msg else { break };
                if !ctl.handle(cmd) {
                    break;
                }
            }
            recv(timer) -> _ => {
                ctl.teardown.cancel();
                tracing::info!("no stream within grace window; tearing down output graph");
                ctl.manager.destroy();
            }
        }
    }

    ctl.manager.destroy();
    tracing::debug!("controller stopped");
}

impl Controller {
    fn start(&mut self, format: StreamFormat) {
        let sink = self.target.create_sink();
        let volume = self.manager.volume();
        let muted = self.manager.is_muted();
        match self.manager.create(format, sink, volume, muted) {
            Ok(()) => self.failed = None,
            Err(_) => self.failed = Some(format),
        }
    }

    fn handle(&mut self, cmd: ControlCommand) -> bool {
        match cmd {
            ControlCommand::StreamStart { format } => {
                tracing::info!(%format, "stream start");
                self.teardown.cancel();
                self.failed = None;
                self.manager.reset_stream_timing();
                self.start(format);
            }
            ControlCommand::Chunk { ts_us, data, format } => {
                self.teardown.cancel();
                let stale = self.manager.format().is_some_and(|f| f != format);
                if (!self.manager.is_active() || stale) && self.failed != Some(format) {
                    self.start(format);
                }
                self.manager.push_chunk(ts_us, data, &format);
            }
            ControlCommand::StreamEnd => {
                tracing::info!(grace_ms = self.grace.as_millis() as u64, "stream end");
                self.manager.flush();
                if self.manager.is_active() {
                    self.teardown.schedule(self.grace);
                }
            }
            ControlCommand::StreamClear => {
                self.manager.flush();
            }
            ControlCommand::Pause => {
                self.manager.pause();
            }
            ControlCommand::Resume => {
                self.manager.resume();
            }
            ControlCommand::SetVolume(v) => self.manager.set_volume(v),
            ControlCommand::SetMuted(m) => self.manager.set_muted(m),
            ControlCommand::ConfigureEq { num_bands, configs } => {
                self.manager.configure_bands(num_bands, &configs);
            }
            ControlCommand::SetEqEnabled(enabled) => self.manager.set_eq_enabled(enabled),
            ControlCommand::Destroy => {
                self.teardown.cancel();
                self.manager.destroy();
            }
            ControlCommand::Status { reply } => {
                let mut status = self.manager.status();
                status.teardown_pending = self.teardown.is_pending();
                let _ = reply.send(status);
            }
            ControlCommand::EqState { reply } => {
                let _ = reply.send(self.manager.eq_state());
            }
            ControlCommand::Shutdown => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_action_schedule_and_cancel() {
        let mut action = DelayedAction::new();
        assert!(!action.is_pending());
        assert!(!action.cancel());
        action.schedule(Duration::from_secs(60));
        assert!(action.is_pending());
        assert!(action.cancel());
        assert!(!action.is_pending());
    }

    #[test]
    fn rescheduling_replaces_deadline() {
        let mut action = DelayedAction::new();
        action.schedule(Duration::from_secs(60));
        let first = action.deadline().unwrap();
        action.schedule(Duration::from_millis(1));
        assert!(action.deadline().unwrap() < first);
    }

    #[test]
    fn timer_fires_only_when_scheduled() {
        let mut action = DelayedAction::new();
        assert!(action.timer().recv_timeout(Duration::from_millis(20)).is_err());
        action.schedule(Duration::from_millis(5));
        assert!(action.timer().recv_timeout(Duration::from_secs(2)).is_ok());
    }
}
