//! The output target: what the manager asks about the device before building a graph.

use pcm_types::SupportedFormat;

use crate::config::OutputConfig;
use crate::device::{device_name, pick_device, supported_formats};
use crate::playback::CpalSink;
use crate::sink::AudioSink;
use crate::stages::{StageError, StageKind};

/// Device-side collaborator of the graph manager.
pub trait OutputTarget: Send + Sync {
    /// (rate, depth) pairs the selected output accepts. Empty when unknown.
    fn supported_formats(&self) -> Vec<SupportedFormat>;

    /// Sink for the selected output, or `None` when it cannot be resolved.
    fn create_sink(&self) -> Option<Box<dyn AudioSink>>;

    /// Sink for the system default output.
    fn default_sink(&self) -> Result<Box<dyn AudioSink>, StageError>;
}

/// Output through CPAL, on a named device or the host default.
#[derive(Clone, Debug)]
pub struct CpalOutput {
    device: Option<String>,
    config: OutputConfig,
}

impl CpalOutput {
    pub fn new(device: Option<String>, config: OutputConfig) -> Self {
        Self { device, config }
    }

    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }
}

impl OutputTarget for CpalOutput {
    fn supported_formats(&self) -> Vec<SupportedFormat> {
        let host = cpal::default_host();
        let formats = pick_device(&host, self.device.as_deref()).and_then(|d| supported_formats(&d));
        match formats {
            Ok(formats) => {
                pcm_types::verbose!(count = formats.len(), "probed output formats");
                formats
            }
            Err(e) => {
                tracing::warn!("output format probe failed: {e:#}");
                Vec::new()
            }
        }
    }

    fn create_sink(&self) -> Option<Box<dyn AudioSink>> {
        let host = cpal::default_host();
        match pick_device(&host, self.device.as_deref()) {
            Ok(d) => {
                // Pin the resolved name so a hot-plugged default does not move the stream.
                let name = device_name(&d).or_else(|| self.device.clone());
                Some(Box::new(CpalSink::new(name, &self.config)))
            }
            Err(e) => {
                tracing::warn!("no output sink: {e:#}");
                None
            }
        }
    }

    fn default_sink(&self) -> Result<Box<dyn AudioSink>, StageError> {
        let host = cpal::default_host();
        pick_device(&host, None)
            .map_err(|e| StageError::unavailable(StageKind::Sink, format!("{e:#}")))?;
        Ok(Box::new(CpalSink::new(None, &self.config)))
    }
}
