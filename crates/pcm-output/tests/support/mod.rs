//! In-memory output target and sink for driving the manager without a sound card.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use pcm_output::output::OutputTarget;
use pcm_output::sink::{AudioSink, SinkControl, SinkSpec};
use pcm_output::stages::{StageError, StageKind};
use pcm_types::{StreamFormat, SupportedFormat};

/// What every sink created by a [`FakeTarget`] recorded.
#[derive(Debug, Default)]
pub struct Recorded {
    pub samples: Vec<f32>,
    pub specs: Vec<SinkSpec>,
    pub opened_by: Vec<String>,
    pub flushes: usize,
    pub closes: usize,
}

pub type Shared = Arc<Mutex<Recorded>>;

pub struct CollectingSink {
    name: String,
    fail_open: bool,
    recorded: Shared,
}

impl CollectingSink {
    pub fn new(name: &str, recorded: Shared) -> Self {
        Self {
            name: name.to_string(),
            fail_open: false,
            recorded,
        }
    }

    pub fn failing(name: &str, recorded: Shared) -> Self {
        Self {
            fail_open: true,
            ..Self::new(name, recorded)
        }
    }
}

impl AudioSink for CollectingSink {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn open(&mut self, spec: SinkSpec, _control: Arc<SinkControl>) -> Result<()> {
        if self.fail_open {
            return Err(anyhow!("device busy"));
        }
        let mut r = self.recorded.lock().unwrap();
        r.specs.push(spec);
        r.opened_by.push(self.name.clone());
        Ok(())
    }

    fn write(&mut self, samples: &[f32]) -> Result<()> {
        self.recorded.lock().unwrap().samples.extend_from_slice(samples);
        Ok(())
    }

    fn flush(&mut self) {
        self.recorded.lock().unwrap().flushes += 1;
    }

    fn close(&mut self) {
        self.recorded.lock().unwrap().closes += 1;
    }
}

pub struct FakeTarget {
    pub supported: Vec<SupportedFormat>,
    pub has_default: bool,
    pub recorded: Shared,
}

impl FakeTarget {
    pub fn new(supported: Vec<SupportedFormat>) -> Self {
        Self {
            supported,
            has_default: true,
            recorded: Shared::default(),
        }
    }
}

impl OutputTarget for FakeTarget {
    fn supported_formats(&self) -> Vec<SupportedFormat> {
        self.supported.clone()
    }

    fn create_sink(&self) -> Option<Box<dyn AudioSink>> {
        Some(Box::new(CollectingSink::new("explicit", self.recorded.clone())))
    }

    fn default_sink(&self) -> Result<Box<dyn AudioSink>, StageError> {
        if !self.has_default {
            return Err(StageError::unavailable(StageKind::Sink, "no default output"));
        }
        Ok(Box::new(CollectingSink::new("default", self.recorded.clone())))
    }
}

pub fn fmt(rate: u32, depth: u16, channels: u16) -> StreamFormat {
    StreamFormat::new(rate, depth, channels).unwrap()
}

/// Interleaved S16LE bytes for `samples`.
pub fn s16_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Wait until `cond` holds on the recorded state, or panic after two seconds.
pub fn wait_for(recorded: &Shared, what: &str, cond: impl Fn(&Recorded) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        if cond(&recorded.lock().unwrap()) {
            return;
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}
