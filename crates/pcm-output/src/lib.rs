//! Real-time PCM output pipeline.
//!
//! A network stream announces its format, then delivers raw PCM chunks. The
//! [`manager::GraphManager`] links a processing graph for that format (source, buffering,
//! conversion, volume, equalizer, resampling, format fix-up, sink), keeps chunk timestamps
//! monotonic and repairs 24-bit container mismatches on the fly. The
//! [`controller`] module serializes all of that behind one thread.

pub mod config;
pub mod controller;
pub mod device;
pub mod equalizer;
pub mod format;
pub mod graph;
pub mod manager;
pub mod output;
pub mod playback;
pub mod queue;
pub mod sink;
pub mod source;
pub mod stages;
pub mod timeline;
pub mod width;
