//! TCP ingest: `pcm-proto` frames in, controller commands out.

use std::io::{self, BufReader};
use std::net::{TcpListener, TcpStream};

use anyhow::{Context, Result, bail};
use pcm_output::controller::{ControlCommand, ControllerHandle};
use pcm_proto::FrameKind;
use pcm_types::StreamFormat;

/// Decoding state for one connection.
#[derive(Debug, Default)]
pub struct Session {
    /// Format of the stream in progress.
    pub format: Option<StreamFormat>,
    pub chunks: u64,
}

impl Session {
    /// Translate one frame. `Ok(None)` means the frame needs no command.
    pub fn frame_command(&mut self, kind: FrameKind, payload: &[u8]) -> io::Result<Option<ControlCommand>> {
        let cmd = match kind {
            FrameKind::StreamStart => {
                let format = pcm_proto::decode_stream_start(payload)?;
                self.format = Some(format);
                self.chunks = 0;
                ControlCommand::StreamStart { format }
            }
            FrameKind::AudioChunk => {
                let Some(format) = self.format else {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "AUDIO_CHUNK before STREAM_START",
                    ));
                };
                let (ts_us, pcm) = pcm_proto::decode_audio_chunk(payload)?;
                self.chunks += 1;
                ControlCommand::Chunk {
                    ts_us,
                    data: pcm.to_vec(),
                    format,
                }
            }
            FrameKind::StreamEnd => {
                if let Some(format) = self.format.take() {
                    tracing::info!(%format, chunks = self.chunks, "stream finished");
                }
                ControlCommand::StreamEnd
            }
            FrameKind::StreamClear => ControlCommand::StreamClear,
            FrameKind::Pause => ControlCommand::Pause,
            FrameKind::Resume => ControlCommand::Resume,
            FrameKind::SetVolume => ControlCommand::SetVolume(f64::from(pcm_proto::decode_volume(payload)?)),
            FrameKind::SetMute => ControlCommand::SetMuted(pcm_proto::decode_mute(payload)?),
            FrameKind::Error => {
                tracing::warn!(message = %String::from_utf8_lossy(payload), "sender reported error");
                return Ok(None);
            }
        };
        Ok(Some(cmd))
    }
}

/// Accept clients forever, serving one at a time.
pub fn accept_loop(listener: TcpListener, handle: ControllerHandle) {
    loop {
        let stream = match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "client connected");
                stream
            }
            Err(e) => {
                tracing::warn!("accept error: {e}");
                continue;
            }
        };
        if let Err(e) = serve_client(stream, &handle) {
            tracing::warn!("client session error: {e:#}");
        }
        if handle.status().is_none() {
            tracing::info!("controller stopped; no longer accepting clients");
            return;
        }
        tracing::info!("client disconnected; ready for next connection");
    }
}

/// Forward frames from one client until it disconnects. A stream the client leaves open is
/// ended on its behalf.
pub fn serve_client(stream: TcpStream, handle: &ControllerHandle) -> Result<()> {
    let _ = stream.set_nodelay(true);
    let mut reader = BufReader::new(stream);
    pcm_proto::read_prelude(&mut reader).context("read prelude")?;

    let mut session = Session::default();
    let result = pump_frames(&mut reader, &mut session, handle);
    if session.format.take().is_some() {
        handle.send(ControlCommand::StreamEnd);
    }
    result
}

fn pump_frames(reader: &mut BufReader<TcpStream>, session: &mut Session, handle: &ControllerHandle) -> Result<()> {
    loop {
        let (kind, payload) = match pcm_proto::read_frame(&mut *reader) {
            Ok(frame) => frame,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e).context("read frame"),
        };
        match session.frame_command(kind, &payload) {
            Ok(Some(cmd)) => {
                if !handle.send(cmd) {
                    bail!("controller stopped");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(?kind, "dropping frame: {e}"),
        }
    }
}
