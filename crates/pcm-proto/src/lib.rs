//! Framed PCM stream protocol between a sender and `pcm-bridge`.
//!
//! One TCP connection carries any number of streams. Each stream is announced with a
//! `STREAM_START` frame carrying its format, followed by timestamped `AUDIO_CHUNK` frames
//! and terminated by `STREAM_END`. Control frames may be interleaved at any point.
//!
//! Frame format:
//! - magic: 4 bytes "PCMS" (once, at connection start)
//! - version: u16 LE (once, at connection start)
//! - then repeated frames:
//!   - kind: u8
//!   - len: u32 LE
//!   - payload: [u8; len]

use std::io::{self, Read, Write};

use pcm_types::StreamFormat;

pub const MAGIC: [u8; 4] = *b"PCMS";
pub const VERSION: u16 = 1;

/// Largest payload a receiver will allocate for a single frame.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// New stream; payload is the stream format.
    StreamStart = 0x10,
    /// Timestamped PCM bytes for the current stream.
    AudioChunk = 0x11,
    /// Stream finished; the receiver may tear its graph down after a grace period.
    StreamEnd = 0x12,
    /// Discard buffered audio (seek).
    StreamClear = 0x13,

    Pause = 0x20,
    Resume = 0x21,
    /// Payload: f32 LE in `[0, 1]`.
    SetVolume = 0x22,
    /// Payload: u8 (0/1).
    SetMute = 0x23,

    Error = 0x7F,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> io::Result<Self> {
        let k = match b {
            0x10 => FrameKind::StreamStart,
            0x11 => FrameKind::AudioChunk,
            0x12 => FrameKind::StreamEnd,
            0x13 => FrameKind::StreamClear,
            0x20 => FrameKind::Pause,
            0x21 => FrameKind::Resume,
            0x22 => FrameKind::SetVolume,
            0x23 => FrameKind::SetMute,
            0x7F => FrameKind::Error,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown frame kind {b:#x}"),
                ));
            }
        };
        Ok(k)
    }
}

/// Connection prelude: magic + version.
pub fn write_prelude(mut w: impl Write) -> io::Result<()> {
    w.write_all(&MAGIC)?;
    w.write_all(&VERSION.to_le_bytes())?;
    Ok(())
}

/// Read and validate the connection prelude.
pub fn read_prelude(mut r: impl Read) -> io::Result<()> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic"));
    }

    let mut ver = [0u8; 2];
    r.read_exact(&mut ver)?;
    let version = u16::from_le_bytes(ver);
    if version != VERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unsupported version {version}"),
        ));
    }

    Ok(())
}

/// Write a frame header + payload.
pub fn write_frame(mut w: impl Write, kind: FrameKind, payload: &[u8]) -> io::Result<()> {
    let frame = encode_frame(kind, payload)?;
    w.write_all(&frame)?;
    Ok(())
}

/// Encode a frame into a single buffer (header + payload).
pub fn encode_frame(kind: FrameKind, payload: &[u8]) -> io::Result<Vec<u8>> {
    let len: u32 = payload
        .len()
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload too large"))?;

    let mut out = Vec::with_capacity(1 + 4 + payload.len());
    out.push(kind as u8);
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

/// Read a frame header and return `(kind, len)`.
pub fn read_frame_header(mut r: impl Read) -> io::Result<(FrameKind, u32)> {
    let mut kindb = [0u8; 1];
    r.read_exact(&mut kindb)?;
    let kind = FrameKind::from_u8(kindb[0])?;

    let mut lenb = [0u8; 4];
    r.read_exact(&mut lenb)?;
    let len = u32::from_le_bytes(lenb);
    Ok((kind, len))
}

/// Read one whole frame, rejecting payloads above [`MAX_PAYLOAD_LEN`].
pub fn read_frame(mut r: impl Read) -> io::Result<(FrameKind, Vec<u8>)> {
    let (kind, len) = read_frame_header(&mut r)?;
    if len > MAX_PAYLOAD_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame payload too large: {len}"),
        ));
    }
    let mut payload = vec![0u8; len as usize];
    r.read_exact(&mut payload)?;
    Ok((kind, payload))
}

/// Encode `STREAM_START` payload:
/// - sample_rate: u32 LE
/// - bit_depth:   u16 LE
/// - channels:    u16 LE
pub fn encode_stream_start(format: &StreamFormat) -> Vec<u8> {
    let mut out = Vec::with_capacity(8);
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&format.bit_depth.to_le_bytes());
    out.extend_from_slice(&format.channels.to_le_bytes());
    out
}

/// Decode and validate a `STREAM_START` payload.
pub fn decode_stream_start(payload: &[u8]) -> io::Result<StreamFormat> {
    if payload.len() != 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad STREAM_START length"));
    }
    let rate = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let depth = u16::from_le_bytes([payload[4], payload[5]]);
    let channels = u16::from_le_bytes([payload[6], payload[7]]);
    StreamFormat::new(rate, depth, channels)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Encode `AUDIO_CHUNK` payload: `i64 LE` capture timestamp (µs), then raw PCM bytes.
pub fn encode_audio_chunk(ts_us: i64, pcm: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + pcm.len());
    out.extend_from_slice(&ts_us.to_le_bytes());
    out.extend_from_slice(pcm);
    out
}

/// Decode `AUDIO_CHUNK` payload into `(ts_us, pcm)`.
pub fn decode_audio_chunk(payload: &[u8]) -> io::Result<(i64, &[u8])> {
    if payload.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short AUDIO_CHUNK"));
    }
    let (head, pcm) = payload.split_at(8);
    let mut ts = [0u8; 8];
    ts.copy_from_slice(head);
    Ok((i64::from_le_bytes(ts), pcm))
}

pub fn encode_volume(volume: f32) -> Vec<u8> {
    volume.to_le_bytes().to_vec()
}

/// Decode `SET_VOLUME` payload. Non-finite values are rejected.
pub fn decode_volume(payload: &[u8]) -> io::Result<f32> {
    let bytes: [u8; 4] = payload
        .try_into()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad SET_VOLUME length"))?;
    let v = f32::from_le_bytes(bytes);
    if !v.is_finite() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "volume not finite"));
    }
    Ok(v)
}

pub fn encode_mute(muted: bool) -> Vec<u8> {
    vec![u8::from(muted)]
}

pub fn decode_mute(payload: &[u8]) -> io::Result<bool> {
    match payload {
        [b] => Ok(*b != 0),
        _ => Err(io::Error::new(io::ErrorKind::InvalidData, "bad SET_MUTE length")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn prelude_roundtrip_ok() {
        let mut buf = Vec::new();
        write_prelude(&mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        read_prelude(&mut cur).unwrap();
    }

    #[test]
    fn prelude_rejects_bad_magic() {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"ABRD");
        buf.extend_from_slice(&VERSION.to_le_bytes());
        let err = read_prelude(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn prelude_rejects_bad_version() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC);
        buf.extend_from_slice(&(VERSION + 1).to_le_bytes());
        let err = read_prelude(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_frame_kind_is_invalid_data() {
        let err = FrameKind::from_u8(0x99).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_frame_returns_kind_and_payload() {
        let mut buf = Vec::new();
        write_frame(&mut buf, FrameKind::StreamClear, b"").unwrap();
        write_frame(&mut buf, FrameKind::SetMute, &encode_mute(true)).unwrap();
        let mut cur = Cursor::new(buf);

        let (kind, payload) = read_frame(&mut cur).unwrap();
        assert_eq!(kind, FrameKind::StreamClear);
        assert!(payload.is_empty());

        let (kind, payload) = read_frame(&mut cur).unwrap();
        assert_eq!(kind, FrameKind::SetMute);
        assert!(decode_mute(&payload).unwrap());
    }

    #[test]
    fn read_frame_rejects_oversized_payload() {
        let mut buf = vec![FrameKind::AudioChunk as u8];
        buf.extend_from_slice(&(MAX_PAYLOAD_LEN + 1).to_le_bytes());
        let err = read_frame(Cursor::new(buf)).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn stream_start_validates_format() {
        let format = StreamFormat::new(96_000, 24, 2).unwrap();
        let payload = encode_stream_start(&format);
        assert_eq!(decode_stream_start(&payload).unwrap(), format);

        let mut bad = payload.clone();
        bad[4..6].copy_from_slice(&12u16.to_le_bytes());
        let err = decode_stream_start(&bad).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        assert!(decode_stream_start(&payload[..7]).is_err());
    }

    #[test]
    fn audio_chunk_keeps_negative_timestamps_and_bytes() {
        let payload = encode_audio_chunk(-42, &[1, 2, 3, 4]);
        let (ts, pcm) = decode_audio_chunk(&payload).unwrap();
        assert_eq!(ts, -42);
        assert_eq!(pcm, &[1, 2, 3, 4]);
    }

    #[test]
    fn audio_chunk_rejects_short_payload() {
        let err = decode_audio_chunk(&[0u8; 7]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn volume_rejects_nan_and_bad_len() {
        assert_eq!(decode_volume(&encode_volume(0.5)).unwrap(), 0.5);
        assert!(decode_volume(&f32::NAN.to_le_bytes()).is_err());
        assert!(decode_volume(&[0u8; 3]).is_err());
    }

    #[test]
    fn mute_rejects_bad_len() {
        assert!(!decode_mute(&encode_mute(false)).unwrap());
        assert!(decode_mute(&[]).is_err());
        assert!(decode_mute(&[1, 1]).is_err());
    }
}
