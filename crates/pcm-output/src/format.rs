//! Output format negotiation and PCM sample encodings.

use std::cmp::Reverse;

use pcm_types::SupportedFormat;

/// Pick the device format closest to `stream_rate`.
///
/// Minimizes `(|rate - stream_rate|, -bit_depth)`: the closest rate wins and, among
/// equally close rates, the deeper format wins. Returns `None` when `supported` is empty.
pub fn pick_output_format(stream_rate: u32, supported: &[SupportedFormat]) -> Option<SupportedFormat> {
    supported
        .iter()
        .copied()
        .min_by_key(|f| (f.sample_rate.abs_diff(stream_rate), Reverse(f.bit_depth)))
}

/// Little-endian interleaved integer PCM layouts the source understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleEncoding {
    S16Le,
    /// 24-bit samples packed in 3 bytes.
    S24Le,
    /// 24-bit samples in the low 3 bytes of a 4-byte container.
    S24In32Le,
    S32Le,
}

impl SampleEncoding {
    /// Encoding for a bit depth stored in `bytes_per_sample` bytes.
    pub fn for_depth(bit_depth: u16, bytes_per_sample: usize) -> Option<Self> {
        match (bit_depth, bytes_per_sample) {
            (16, 2) => Some(Self::S16Le),
            (24, 3) => Some(Self::S24Le),
            (24, 4) => Some(Self::S24In32Le),
            (32, 4) => Some(Self::S32Le),
            _ => None,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16Le => 2,
            Self::S24Le => 3,
            Self::S24In32Le | Self::S32Le => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::S16Le => "S16LE",
            Self::S24Le => "S24LE",
            Self::S24In32Le => "S24_32LE",
            Self::S32Le => "S32LE",
        }
    }

    /// Append the samples in `bytes` to `out` as `f32` in `[-1, 1)`.
    ///
    /// A trailing partial sample is ignored.
    pub fn decode_into(self, bytes: &[u8], out: &mut Vec<f32>) {
        let width = self.bytes_per_sample();
        out.reserve(bytes.len() / width);
        for s in bytes.chunks_exact(width) {
            let v = match self {
                Self::S16Le => f32::from(i16::from_le_bytes([s[0], s[1]])) / 32_768.0,
                Self::S24Le | Self::S24In32Le => {
                    (i32::from_le_bytes([0, s[0], s[1], s[2]]) >> 8) as f32 / 8_388_608.0
                }
                Self::S32Le => {
                    i32::from_le_bytes([s[0], s[1], s[2], s[3]]) as f32 / 2_147_483_648.0
                }
            };
            out.push(v);
        }
    }
}

impl std::fmt::Display for SampleEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Round `sample` to the nearest step of a `bit_depth` integer grid.
///
/// Depths of 24 bits and above are only clamped: `f32` already carries 24 bits of mantissa.
pub fn quantize(sample: f32, bit_depth: u16) -> f32 {
    let x = sample.clamp(-1.0, 1.0);
    if bit_depth == 0 || bit_depth >= 24 {
        return x;
    }
    let scale = (1u32 << (bit_depth - 1)) as f32;
    (x * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closest_rate_then_deepest_format_wins() {
        let supported = [
            SupportedFormat::new(48_000, 16),
            SupportedFormat::new(44_100, 24),
            SupportedFormat::new(96_000, 32),
        ];
        assert_eq!(
            pick_output_format(44_100, &supported),
            Some(SupportedFormat::new(44_100, 24))
        );
    }

    #[test]
    fn equal_distance_prefers_higher_depth() {
        let supported = [
            SupportedFormat::new(48_000, 16),
            SupportedFormat::new(48_000, 32),
            SupportedFormat::new(48_000, 24),
        ];
        assert_eq!(
            pick_output_format(44_100, &supported),
            Some(SupportedFormat::new(48_000, 32))
        );
    }

    #[test]
    fn empty_supported_list_yields_none() {
        assert_eq!(pick_output_format(44_100, &[]), None);
    }

    #[test]
    fn encoding_lookup_matches_container() {
        assert_eq!(SampleEncoding::for_depth(24, 3), Some(SampleEncoding::S24Le));
        assert_eq!(SampleEncoding::for_depth(24, 4), Some(SampleEncoding::S24In32Le));
        assert_eq!(SampleEncoding::for_depth(16, 4), None);
        assert_eq!(SampleEncoding::S24In32Le.name(), "S24_32LE");
    }

    #[test]
    fn decode_s16_extremes() {
        let mut out = Vec::new();
        let bytes = [i16::MIN.to_le_bytes(), 0i16.to_le_bytes()].concat();
        SampleEncoding::S16Le.decode_into(&bytes, &mut out);
        assert_eq!(out, vec![-1.0, 0.0]);
    }

    #[test]
    fn decode_s24_sign_extends() {
        let mut out = Vec::new();
        // -1 in 24-bit two's complement, then the most negative value.
        SampleEncoding::S24Le.decode_into(&[0xff, 0xff, 0xff, 0x00, 0x00, 0x80], &mut out);
        assert_eq!(out[0], -1.0 / 8_388_608.0);
        assert_eq!(out[1], -1.0);
    }

    #[test]
    fn decode_s24_in_32_ignores_padding_byte() {
        let mut a = Vec::new();
        let mut b = Vec::new();
        SampleEncoding::S24In32Le.decode_into(&[0x00, 0x00, 0x40, 0x00], &mut a);
        SampleEncoding::S24In32Le.decode_into(&[0x00, 0x00, 0x40, 0xff], &mut b);
        assert_eq!(a, vec![0.5]);
        assert_eq!(a, b);
    }

    #[test]
    fn decode_ignores_trailing_partial_sample() {
        let mut out = Vec::new();
        SampleEncoding::S16Le.decode_into(&[0, 0, 1], &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn quantize_snaps_to_16_bit_grid() {
        let step = 1.0 / 32_768.0;
        let q = quantize(0.3 * step, 16);
        assert_eq!(q, 0.0);
        assert_eq!(quantize(2.0, 16), 1.0);
        assert_eq!(quantize(0.123_456, 32), 0.123_456);
    }
}
