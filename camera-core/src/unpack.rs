//! Bounce-buffer unpackers.
//!
//! The I2S FIFO stores one hardware sample per 32-bit word, little-endian
//! `00 s1 00 s2`: the byte strobed on the active PCLK edge (`s1`) sits at
//! offset 2 of each 4-byte element, the adjacent sample (`s2`) at offset 0.
//! Each unpacker converts one bounce buffer's worth of elements into the
//! caller-visible pixel layout.
//!
//! `len` is the descriptor length in bytes; `src` is the whole bounce
//! buffer, which may extend past `len` (the shortened line-tail descriptors
//! rely on that slack).

use crate::format::{PixelFormat, SamplingMode};

#[inline(always)]
fn s1(src: &[u8], elem: usize) -> u8 {
    src[elem * 4 + 2]
}

#[inline(always)]
fn s2(src: &[u8], elem: usize) -> u8 {
    src[elem * 4]
}

/// RGB565 word (hi, lo) expanded to the 3-byte layout the caller sees.
#[inline(always)]
fn expand_rgb565(hi: u8, lo: u8) -> [u8; 3] {
    [
        (lo & 0x1F) << 3,
        ((hi & 0x07) << 5) | ((lo & 0xE0) >> 3),
        hi & 0xF8,
    ]
}

/// One unpacker per (pixel format, sampling regime) pair, resolved once at
/// session init and statically dispatched per bounce buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unpacker {
    Jpeg,
    GrayscaleLowSpeed,
    GrayscaleHighSpeed,
    YuyvLowSpeed,
    YuyvHighSpeed,
    Rgb888LowSpeed,
    Rgb888HighSpeed,
}

impl Unpacker {
    /// Sampling mode and unpacker for a format/clock-regime combination.
    pub fn select(format: PixelFormat, high_speed: bool) -> (Self, SamplingMode) {
        match (format, high_speed) {
            (PixelFormat::Jpeg, _) => (Unpacker::Jpeg, SamplingMode::A0B0),
            (PixelFormat::Grayscale, true) => (Unpacker::GrayscaleHighSpeed, SamplingMode::A0B0),
            (PixelFormat::Grayscale, false) => (Unpacker::GrayscaleLowSpeed, SamplingMode::AbCd),
            (PixelFormat::Yuv422 | PixelFormat::Rgb565, true) => {
                (Unpacker::YuyvHighSpeed, SamplingMode::A0B0)
            }
            (PixelFormat::Yuv422 | PixelFormat::Rgb565, false) => {
                (Unpacker::YuyvLowSpeed, SamplingMode::AbCd)
            }
            (PixelFormat::Rgb888, true) => (Unpacker::Rgb888HighSpeed, SamplingMode::A0B0),
            (PixelFormat::Rgb888, false) => (Unpacker::Rgb888LowSpeed, SamplingMode::AbCd),
        }
    }

    /// Convert `len` bytes of `src` into `dst`.
    pub fn run(self, src: &[u8], len: usize, dst: &mut [u8]) {
        match self {
            Unpacker::Jpeg => unpack_jpeg(src, len, dst),
            Unpacker::GrayscaleLowSpeed => unpack_grayscale(src, len, dst),
            Unpacker::GrayscaleHighSpeed => unpack_grayscale_highspeed(src, len, dst),
            Unpacker::YuyvLowSpeed => unpack_yuyv(src, len, dst),
            Unpacker::YuyvHighSpeed => unpack_yuyv_highspeed(src, len, dst),
            Unpacker::Rgb888LowSpeed => unpack_rgb888(src, len, dst),
            Unpacker::Rgb888HighSpeed => unpack_rgb888_highspeed(src, len, dst),
        }
    }
}

/// JPEG is a plain byte stream; only `s1` of every element carries data.
fn unpack_jpeg(src: &[u8], len: usize, dst: &mut [u8]) {
    let end = len / 4 / 4;
    for g in 0..end {
        let base = g * 4;
        let out = g * 4;
        dst[out] = s1(src, base);
        dst[out + 1] = s1(src, base + 1);
        dst[out + 2] = s1(src, base + 2);
        dst[out + 3] = s1(src, base + 3);
    }
}

fn unpack_grayscale(src: &[u8], len: usize, dst: &mut [u8]) {
    let end = len / 4 / 4;
    for g in 0..end {
        let base = g * 4;
        let out = g * 4;
        dst[out] = s1(src, base);
        dst[out + 1] = s1(src, base + 1);
        dst[out + 2] = s1(src, base + 2);
        dst[out + 3] = s1(src, base + 3);
    }
}

fn unpack_grayscale_highspeed(src: &[u8], len: usize, dst: &mut [u8]) {
    let end = len / 4 / 8;
    for g in 0..end {
        let base = g * 8;
        let out = g * 4;
        dst[out] = s1(src, base);
        dst[out + 1] = s1(src, base + 2);
        dst[out + 2] = s1(src, base + 4);
        dst[out + 3] = s1(src, base + 6);
    }
    // Shortened line-tail descriptors leave a partial group behind.
    if len & 0x7 != 0 {
        let base = end * 8;
        let out = end * 4;
        dst[out] = s1(src, base);
        dst[out + 1] = s1(src, base + 2);
    }
}

fn unpack_yuyv(src: &[u8], len: usize, dst: &mut [u8]) {
    let end = len / 4 / 4;
    for g in 0..end {
        let base = g * 4;
        let out = g * 8;
        dst[out] = s1(src, base); // y0
        dst[out + 1] = s2(src, base); // u
        dst[out + 2] = s1(src, base + 1); // y1
        dst[out + 3] = s2(src, base + 1); // v
        dst[out + 4] = s1(src, base + 2); // y0
        dst[out + 5] = s2(src, base + 2); // u
        dst[out + 6] = s1(src, base + 3); // y1
        dst[out + 7] = s2(src, base + 3); // v
    }
}

fn unpack_yuyv_highspeed(src: &[u8], len: usize, dst: &mut [u8]) {
    let end = len / 4 / 8;
    for g in 0..end {
        let base = g * 8;
        let out = g * 8;
        for k in 0..8 {
            dst[out + k] = s1(src, base + k);
        }
    }
    if len & 0x7 != 0 {
        let base = end * 8;
        let out = end * 8;
        dst[out] = s1(src, base); // y0
        dst[out + 1] = s1(src, base + 1); // u
        dst[out + 2] = s1(src, base + 2); // y1
        dst[out + 3] = s2(src, base + 2); // v
    }
}

fn unpack_rgb888(src: &[u8], len: usize, dst: &mut [u8]) {
    let end = len / 4 / 4;
    for g in 0..end {
        let base = g * 4;
        let mut out = g * 12;
        for e in base..base + 4 {
            let px = expand_rgb565(s1(src, e), s2(src, e));
            dst[out..out + 3].copy_from_slice(&px);
            out += 3;
        }
    }
}

fn unpack_rgb888_highspeed(src: &[u8], len: usize, dst: &mut [u8]) {
    let end = len / 4 / 8;
    for g in 0..end {
        let base = g * 8;
        let mut out = g * 12;
        for k in 0..4 {
            let px = expand_rgb565(s1(src, base + 2 * k), s1(src, base + 2 * k + 1));
            dst[out..out + 3].copy_from_slice(&px);
            out += 3;
        }
    }
    if len & 0x7 != 0 {
        let base = end * 8;
        let out = end * 12;
        let px = expand_rgb565(s1(src, base), s1(src, base + 1));
        dst[out..out + 3].copy_from_slice(&px);
        let px = expand_rgb565(s1(src, base + 2), s2(src, base + 2));
        dst[out + 3..out + 6].copy_from_slice(&px);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a low-speed element stream from (s1, s2) pairs.
    fn elems(pairs: &[(u8, u8)]) -> Vec<u8> {
        let mut v = Vec::with_capacity(pairs.len() * 4);
        for &(a, b) in pairs {
            v.extend_from_slice(&[b, 0, a, 0]);
        }
        v
    }

    /// Build a high-speed element stream where only s1 carries data.
    fn elems_hs(bytes: &[u8]) -> Vec<u8> {
        let mut v = Vec::with_capacity(bytes.len() * 4);
        for &b in bytes {
            v.extend_from_slice(&[0, 0, b, 0]);
        }
        v
    }

    #[test]
    fn selection_table() {
        assert_eq!(
            Unpacker::select(PixelFormat::Jpeg, true),
            (Unpacker::Jpeg, SamplingMode::A0B0)
        );
        assert_eq!(
            Unpacker::select(PixelFormat::Jpeg, false),
            (Unpacker::Jpeg, SamplingMode::A0B0)
        );
        assert_eq!(
            Unpacker::select(PixelFormat::Grayscale, true),
            (Unpacker::GrayscaleHighSpeed, SamplingMode::A0B0)
        );
        assert_eq!(
            Unpacker::select(PixelFormat::Rgb565, false),
            (Unpacker::YuyvLowSpeed, SamplingMode::AbCd)
        );
        assert_eq!(
            Unpacker::select(PixelFormat::Rgb888, true),
            (Unpacker::Rgb888HighSpeed, SamplingMode::A0B0)
        );
    }

    #[test]
    fn jpeg_takes_s1_of_every_element() {
        let src = elems_hs(&[0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4]);
        let mut dst = [0u8; 8];
        Unpacker::Jpeg.run(&src, src.len(), &mut dst);
        assert_eq!(dst, [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4]);
    }

    #[test]
    fn grayscale_lowspeed_takes_s1() {
        let src = elems(&[(10, 99), (20, 99), (30, 99), (40, 99)]);
        let mut dst = [0u8; 4];
        Unpacker::GrayscaleLowSpeed.run(&src, src.len(), &mut dst);
        assert_eq!(dst, [10, 20, 30, 40]);
    }

    #[test]
    fn grayscale_highspeed_takes_every_other_element() {
        let src = elems_hs(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut dst = [0u8; 4];
        Unpacker::GrayscaleHighSpeed.run(&src, src.len(), &mut dst);
        assert_eq!(dst, [1, 3, 5, 7]);
    }

    #[test]
    fn grayscale_highspeed_tail() {
        // 8 full elements plus a shortened remainder: len % 8 == 4.
        let mut src = elems_hs(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        src.extend_from_slice(&[0; 8]); // slack the hardware buffer provides
        let len = 36;
        let mut dst = [0u8; 6];
        Unpacker::GrayscaleHighSpeed.run(&src, len, &mut dst);
        assert_eq!(dst, [1, 3, 5, 7, 9, 11]);
    }

    #[test]
    fn yuyv_lowspeed_is_identity_on_sample_bytes() {
        // Two quads (Y0 U Y1 V) straight through.
        let src = elems(&[
            (0x11, 0x80),
            (0x22, 0x90),
            (0x33, 0xA0),
            (0x44, 0xB0),
        ]);
        let mut dst = [0u8; 8];
        Unpacker::YuyvLowSpeed.run(&src, src.len(), &mut dst);
        assert_eq!(dst, [0x11, 0x80, 0x22, 0x90, 0x33, 0xA0, 0x44, 0xB0]);
    }

    #[test]
    fn yuyv_highspeed_packs_eight_samples() {
        let src = elems_hs(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut dst = [0u8; 8];
        Unpacker::YuyvHighSpeed.run(&src, src.len(), &mut dst);
        assert_eq!(dst, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn yuyv_highspeed_tail_duplicates_last_luma() {
        let mut src = elems_hs(&[1, 2, 3]);
        // s2 of the third element carries the V sample in the tail path.
        src[2 * 4] = 0xCC;
        src.extend_from_slice(&[0; 20]);
        let mut dst = [0u8; 4];
        Unpacker::YuyvHighSpeed.run(&src, 4, &mut dst);
        assert_eq!(dst, [1, 2, 3, 0xCC]);
    }

    #[test]
    fn rgb565_expansion_is_algebraic_over_all_words() {
        for w in 0..=0xFFFFu32 {
            let hi = (w >> 8) as u8;
            let lo = (w & 0xFF) as u8;
            let src = elems(&[(hi, lo), (hi, lo), (hi, lo), (hi, lo)]);
            let mut dst = [0u8; 12];
            Unpacker::Rgb888LowSpeed.run(&src, src.len(), &mut dst);
            let expect = [
                (lo & 0x1F) << 3,
                ((hi & 0x07) << 5) | ((lo & 0xE0) >> 3),
                hi & 0xF8,
            ];
            assert_eq!(&dst[0..3], &expect);
            assert_eq!(&dst[9..12], &expect);
        }
    }

    #[test]
    fn rgb888_highspeed_pairs_adjacent_samples() {
        // hi/lo bytes arrive as s1 of consecutive elements.
        let src = elems_hs(&[0xAB, 0xCD, 0x12, 0x34, 0xFF, 0x00, 0x00, 0xFF]);
        let mut dst = [0u8; 12];
        Unpacker::Rgb888HighSpeed.run(&src, src.len(), &mut dst);
        assert_eq!(&dst[0..3], &expand_rgb565(0xAB, 0xCD));
        assert_eq!(&dst[3..6], &expand_rgb565(0x12, 0x34));
        assert_eq!(&dst[6..9], &expand_rgb565(0xFF, 0x00));
        assert_eq!(&dst[9..12], &expand_rgb565(0x00, 0xFF));
    }

    #[test]
    fn rgb888_highspeed_tail_emits_two_pixels() {
        let mut src = elems_hs(&[0xAB, 0xCD, 0x55]);
        src[2 * 4] = 0x66; // s2 of the third element
        src.extend_from_slice(&[0; 20]);
        let mut dst = [0u8; 6];
        Unpacker::Rgb888HighSpeed.run(&src, 4, &mut dst);
        assert_eq!(&dst[0..3], &expand_rgb565(0xAB, 0xCD));
        assert_eq!(&dst[3..6], &expand_rgb565(0x55, 0x66));
    }

    #[test]
    fn full_channel_range_survives_expansion() {
        // Pure-white and pure-black RGB565 map to the channel extremes.
        let white = expand_rgb565(0xFF, 0xFF);
        assert_eq!(white, [0xF8, 0xFC, 0xF8]);
        let black = expand_rgb565(0x00, 0x00);
        assert_eq!(black, [0, 0, 0]);
    }
}
