//! DMA ring sizing.
//!
//! One sensor line is split across one or more bounce buffers; the ring
//! holds four lines' worth of descriptors so the reformat worker has two
//! lines of headroom on each side of the hardware cursor.

use crate::format::SamplingMode;

/// Hardware limit: a single `lldesc` descriptor addresses less than 4096
/// bytes (12-bit length field).
const MAX_DMA_BUF: usize = 4096;

/// Lines of headroom held in the ring.
const RING_LINES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// The sensor line width must split evenly into 4-byte FIFO words.
    WidthNotMultipleOf4 { width: usize },
}

impl core::fmt::Display for LayoutError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            LayoutError::WidthNotMultipleOf4 { width } => {
                write!(f, "frame width {} is not a multiple of 4", width)
            }
        }
    }
}

impl std::error::Error for LayoutError {}

/// Sizing of the DMA descriptor ring for one capture configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaLayout {
    /// Bytes one sensor line occupies in the I2S FIFO stream.
    pub line_size: usize,
    /// Bytes per bounce buffer (the largest power-of-two division of
    /// `line_size` below 4096).
    pub buf_size: usize,
    /// Bounce buffers per sensor line.
    pub dma_per_line: usize,
    /// Descriptors in the ring.
    pub desc_count: usize,
    sampling: SamplingMode,
}

impl DmaLayout {
    pub fn compute(
        width: usize,
        in_bytes_per_pixel: usize,
        sampling: SamplingMode,
    ) -> Result<Self, LayoutError> {
        if width % 4 != 0 {
            return Err(LayoutError::WidthNotMultipleOf4 { width });
        }

        let line_size = width * in_bytes_per_pixel * sampling.bytes_per_hw_sample();
        let mut buf_size = line_size;
        let mut dma_per_line = 1;
        while buf_size >= MAX_DMA_BUF {
            buf_size /= 2;
            dma_per_line *= 2;
        }

        Ok(DmaLayout {
            line_size,
            buf_size,
            dma_per_line,
            desc_count: RING_LINES * dma_per_line,
            sampling,
        })
    }

    /// Byte length programmed into descriptor `i`.
    ///
    /// In `AbBc` mode the overlapped packing makes the hardware deliver one
    /// word less on the final buffer of every line, so its length is
    /// shortened by 4 bytes.
    pub fn desc_len(&self, i: usize) -> usize {
        if self.sampling == SamplingMode::AbBc && (i + 1) % self.dma_per_line == 0 {
            self.buf_size - 4
        } else {
            self.buf_size
        }
    }

    /// Total 32-bit samples across the ring; programmed into the
    /// peripheral's `rx_eof_num` watermark.
    pub fn total_samples(&self) -> usize {
        (0..self.desc_count).map(|i| self.desc_len(i) / 4).sum()
    }

    /// Bytes the unpacker writes into the frame buffer per bounce buffer.
    pub fn output_stride(&self, width: usize, fb_bytes_per_pixel: usize) -> usize {
        width * fb_bytes_per_pixel / self.dma_per_line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qvga_low_speed_fits_one_buffer() {
        // 320 * 2 * 2 = 1280 bytes per line, already below 4096.
        let l = DmaLayout::compute(320, 2, SamplingMode::AbCd).unwrap();
        assert_eq!(l.line_size, 1280);
        assert_eq!(l.buf_size, 1280);
        assert_eq!(l.dma_per_line, 1);
        assert_eq!(l.desc_count, 4);
        assert_eq!(l.total_samples(), 4 * 1280 / 4);
    }

    #[test]
    fn uxga_high_speed_splits_lines() {
        // 1600 * 2 * 4 = 12800 -> 6400 -> 3200.
        let l = DmaLayout::compute(1600, 2, SamplingMode::A0B0).unwrap();
        assert_eq!(l.line_size, 12800);
        assert_eq!(l.buf_size, 3200);
        assert_eq!(l.dma_per_line, 4);
        assert_eq!(l.desc_count, 16);
        assert!(l.buf_size < 4096);
        assert_eq!(l.buf_size * l.dma_per_line, l.line_size);
    }

    #[test]
    fn ring_is_four_lines_deep() {
        for &(w, sm) in &[
            (320, SamplingMode::AbCd),
            (640, SamplingMode::A0B0),
            (800, SamplingMode::A0B0),
            (1600, SamplingMode::A0B0),
        ] {
            let l = DmaLayout::compute(w, 2, sm).unwrap();
            assert_eq!(l.desc_count, 4 * l.dma_per_line);
            assert!(l.buf_size < 4096);
            assert_eq!(l.buf_size * l.dma_per_line, l.line_size);
        }
    }

    #[test]
    fn abbc_line_tails_are_shortened() {
        let l = DmaLayout::compute(640, 2, SamplingMode::AbBc).unwrap();
        // 640 * 2 * 4 = 5120 -> 2560, two buffers per line.
        assert_eq!(l.dma_per_line, 2);
        assert_eq!(l.desc_len(0), 2560);
        assert_eq!(l.desc_len(1), 2556);
        assert_eq!(l.desc_len(2), 2560);
        assert_eq!(l.desc_len(3), 2556);
        let full = l.desc_count * l.buf_size / 4;
        assert_eq!(l.total_samples(), full - 4);
    }

    #[test]
    fn no_shortening_outside_abbc() {
        let l = DmaLayout::compute(640, 2, SamplingMode::A0B0).unwrap();
        for i in 0..l.desc_count {
            assert_eq!(l.desc_len(i), l.buf_size);
        }
    }

    #[test]
    fn odd_width_rejected() {
        assert_eq!(
            DmaLayout::compute(322, 2, SamplingMode::AbCd),
            Err(LayoutError::WidthNotMultipleOf4 { width: 322 })
        );
    }

    #[test]
    fn output_stride_covers_frame() {
        let l = DmaLayout::compute(1600, 2, SamplingMode::A0B0).unwrap();
        // UXGA JPEG: stride * dma_per_line spans one line of output bytes.
        assert_eq!(l.output_stride(1600, 2) * l.dma_per_line, 1600 * 2);
        // Grayscale QVGA.
        let l = DmaLayout::compute(320, 2, SamplingMode::AbCd).unwrap();
        assert_eq!(l.output_stride(320, 1), 320);
    }
}
