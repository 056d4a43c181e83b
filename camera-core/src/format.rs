//! Pixel formats, frame sizes and the I2S sampling modes of the OV2640
//! class of parallel sensors.

/// Pixel format of the frame buffer handed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit luma only (Y from the sensor's YUV stream).
    #[default]
    Grayscale,
    /// YUYV as sent by the sensor, 2 bytes per pixel.
    Yuv422,
    /// RGB565 as sent by the sensor, 2 bytes per pixel.
    Rgb565,
    /// RGB888 expanded on the fly from the sensor's RGB565, 3 bytes per pixel.
    Rgb888,
    /// Compressed byte stream straight from the sensor's JPEG engine.
    Jpeg,
}

impl PixelFormat {
    /// Bytes per pixel the sensor puts on the bus. The whole OV2640 class
    /// sends two bytes per pixel regardless of output format.
    pub fn in_bytes_per_pixel(self) -> usize {
        2
    }

    /// Bytes per pixel stored in the frame buffer. For JPEG this is the
    /// worst-case bound used to size the buffer, not a real pixel width.
    pub fn fb_bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Grayscale => 1,
            PixelFormat::Yuv422 | PixelFormat::Rgb565 | PixelFormat::Jpeg => 2,
            PixelFormat::Rgb888 => 3,
        }
    }
}

/// How the I2S FIFO packs camera bytes into 32-bit words.
///
/// The register values are the ESP32 `rx_fifo_mod` encodings. With the
/// camera sending bytes `s1 s2 s3 s4 ...`:
///
/// * `AbBc` (0): words `00 s1 00 s2`, `00 s2 00 s3`, ... - each byte is
///   sampled twice (legacy packing, 4 FIFO bytes per camera byte pair,
///   overlapping).
/// * `AbCd` (1): words `00 s1 00 s2`, `00 s3 00 s4`, ... - two camera
///   bytes per word (low speed).
/// * `A0B0` (3): words `00 s1 00 00`, `00 s2 00 00`, ... - one camera
///   byte per word (high speed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    AbBc = 0,
    AbCd = 1,
    A0B0 = 3,
}

impl SamplingMode {
    /// FIFO bytes consumed per camera byte pair.
    pub fn bytes_per_hw_sample(self) -> usize {
        match self {
            SamplingMode::A0B0 => 4,
            SamplingMode::AbBc => 4,
            SamplingMode::AbCd => 2,
        }
    }

    /// Value for the `rx_fifo_mod` register field.
    pub fn fifo_mod(self) -> u32 {
        self as u32
    }
}

/// Output resolutions supported by the OV2640 ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FrameSize {
    /// 160x120
    Qqvga,
    /// 128x160
    Qqvga2,
    /// 176x144
    Qcif,
    /// 240x176
    Hqvga,
    /// 320x240
    Qvga,
    /// 400x296
    Cif,
    /// 640x480
    Vga,
    /// 800x600
    Svga,
    /// 1024x768
    Xga,
    /// 1280x1024
    Sxga,
    /// 1600x1200
    Uxga,
}

impl FrameSize {
    pub fn dimensions(self) -> (usize, usize) {
        match self {
            FrameSize::Qqvga => (160, 120),
            FrameSize::Qqvga2 => (128, 160),
            FrameSize::Qcif => (176, 144),
            FrameSize::Hqvga => (240, 176),
            FrameSize::Qvga => (320, 240),
            FrameSize::Cif => (400, 296),
            FrameSize::Vga => (640, 480),
            FrameSize::Svga => (800, 600),
            FrameSize::Xga => (1024, 768),
            FrameSize::Sxga => (1280, 1024),
            FrameSize::Uxga => (1600, 1200),
        }
    }

    pub fn width(self) -> usize {
        self.dimensions().0
    }

    pub fn height(self) -> usize {
        self.dimensions().1
    }
}

/// External clock threshold above which the high-speed sampling regime
/// (one camera byte per FIFO word) is required.
pub const HIGH_SPEED_XCLK_HZ: u32 = 10_000_000;

/// Whether an external clock frequency selects the high-speed regime.
pub fn is_high_speed(xclk_freq_hz: u32) -> bool {
    xclk_freq_hz > HIGH_SPEED_XCLK_HZ
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_hw_sample_match_fifo_modes() {
        assert_eq!(SamplingMode::A0B0.bytes_per_hw_sample(), 4);
        assert_eq!(SamplingMode::AbBc.bytes_per_hw_sample(), 4);
        assert_eq!(SamplingMode::AbCd.bytes_per_hw_sample(), 2);
    }

    #[test]
    fn fifo_mod_register_values() {
        assert_eq!(SamplingMode::AbBc.fifo_mod(), 0);
        assert_eq!(SamplingMode::AbCd.fifo_mod(), 1);
        assert_eq!(SamplingMode::A0B0.fifo_mod(), 3);
    }

    #[test]
    fn high_speed_threshold_is_exclusive() {
        assert!(!is_high_speed(10_000_000));
        assert!(is_high_speed(10_000_001));
        assert!(is_high_speed(20_000_000));
        assert!(!is_high_speed(8_000_000));
    }

    #[test]
    fn uxga_dimensions() {
        assert_eq!(FrameSize::Uxga.dimensions(), (1600, 1200));
        assert_eq!(FrameSize::Qvga.dimensions(), (320, 240));
    }

    #[test]
    fn frame_sizes_are_ordered() {
        assert!(FrameSize::Qvga < FrameSize::Uxga);
        assert!(FrameSize::Qqvga < FrameSize::Vga);
    }
}
