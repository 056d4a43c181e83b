use camera_core::{FrameSize, PixelFormat};

use crate::error::CameraError;

/// Wiring and capture configuration for one camera session.
///
/// Pin numbers are GPIO indices; `pin_pwdn` and `pin_reset` may be -1 when
/// the line is not wired. The board decides the numbers, the driver only
/// routes them.
#[derive(Debug, Clone)]
pub struct CameraConfig {
    /// Parallel data lines D0..D7, sensor bit order.
    pub data_pins: [i32; 8],
    pub pin_vsync: i32,
    pub pin_href: i32,
    pub pin_pclk: i32,
    /// Pin the driver emits the sensor master clock on.
    pub pin_xclk: i32,
    /// Two-wire (SCCB) bus pins.
    pub pin_sda: i32,
    pub pin_scl: i32,
    /// Power-down line, -1 when unused. Active high.
    pub pin_pwdn: i32,
    /// Reset line, -1 when unused. Active low.
    pub pin_reset: i32,
    /// Sensor master clock in Hz. Above 10 MHz the high-speed sampling
    /// regime is used.
    pub xclk_freq_hz: u32,
    pub pixel_format: PixelFormat,
    pub frame_size: FrameSize,
    /// JPEG quantization scale, 4..=63, lower is better quality.
    pub jpeg_quality: u8,
    /// Core the reformat worker task is pinned to.
    pub worker_core: i32,
}

impl CameraConfig {
    pub(crate) fn validate(&self) -> Result<(), CameraError> {
        for &pin in self
            .data_pins
            .iter()
            .chain([self.pin_vsync, self.pin_href, self.pin_pclk, self.pin_xclk].iter())
            .chain([self.pin_sda, self.pin_scl].iter())
        {
            if pin < 0 {
                return Err(CameraError::ConfigError("required pin not assigned"));
            }
        }
        if self.xclk_freq_hz == 0 {
            return Err(CameraError::ConfigError("xclk frequency is zero"));
        }
        if self.pixel_format == PixelFormat::Jpeg && !(4..=63).contains(&self.jpeg_quality) {
            return Err(CameraError::ConfigError("jpeg quality out of range"));
        }
        Ok(())
    }

    /// Whether the external clock selects the high-speed sampling regime.
    pub(crate) fn high_speed(&self) -> bool {
        camera_core::format::is_high_speed(self.xclk_freq_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CameraConfig {
        CameraConfig {
            data_pins: [5, 18, 19, 21, 36, 39, 34, 35],
            pin_vsync: 25,
            pin_href: 23,
            pin_pclk: 22,
            pin_xclk: 0,
            pin_sda: 26,
            pin_scl: 27,
            pin_pwdn: 32,
            pin_reset: -1,
            xclk_freq_hz: 20_000_000,
            pixel_format: PixelFormat::Jpeg,
            frame_size: FrameSize::Uxga,
            jpeg_quality: 12,
            worker_core: 0,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn optional_pins_may_be_unwired() {
        let mut c = config();
        c.pin_pwdn = -1;
        c.pin_reset = -1;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn missing_data_pin_rejected() {
        let mut c = config();
        c.data_pins[3] = -1;
        assert!(c.validate().is_err());
    }

    #[test]
    fn jpeg_quality_bounds() {
        let mut c = config();
        c.jpeg_quality = 3;
        assert!(c.validate().is_err());
        c.jpeg_quality = 64;
        assert!(c.validate().is_err());
        c.jpeg_quality = 4;
        assert!(c.validate().is_ok());
        // Quality is ignored outside JPEG captures.
        c.jpeg_quality = 0;
        c.pixel_format = PixelFormat::Rgb565;
        assert!(c.validate().is_ok());
    }

    #[test]
    fn high_speed_follows_xclk() {
        let mut c = config();
        assert!(c.high_speed());
        c.xclk_freq_hz = 8_000_000;
        assert!(!c.high_speed());
    }
}
