//! Sensor master clock output.
//!
//! The OV2640 has no oscillator of its own; the driver feeds it a square
//! wave from a LEDC channel running at 1-bit resolution with duty 1, i.e.
//! a 50 % clock at the configured frequency.

use esp_idf_sys::*;

use crate::error::{esp_ok, CameraError};

pub(crate) struct XClk {
    pin: i32,
}

impl XClk {
    pub fn enable(pin: i32, freq_hz: u32) -> Result<Self, CameraError> {
        let timer = ledc_timer_config_t {
            speed_mode: ledc_mode_t_LEDC_HIGH_SPEED_MODE,
            duty_resolution: ledc_timer_bit_t_LEDC_TIMER_1_BIT,
            timer_num: ledc_timer_t_LEDC_TIMER_0,
            freq_hz,
            clk_cfg: ledc_clk_cfg_t_LEDC_AUTO_CLK,
            ..Default::default()
        };
        unsafe {
            esp_ok("ledc_timer_config", ledc_timer_config(&timer))?;
        }

        let channel = ledc_channel_config_t {
            gpio_num: pin,
            speed_mode: ledc_mode_t_LEDC_HIGH_SPEED_MODE,
            channel: ledc_channel_t_LEDC_CHANNEL_0,
            intr_type: ledc_intr_type_t_LEDC_INTR_DISABLE,
            timer_sel: ledc_timer_t_LEDC_TIMER_0,
            duty: 1,
            hpoint: 0,
            ..Default::default()
        };
        unsafe {
            esp_ok("ledc_channel_config", ledc_channel_config(&channel))?;
        }

        log::debug!("XCLK enabled on GPIO{} at {} Hz", pin, freq_hz);
        Ok(XClk { pin })
    }
}

impl Drop for XClk {
    fn drop(&mut self) {
        unsafe {
            ledc_stop(
                ledc_mode_t_LEDC_HIGH_SPEED_MODE,
                ledc_channel_t_LEDC_CHANNEL_0,
                0,
            );
        }
        log::debug!("XCLK disabled on GPIO{}", self.pin);
    }
}
