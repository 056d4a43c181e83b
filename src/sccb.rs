//! SCCB bus client.
//!
//! SCCB is electrically I2C at 100 kHz with one quirk: a register read is
//! an address write followed by a *stopped* read, not a repeated start.

use core::time::Duration;

use esp_idf_hal::delay::TickType;
use esp_idf_sys::*;

use crate::error::{esp_ok, CameraError};

/// I2C controller reserved for the sensor, leaving port 0 to the
/// application.
const SCCB_PORT: i2c_port_t = 1;

const SCCB_FREQ_HZ: u32 = 100_000;

fn timeout() -> TickType_t {
    TickType::from(Duration::from_millis(100)).0
}

pub(crate) struct Sccb {
    port: i2c_port_t,
}

impl Sccb {
    pub fn init(pin_sda: i32, pin_scl: i32) -> Result<Self, CameraError> {
        let conf = i2c_config_t {
            mode: i2c_mode_t_I2C_MODE_MASTER,
            sda_io_num: pin_sda,
            scl_io_num: pin_scl,
            sda_pullup_en: true,
            scl_pullup_en: true,
            __bindgen_anon_1: i2c_config_t__bindgen_ty_1 {
                master: i2c_config_t__bindgen_ty_1__bindgen_ty_1 {
                    clk_speed: SCCB_FREQ_HZ,
                },
            },
            ..Default::default()
        };
        unsafe {
            esp_ok("i2c_param_config", i2c_param_config(SCCB_PORT, &conf))?;
            esp_ok(
                "i2c_driver_install",
                i2c_driver_install(SCCB_PORT, i2c_mode_t_I2C_MODE_MASTER, 0, 0, 0),
            )?;
        }
        Ok(Sccb { port: SCCB_PORT })
    }

    /// Scan the 7-bit address space for a device that ACKs. Returns the
    /// first responding address.
    pub fn probe(&self) -> Option<u8> {
        for addr in 0x08..0x78u8 {
            let reg = [0u8];
            let err = unsafe {
                i2c_master_write_to_device(self.port, addr, reg.as_ptr(), reg.len(), timeout())
            };
            if err == ESP_OK {
                log::debug!("SCCB device at address {:#04x}", addr);
                return Some(addr);
            }
        }
        None
    }

    pub fn write_reg(&self, addr: u8, reg: u8, val: u8) -> Result<(), CameraError> {
        let bytes = [reg, val];
        let err = unsafe {
            i2c_master_write_to_device(self.port, addr, bytes.as_ptr(), bytes.len(), timeout())
        };
        esp_ok("sccb write", err)
    }

    pub fn read_reg(&self, addr: u8, reg: u8) -> Result<u8, CameraError> {
        let out = [reg];
        let mut val = [0u8];
        unsafe {
            esp_ok(
                "sccb address write",
                i2c_master_write_to_device(self.port, addr, out.as_ptr(), out.len(), timeout()),
            )?;
            esp_ok(
                "sccb read",
                i2c_master_read_from_device(self.port, addr, val.as_mut_ptr(), 1, timeout()),
            )?;
        }
        Ok(val[0])
    }
}

impl Drop for Sccb {
    fn drop(&mut self) {
        unsafe {
            i2c_driver_delete(self.port);
        }
    }
}
