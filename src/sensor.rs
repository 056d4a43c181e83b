//! Sensor driver contract.
//!
//! The capture core talks to the sensor only through [`SensorDriver`];
//! model-specific register programming lives behind it. Probing reads the
//! identity registers common to the OV parallel-sensor family and
//! dispatches to the matching initializer.

use camera_core::{FrameSize, PixelFormat};

use crate::error::CameraError;
use crate::ov2640::{Ov2640, OV2640_PID, OV2640_SCCB_ADDR};
use crate::sccb::Sccb;

pub(crate) const REG_PID: u8 = 0x0A;
pub(crate) const REG_VER: u8 = 0x0B;
pub(crate) const REG_MIDH: u8 = 0x1C;
pub(crate) const REG_MIDL: u8 = 0x1D;

/// Identity registers of a detected sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SensorId {
    pub pid: u8,
    pub ver: u8,
    pub midh: u8,
    pub midl: u8,
}

/// AGC gain ceiling steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GainCeiling {
    X2 = 0,
    X4,
    X8,
    X16,
    X32,
    X64,
    X128,
}

/// Snapshot of the sensor's tuning state, refreshed by `init_status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorStatus {
    pub quality: u8,
    pub brightness: i8,
    pub contrast: i8,
    pub saturation: i8,
    pub ae_level: i8,
    pub agc_gain: u8,
    pub aec_value: u16,
    pub gainceiling: u8,
    pub agc: bool,
    pub aec: bool,
    pub aec2: bool,
    pub hmirror: bool,
    pub vflip: bool,
    pub awb: bool,
    pub awb_gain: bool,
    pub bpc: bool,
    pub wpc: bool,
    pub lenc: bool,
    pub dcw: bool,
    pub raw_gma: bool,
}

/// Operations the capture core needs from a sensor register driver.
pub trait SensorDriver {
    fn id(&self) -> SensorId;
    fn status(&self) -> SensorStatus;

    fn reset(&mut self) -> Result<(), CameraError>;
    fn set_framesize(&mut self, size: FrameSize) -> Result<(), CameraError>;
    fn set_pixformat(&mut self, format: PixelFormat) -> Result<(), CameraError>;
    fn set_quality(&mut self, quality: u8) -> Result<(), CameraError>;
    fn set_gainceiling(&mut self, ceiling: GainCeiling) -> Result<(), CameraError>;

    fn set_contrast(&mut self, level: i8) -> Result<(), CameraError>;
    fn set_brightness(&mut self, level: i8) -> Result<(), CameraError>;
    fn set_saturation(&mut self, level: i8) -> Result<(), CameraError>;
    fn set_ae_level(&mut self, level: i8) -> Result<(), CameraError>;

    fn set_gain_ctrl(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_agc_gain(&mut self, gain: u8) -> Result<(), CameraError>;
    fn set_exposure_ctrl(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_aec2(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_aec_value(&mut self, value: u16) -> Result<(), CameraError>;

    fn set_hmirror(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_vflip(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_dcw(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_bpc(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_wpc(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_whitebal(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_awb_gain(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_raw_gma(&mut self, enable: bool) -> Result<(), CameraError>;
    fn set_lenc(&mut self, enable: bool) -> Result<(), CameraError>;

    /// Read the tuning state back from the sensor into `status`.
    fn init_status(&mut self) -> Result<(), CameraError>;
}

/// Identify the sensor on the bus and hand it to its initializer.
///
/// An answer at the OV2640's address may come from a sensor that was left
/// mid-configuration; it gets a bank-select + soft reset and a second
/// probe before the identity registers are trusted.
pub(crate) fn probe(sccb: Sccb) -> Result<Box<dyn SensorDriver>, CameraError> {
    let mut addr = match sccb.probe() {
        Some(addr) => addr,
        None => return Err(CameraError::NotDetected),
    };

    if addr == OV2640_SCCB_ADDR {
        log::debug!("resetting possible OV2640 at {:#04x}", addr);
        sccb.write_reg(addr, 0xFF, 0x01)?; // bank sensor
        sccb.write_reg(addr, 0x12, 0x80)?; // soft reset
        esp_idf_hal::delay::FreeRtos::delay_ms(10);
        addr = sccb.probe().unwrap_or(addr);
    }

    let id = SensorId {
        pid: sccb.read_reg(addr, REG_PID)?,
        ver: sccb.read_reg(addr, REG_VER)?,
        midh: sccb.read_reg(addr, REG_MIDH)?,
        midl: sccb.read_reg(addr, REG_MIDL)?,
    };
    log::debug!(
        "camera PID={:#04x} VER={:#04x} MIDH={:#04x} MIDL={:#04x}",
        id.pid,
        id.ver,
        id.midh,
        id.midl
    );

    match id.pid {
        OV2640_PID => {
            log::info!("detected OV2640 camera");
            Ok(Box::new(Ov2640::new(sccb, addr, id)))
        }
        pid => Err(CameraError::NotSupported { pid }),
    }
}
