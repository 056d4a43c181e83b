//! OV2640 register driver.
//!
//! Covers the operations the capture core invokes. The sensor's two
//! register banks are selected through 0xFF; the DSP bank carries the
//! output formatting and the sensor bank the exposure/gain controls.

use camera_core::{FrameSize, PixelFormat};
use esp_idf_hal::delay::FreeRtos;

use crate::error::CameraError;
use crate::sccb::Sccb;
use crate::sensor::{GainCeiling, SensorDriver, SensorId, SensorStatus};

pub(crate) const OV2640_PID: u8 = 0x26;
pub(crate) const OV2640_SCCB_ADDR: u8 = 0x30;

// Bank select
const BANK_SEL: u8 = 0xFF;
const BANK_DSP: u8 = 0x00;
const BANK_SENSOR: u8 = 0x01;

// DSP bank
const QS: u8 = 0x44;
const CTRL1: u8 = 0x63;
const CTRL2: u8 = 0x86;
const CTRL3: u8 = 0x87;
const CTRL0: u8 = 0xC2;
const IMAGE_MODE: u8 = 0xDA;
const RESET: u8 = 0xE0;
const ZMOW: u8 = 0x5A;
const ZMOH: u8 = 0x5B;
const ZMHH: u8 = 0x5C;
const BPADDR: u8 = 0x7C;
const BPDATA: u8 = 0x7D;

const CTRL1_AWB: u8 = 0x08;
const CTRL1_AWB_GAIN: u8 = 0x04;
const CTRL1_RAW_GMA: u8 = 0x20;
const CTRL1_LENC: u8 = 0x02;
const CTRL2_DCW_EN: u8 = 0x20;
const CTRL3_BPC_EN: u8 = 0x80;
const CTRL3_WPC_EN: u8 = 0x40;
const CTRL0_AEC_SEL: u8 = 0x40;
const IMAGE_MODE_YUV422: u8 = 0x00;
const IMAGE_MODE_RGB565: u8 = 0x08;
const IMAGE_MODE_JPEG_EN: u8 = 0x10;
const RESET_DVP: u8 = 0x04;

// Sensor bank
const GAIN: u8 = 0x00;
const COM1: u8 = 0x03;
const REG04: u8 = 0x04;
const AEC: u8 = 0x10;
const COM7: u8 = 0x12;
const COM8: u8 = 0x13;
const COM9: u8 = 0x14;
const REG45: u8 = 0x45;

const COM7_SRST: u8 = 0x80;
const COM8_AGC_EN: u8 = 0x04;
const COM8_AEC_EN: u8 = 0x01;
const COM9_DEFAULT: u8 = 0x08;
const REG04_HFLIP: u8 = 0x80;
const REG04_VFLIP: u8 = 0x40;
const REG04_VREF_EN: u8 = 0x10;

pub(crate) struct Ov2640 {
    sccb: Sccb,
    addr: u8,
    id: SensorId,
    status: SensorStatus,
}

impl Ov2640 {
    pub fn new(sccb: Sccb, addr: u8, id: SensorId) -> Self {
        Ov2640 {
            sccb,
            addr,
            id,
            status: SensorStatus::default(),
        }
    }

    fn write(&self, reg: u8, val: u8) -> Result<(), CameraError> {
        self.sccb.write_reg(self.addr, reg, val)
    }

    fn read(&self, reg: u8) -> Result<u8, CameraError> {
        self.sccb.read_reg(self.addr, reg)
    }

    fn bank(&self, bank: u8) -> Result<(), CameraError> {
        self.write(BANK_SEL, bank)
    }

    fn update_bits(&self, reg: u8, mask: u8, set: bool) -> Result<(), CameraError> {
        let cur = self.read(reg)?;
        let new = if set { cur | mask } else { cur & !mask };
        self.write(reg, new)
    }

    /// Write an SDE (special digital effects) parameter through the
    /// indirect BPADDR/BPDATA window.
    fn write_sde(&self, param: u8, val: u8) -> Result<(), CameraError> {
        self.write(BPADDR, param)?;
        self.write(BPDATA, val)
    }
}

impl SensorDriver for Ov2640 {
    fn id(&self) -> SensorId {
        self.id
    }

    fn status(&self) -> SensorStatus {
        self.status
    }

    fn reset(&mut self) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        self.write(COM7, COM7_SRST)?;
        FreeRtos::delay_ms(50);
        Ok(())
    }

    fn set_framesize(&mut self, size: FrameSize) -> Result<(), CameraError> {
        let (width, height) = size.dimensions();
        let out_w = width / 4;
        let out_h = height / 4;
        self.bank(BANK_DSP)?;
        // Hold the DVP interface while the output window changes.
        self.write(RESET, RESET_DVP)?;
        self.write(ZMOW, (out_w & 0xFF) as u8)?;
        self.write(ZMOH, (out_h & 0xFF) as u8)?;
        self.write(ZMHH, (((out_w >> 8) & 0x03) | ((out_h >> 6) & 0x04)) as u8)?;
        self.write(RESET, 0x00)?;
        FreeRtos::delay_ms(30);
        Ok(())
    }

    fn set_pixformat(&mut self, format: PixelFormat) -> Result<(), CameraError> {
        let mode = match format {
            PixelFormat::Yuv422 | PixelFormat::Grayscale => IMAGE_MODE_YUV422,
            // RGB888 is expanded driver-side from the sensor's RGB565.
            PixelFormat::Rgb565 | PixelFormat::Rgb888 => IMAGE_MODE_RGB565,
            PixelFormat::Jpeg => IMAGE_MODE_JPEG_EN,
        };
        self.bank(BANK_DSP)?;
        self.write(RESET, RESET_DVP)?;
        self.write(IMAGE_MODE, mode)?;
        self.write(RESET, 0x00)?;
        FreeRtos::delay_ms(30);
        Ok(())
    }

    fn set_quality(&mut self, quality: u8) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.write(QS, quality)?;
        self.status.quality = quality;
        Ok(())
    }

    fn set_gainceiling(&mut self, ceiling: GainCeiling) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        self.write(COM9, COM9_DEFAULT | ((ceiling as u8 & 0x07) << 5))?;
        self.status.gainceiling = ceiling as u8;
        Ok(())
    }

    fn set_contrast(&mut self, level: i8) -> Result<(), CameraError> {
        let level = level.clamp(-2, 2);
        self.bank(BANK_DSP)?;
        self.write_sde(0x00, 0x04)?;
        self.write_sde(0x07, 0x20)?;
        self.write_sde(0x09, (0x20 + level as i16 * 4) as u8)?;
        self.write_sde(0x0A, (0x20 - level as i16 * 4) as u8)?;
        self.status.contrast = level;
        Ok(())
    }

    fn set_brightness(&mut self, level: i8) -> Result<(), CameraError> {
        let level = level.clamp(-2, 2);
        self.bank(BANK_DSP)?;
        self.write_sde(0x00, 0x04)?;
        self.write_sde(0x09, ((level as i16 + 2) * 0x10) as u8)?;
        self.status.brightness = level;
        Ok(())
    }

    fn set_saturation(&mut self, level: i8) -> Result<(), CameraError> {
        let level = level.clamp(-2, 2);
        self.bank(BANK_DSP)?;
        self.write_sde(0x00, 0x02)?;
        self.write_sde(0x03, ((level as i16 + 2) * 0x10 + 0x20) as u8)?;
        self.write_sde(0x04, ((level as i16 + 2) * 0x10 + 0x20) as u8)?;
        self.status.saturation = level;
        Ok(())
    }

    fn set_ae_level(&mut self, level: i8) -> Result<(), CameraError> {
        let level = level.clamp(-2, 2);
        self.bank(BANK_SENSOR)?;
        // Shift the stable-operating region around the mid luminance.
        let base = (0x40 + level as i16 * 8) as u8;
        self.write(0x24, base)?;
        self.write(0x25, base.wrapping_sub(0x10))?;
        self.write(0x26, 0x82)?;
        self.status.ae_level = level;
        Ok(())
    }

    fn set_gain_ctrl(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        self.update_bits(COM8, COM8_AGC_EN, enable)?;
        self.status.agc = enable;
        Ok(())
    }

    fn set_agc_gain(&mut self, gain: u8) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        self.write(GAIN, gain.min(30))?;
        self.status.agc_gain = gain;
        Ok(())
    }

    fn set_exposure_ctrl(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        self.update_bits(COM8, COM8_AEC_EN, enable)?;
        self.status.aec = enable;
        Ok(())
    }

    fn set_aec2(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL0, CTRL0_AEC_SEL, enable)?;
        self.status.aec2 = enable;
        Ok(())
    }

    fn set_aec_value(&mut self, value: u16) -> Result<(), CameraError> {
        let value = value.min(0x3FF);
        self.bank(BANK_SENSOR)?;
        let com1 = (self.read(COM1)? & !0x03) | (value & 0x03) as u8;
        self.write(COM1, com1)?;
        self.write(AEC, ((value >> 2) & 0xFF) as u8)?;
        let reg45 = self.read(REG45)? & !0x3F;
        self.write(REG45, reg45 | ((value >> 10) & 0x3F) as u8)?;
        self.status.aec_value = value;
        Ok(())
    }

    fn set_hmirror(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        self.update_bits(REG04, REG04_HFLIP, enable)?;
        self.status.hmirror = enable;
        Ok(())
    }

    fn set_vflip(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        // VREF tracks the flip so the Bayer order stays intact.
        self.update_bits(REG04, REG04_VFLIP | REG04_VREF_EN, enable)?;
        self.status.vflip = enable;
        Ok(())
    }

    fn set_dcw(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL2, CTRL2_DCW_EN, enable)?;
        self.status.dcw = enable;
        Ok(())
    }

    fn set_bpc(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL3, CTRL3_BPC_EN, enable)?;
        self.status.bpc = enable;
        Ok(())
    }

    fn set_wpc(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL3, CTRL3_WPC_EN, enable)?;
        self.status.wpc = enable;
        Ok(())
    }

    fn set_whitebal(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL1, CTRL1_AWB, enable)?;
        self.status.awb = enable;
        Ok(())
    }

    fn set_awb_gain(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL1, CTRL1_AWB_GAIN, enable)?;
        self.status.awb_gain = enable;
        Ok(())
    }

    fn set_raw_gma(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL1, CTRL1_RAW_GMA, enable)?;
        self.status.raw_gma = enable;
        Ok(())
    }

    fn set_lenc(&mut self, enable: bool) -> Result<(), CameraError> {
        self.bank(BANK_DSP)?;
        self.update_bits(CTRL1, CTRL1_LENC, enable)?;
        self.status.lenc = enable;
        Ok(())
    }

    fn init_status(&mut self) -> Result<(), CameraError> {
        self.bank(BANK_SENSOR)?;
        let com8 = self.read(COM8)?;
        self.status.agc = com8 & COM8_AGC_EN != 0;
        self.status.aec = com8 & COM8_AEC_EN != 0;
        let reg04 = self.read(REG04)?;
        self.status.hmirror = reg04 & REG04_HFLIP != 0;
        self.status.vflip = reg04 & REG04_VFLIP != 0;
        self.status.agc_gain = self.read(GAIN)?;
        self.status.gainceiling = (self.read(COM9)? >> 5) & 0x07;

        self.bank(BANK_DSP)?;
        self.status.quality = self.read(QS)?;
        let ctrl1 = self.read(CTRL1)?;
        self.status.awb = ctrl1 & CTRL1_AWB != 0;
        self.status.awb_gain = ctrl1 & CTRL1_AWB_GAIN != 0;
        self.status.raw_gma = ctrl1 & CTRL1_RAW_GMA != 0;
        self.status.lenc = ctrl1 & CTRL1_LENC != 0;
        let ctrl3 = self.read(CTRL3)?;
        self.status.bpc = ctrl3 & CTRL3_BPC_EN != 0;
        self.status.wpc = ctrl3 & CTRL3_WPC_EN != 0;
        self.status.dcw = self.read(CTRL2)? & CTRL2_DCW_EN != 0;
        self.status.aec2 = self.read(CTRL0)? & CTRL0_AEC_SEL != 0;
        Ok(())
    }
}
