//! I2S0 in slave/LCD/camera mode.
//!
//! The ESP32 ingests parallel sensor data through I2S0: the sensor drives
//! PCLK into the word-select input, VSYNC/HREF gate sampling, and the FIFO
//! sinks into the DMA descriptor ring. Register access uses the raw
//! addresses from the TRM with proper memory barriers.

use core::ffi::c_void;
use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{compiler_fence, Ordering};

use camera_core::SamplingMode;
use esp_idf_sys::*;

use crate::error::{esp_ok, CameraError};

// Peripheral base addresses from the ESP32 TRM.
const DR_REG_I2S0_BASE: u32 = 0x3FF4_F000;
const DR_REG_GPIO_BASE: u32 = 0x3FF4_4000;

const I2S_CONF_REG: u32 = DR_REG_I2S0_BASE + 0x0008;
const I2S_INT_RAW_REG: u32 = DR_REG_I2S0_BASE + 0x000C;
const I2S_INT_ENA_REG: u32 = DR_REG_I2S0_BASE + 0x0014;
const I2S_INT_CLR_REG: u32 = DR_REG_I2S0_BASE + 0x0018;
const I2S_TIMING_REG: u32 = DR_REG_I2S0_BASE + 0x001C;
const I2S_FIFO_CONF_REG: u32 = DR_REG_I2S0_BASE + 0x0020;
const I2S_RXEOF_NUM_REG: u32 = DR_REG_I2S0_BASE + 0x0024;
const I2S_CONF_CHAN_REG: u32 = DR_REG_I2S0_BASE + 0x002C;
const I2S_IN_LINK_REG: u32 = DR_REG_I2S0_BASE + 0x0034;
const I2S_LC_CONF_REG: u32 = DR_REG_I2S0_BASE + 0x0060;
const I2S_CONF2_REG: u32 = DR_REG_I2S0_BASE + 0x00A8;
const I2S_CLKM_CONF_REG: u32 = DR_REG_I2S0_BASE + 0x00AC;
const I2S_SAMPLE_RATE_CONF_REG: u32 = DR_REG_I2S0_BASE + 0x00B0;
const I2S_STATE_REG: u32 = DR_REG_I2S0_BASE + 0x00BC;

const GPIO_IN_REG: u32 = DR_REG_GPIO_BASE + 0x003C;
const GPIO_IN1_REG: u32 = DR_REG_GPIO_BASE + 0x0040;

// CONF register bits.
const I2S_TX_RESET: u32 = 1 << 0;
const I2S_RX_RESET: u32 = 1 << 1;
const I2S_TX_FIFO_RESET: u32 = 1 << 2;
const I2S_RX_FIFO_RESET: u32 = 1 << 3;
const I2S_RX_SLAVE_MOD: u32 = 1 << 4;
const I2S_RX_RIGHT_FIRST: u32 = 1 << 6;
const I2S_RX_MSB_SHIFT: u32 = 1 << 8;
const I2S_RX_SHORT_SYNC: u32 = 1 << 10;
const I2S_RX_MONO: u32 = 1 << 12;
const I2S_RX_MSB_RIGHT: u32 = 1 << 14;
const I2S_RX_START: u32 = 1 << 16;

// LC_CONF register bits.
const I2S_IN_RST: u32 = 1 << 0;
const I2S_AHBM_FIFO_RST: u32 = 1 << 2;
const I2S_AHBM_RST: u32 = 1 << 3;

// CONF2 register bits.
const I2S_CAMERA_EN: u32 = 1 << 0;
const I2S_LCD_EN: u32 = 1 << 5;

// CLKM_CONF fields.
const I2S_CLKM_DIV_NUM_SHIFT: u32 = 0;
const I2S_CLKM_DIV_B_SHIFT: u32 = 8;
const I2S_CLKM_DIV_A_SHIFT: u32 = 14;

// FIFO_CONF bits and fields.
const I2S_DSCR_EN: u32 = 1 << 12;
const I2S_RX_FIFO_MOD_SHIFT: u32 = 16;
const I2S_RX_FIFO_MOD_MASK: u32 = 0x7 << I2S_RX_FIFO_MOD_SHIFT;
const I2S_RX_FIFO_MOD_FORCE_EN: u32 = 1 << 20;

// CONF_CHAN fields.
const I2S_RX_CHAN_MOD_SHIFT: u32 = 3;
const I2S_RX_CHAN_MOD_MASK: u32 = 0x3 << I2S_RX_CHAN_MOD_SHIFT;

// SAMPLE_RATE_CONF fields.
const I2S_RX_BITS_MOD_MASK: u32 = 0x3F << 18;

// TIMING bits.
const I2S_RX_DSYNC_SW: u32 = 1 << 21;

// STATE bits.
const I2S_RX_FIFO_RESET_BACK: u32 = 1 << 2;

// IN_LINK fields.
const I2S_INLINK_ADDR_MASK: u32 = 0x000F_FFFF;
const I2S_INLINK_START: u32 = 1 << 29;

// INT bits.
const I2S_IN_DONE_INT: u32 = 1 << 8;

/// GPIO matrix input index that reads as constant one; keeps HSYNC
/// asserted since the sensor only provides VSYNC/HREF.
const MATRIX_CONST_HIGH_INPUT: u32 = 0x38;

#[inline(always)]
unsafe fn reg_read(addr: u32) -> u32 {
    compiler_fence(Ordering::SeqCst);
    let val = read_volatile(addr as *const u32);
    compiler_fence(Ordering::SeqCst);
    val
}

#[inline(always)]
unsafe fn reg_write(addr: u32, val: u32) {
    compiler_fence(Ordering::SeqCst);
    write_volatile(addr as *mut u32, val);
    compiler_fence(Ordering::SeqCst);
}

#[inline(always)]
unsafe fn reg_set_bits(addr: u32, mask: u32) {
    reg_write(addr, reg_read(addr) | mask);
}

#[inline(always)]
unsafe fn reg_clear_bits(addr: u32, mask: u32) {
    reg_write(addr, reg_read(addr) & !mask);
}

/// Raw GPIO level read, safe from ISR context (no driver locks).
#[link_section = ".iram1.cam_gpio_level"]
pub(crate) unsafe fn gpio_level_raw(pin: i32) -> u32 {
    if pin < 32 {
        (reg_read(GPIO_IN_REG) >> pin) & 1
    } else {
        (reg_read(GPIO_IN1_REG) >> (pin - 32)) & 1
    }
}

/// Reset the bus/FIFO state machines. The RX FIFO reset completes
/// asynchronously; wait for the handshake to clear.
#[link_section = ".iram1.cam_conf_reset"]
pub(crate) unsafe fn conf_reset() {
    let lc_flags = I2S_IN_RST | I2S_AHBM_RST | I2S_AHBM_FIFO_RST;
    reg_set_bits(I2S_LC_CONF_REG, lc_flags);
    reg_clear_bits(I2S_LC_CONF_REG, lc_flags);

    let conf_flags = I2S_RX_RESET | I2S_RX_FIFO_RESET | I2S_TX_RESET | I2S_TX_FIFO_RESET;
    reg_set_bits(I2S_CONF_REG, conf_flags);
    reg_clear_bits(I2S_CONF_REG, conf_flags);
    while reg_read(I2S_STATE_REG) & I2S_RX_FIFO_RESET_BACK != 0 {}
}

#[link_section = ".iram1.cam_rx_start"]
pub(crate) unsafe fn set_rx_start(on: bool) {
    if on {
        reg_set_bits(I2S_CONF_REG, I2S_RX_START);
    } else {
        reg_clear_bits(I2S_CONF_REG, I2S_RX_START);
    }
}

pub(crate) unsafe fn is_running() -> bool {
    reg_read(I2S_CONF_REG) & I2S_RX_START != 0
}

/// Point the inbound link engine at a descriptor and start it.
#[link_section = ".iram1.cam_in_link"]
pub(crate) unsafe fn start_in_link(desc_addr: u32) {
    let v = reg_read(I2S_IN_LINK_REG) & !(I2S_INLINK_ADDR_MASK | I2S_INLINK_START);
    reg_write(I2S_IN_LINK_REG, v | (desc_addr & I2S_INLINK_ADDR_MASK));
    reg_set_bits(I2S_IN_LINK_REG, I2S_INLINK_START);
}

#[link_section = ".iram1.cam_in_link_stop"]
pub(crate) unsafe fn stop_in_link() {
    reg_clear_bits(I2S_IN_LINK_REG, I2S_INLINK_START);
}

#[link_section = ".iram1.cam_rx_eof"]
pub(crate) unsafe fn set_rx_eof_num(samples: u32) {
    reg_write(I2S_RXEOF_NUM_REG, samples);
}

/// Acknowledge every pending interrupt.
#[link_section = ".iram1.cam_int_clear"]
pub(crate) unsafe fn clear_interrupts() {
    reg_write(I2S_INT_CLR_REG, reg_read(I2S_INT_RAW_REG));
}

/// Enable only the per-descriptor completion interrupt.
#[link_section = ".iram1.cam_int_ena"]
pub(crate) unsafe fn enable_in_done_only() {
    reg_write(I2S_INT_ENA_REG, 0);
    reg_set_bits(I2S_INT_ENA_REG, I2S_IN_DONE_INT);
}

/// The allocated peripheral interrupt for I2S0.
pub(crate) struct I2sInterrupt {
    handle: intr_handle_t,
}

unsafe impl Send for I2sInterrupt {}
unsafe impl Sync for I2sInterrupt {}

impl I2sInterrupt {
    /// Raw handle, published to the shared capture state so the stop path
    /// can disable the interrupt from ISR context.
    pub fn handle(&self) -> intr_handle_t {
        self.handle
    }
}

impl Drop for I2sInterrupt {
    fn drop(&mut self) {
        unsafe {
            esp_intr_disable(self.handle);
            esp_intr_free(self.handle);
        }
    }
}

/// Route the sensor pins into I2S0 and configure slave camera mode.
///
/// The allocated interrupt starts disabled; `start` enables it per
/// capture.
pub(crate) unsafe fn init(
    data_pins: &[i32; 8],
    pin_vsync: i32,
    pin_href: i32,
    pin_pclk: i32,
    sampling: SamplingMode,
    isr: unsafe extern "C" fn(*mut c_void),
    isr_arg: *mut c_void,
) -> Result<I2sInterrupt, CameraError> {
    // All sensor-driven lines are plain inputs with pull-ups.
    let mut pins = [0i32; 11];
    pins[..8].copy_from_slice(data_pins);
    pins[8] = pin_vsync;
    pins[9] = pin_href;
    pins[10] = pin_pclk;
    for &pin in &pins {
        if rtc_gpio_is_valid_gpio(pin) {
            rtc_gpio_deinit(pin);
        }
        let conf = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
            pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
            ..Default::default()
        };
        esp_ok("gpio_config", gpio_config(&conf))?;
    }

    // Route through the GPIO matrix into the camera inputs.
    gpio_matrix_in(data_pins[0] as u32, I2S0I_DATA_IN0_IDX, false);
    gpio_matrix_in(data_pins[1] as u32, I2S0I_DATA_IN1_IDX, false);
    gpio_matrix_in(data_pins[2] as u32, I2S0I_DATA_IN2_IDX, false);
    gpio_matrix_in(data_pins[3] as u32, I2S0I_DATA_IN3_IDX, false);
    gpio_matrix_in(data_pins[4] as u32, I2S0I_DATA_IN4_IDX, false);
    gpio_matrix_in(data_pins[5] as u32, I2S0I_DATA_IN5_IDX, false);
    gpio_matrix_in(data_pins[6] as u32, I2S0I_DATA_IN6_IDX, false);
    gpio_matrix_in(data_pins[7] as u32, I2S0I_DATA_IN7_IDX, false);
    gpio_matrix_in(pin_vsync as u32, I2S0I_V_SYNC_IDX, false);
    gpio_matrix_in(MATRIX_CONST_HIGH_INPUT, I2S0I_H_SYNC_IDX, false);
    gpio_matrix_in(pin_href as u32, I2S0I_H_ENABLE_IDX, false);
    gpio_matrix_in(pin_pclk as u32, I2S0I_WS_IN_IDX, false);

    periph_module_enable(periph_module_t_PERIPH_I2S0_MODULE);
    conf_reset();

    // Slave mode: the sensor's PCLK samples the bus.
    reg_set_bits(I2S_CONF_REG, I2S_RX_SLAVE_MOD);
    // Parallel mode gated by VSYNC/HSYNC/HREF.
    reg_set_bits(I2S_CONF2_REG, I2S_LCD_EN | I2S_CAMERA_EN);
    // Minimum clock divider; the receive clock is external anyway.
    let clkm: u32 =
        (1 << I2S_CLKM_DIV_A_SHIFT) | (0 << I2S_CLKM_DIV_B_SHIFT) | (2 << I2S_CLKM_DIV_NUM_SHIFT);
    reg_write(I2S_CLKM_CONF_REG, clkm);
    // FIFO sinks into the descriptor chain with the requested packing.
    let fifo = reg_read(I2S_FIFO_CONF_REG) & !I2S_RX_FIFO_MOD_MASK;
    reg_write(
        I2S_FIFO_CONF_REG,
        fifo | I2S_DSCR_EN
            | (sampling.fifo_mod() << I2S_RX_FIFO_MOD_SHIFT)
            | I2S_RX_FIFO_MOD_FORCE_EN,
    );
    let chan = reg_read(I2S_CONF_CHAN_REG) & !I2S_RX_CHAN_MOD_MASK;
    reg_write(I2S_CONF_CHAN_REG, chan | (1 << I2S_RX_CHAN_MOD_SHIFT));
    // Clear the serial-mode leftovers.
    reg_clear_bits(I2S_SAMPLE_RATE_CONF_REG, I2S_RX_BITS_MOD_MASK);
    reg_clear_bits(
        I2S_CONF_REG,
        I2S_RX_RIGHT_FIRST | I2S_RX_MSB_RIGHT | I2S_RX_MSB_SHIFT | I2S_RX_MONO | I2S_RX_SHORT_SYNC,
    );
    reg_write(I2S_TIMING_REG, 0);
    reg_set_bits(I2S_TIMING_REG, I2S_RX_DSYNC_SW);

    // The capture interrupt stays disabled until a transfer starts.
    let mut handle: intr_handle_t = core::ptr::null_mut();
    let flags = (ESP_INTR_FLAG_INTRDISABLED | ESP_INTR_FLAG_LOWMED | ESP_INTR_FLAG_IRAM) as i32;
    esp_ok(
        "esp_intr_alloc",
        esp_intr_alloc(
            ETS_I2S0_INTR_SOURCE as i32,
            flags,
            Some(isr),
            isr_arg,
            &mut handle,
        ),
    )?;

    log::debug!("I2S0 configured for camera slave mode (fifo_mod={})", sampling.fifo_mod());
    Ok(I2sInterrupt { handle })
}

/// Tear the peripheral clock down after the interrupt is freed.
pub(crate) unsafe fn deinit_peripheral() {
    periph_module_disable(periph_module_t_PERIPH_I2S0_MODULE);
}
