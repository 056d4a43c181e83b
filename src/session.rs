//! Camera session.
//!
//! Owns everything a capture needs: the external clock, the sensor driver,
//! the DMA ring, the shared ISR/worker state and the worker task. There is
//! at most one session per process; the public operations take the handle
//! explicitly.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use core::time::Duration;
use std::ffi::CString;
use std::sync::{Arc, Mutex};

use camera_core::{jpeg, DmaLayout, PixelFormat, Unpacker};
use esp_idf_hal::delay::FreeRtos;
use esp_idf_sys::*;

use crate::capture::{self, CaptureShared, CaptureState};
use crate::config::CameraConfig;
use crate::dma::DmaRing;
use crate::error::{esp_ok, CameraError};
use crate::frame::FrameBuffer;
use crate::handoff::Handoff;
use crate::i2s;
use crate::ov2640::OV2640_PID;
use crate::sccb::Sccb;
use crate::sensor::{self, GainCeiling, SensorDriver};
use crate::xclk::XClk;

/// Process-wide session guard; the DMA ring and I2S0 are singletons.
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Budget for the initial VSYNC edge after arming a transfer.
const VSYNC_WAIT_US: i64 = 1_000_000;
/// Budget for a whole frame to complete.
const FRAME_TIMEOUT: Duration = Duration::from_secs(4);

const WORKER_STACK_BYTES: u32 = 4096;
const WORKER_PRIORITY: u32 = 10;

/// Frame buffer allocation for a format/resolution/quality combination.
fn frame_buffer_size(format: PixelFormat, width: usize, height: usize, quality: u8) -> usize {
    match format {
        PixelFormat::Jpeg => jpeg::jpeg_fb_size(width, height, format.fb_bytes_per_pixel(), quality),
        _ => width * height * format.fb_bytes_per_pixel(),
    }
}

struct Inner {
    config: CameraConfig,
    sensor: Box<dyn SensorDriver>,
    #[allow(dead_code)] // held for its Drop: the sensor clock
    xclk: XClk,
    ring: DmaRing,
    shared: Arc<CaptureShared>,
    intr: Option<i2s::I2sInterrupt>,
    worker: TaskHandle_t,
    vsync_isr_added: bool,
}

impl Inner {
    /// Clear the ring, wait for the frame boundary and start the bus.
    fn run_transfer(&mut self) -> Result<(), CameraError> {
        self.ring.zero_buffers();
        self.shared.set_state(CaptureState::WaitingVsync);

        log::debug!("waiting for negative edge on VSYNC");
        let start = unsafe { esp_timer_get_time() };
        while unsafe { i2s::gpio_level_raw(self.config.pin_vsync) } != 0 {
            if unsafe { esp_timer_get_time() } - start > VSYNC_WAIT_US {
                log::error!("timeout waiting for VSYNC");
                self.shared.set_state(CaptureState::Idle);
                return Err(CameraError::TransferError);
            }
        }
        unsafe { capture::start_bus(&self.shared) };
        Ok(())
    }
}

/// An initialized camera.
///
/// Created by [`Camera::new`]; torn down by [`Camera::deinit`] or drop.
pub struct Camera {
    inner: Option<Inner>,
}

impl Camera {
    /// Probe the sensor and bring the whole capture pipeline up.
    ///
    /// Any failure unwinds everything allocated so far and leaves the
    /// process free to try again.
    pub fn new(config: CameraConfig) -> Result<Self, CameraError> {
        config.validate()?;
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(CameraError::ConfigError("another camera session is active"));
        }

        match Self::init_session(config) {
            Ok(inner) => Ok(Camera { inner: Some(inner) }),
            Err(err) => {
                SESSION_ACTIVE.store(false, Ordering::Release);
                Err(err)
            }
        }
    }

    fn init_session(config: CameraConfig) -> Result<Inner, CameraError> {
        log::debug!("enabling XCLK output");
        let xclk = XClk::enable(config.pin_xclk, config.xclk_freq_hz)?;

        log::debug!("initializing SCCB");
        let sccb = Sccb::init(config.pin_sda, config.pin_scl)?;

        cycle_power_and_reset(&config)?;
        FreeRtos::delay_ms(10);

        // On probe failure the clock and bus unwind through drop.
        let mut sensor = sensor::probe(sccb)?;
        log::debug!("software reset of sensor");
        sensor.reset()?;

        let format = config.pixel_format;
        let (width, height) = config.frame_size.dimensions();
        if format == PixelFormat::Jpeg && sensor.id().pid != OV2640_PID {
            return Err(CameraError::ConfigError(
                "JPEG output needs a JPEG-capable sensor",
            ));
        }
        if format == PixelFormat::Jpeg {
            sensor.set_quality(config.jpeg_quality)?;
        }

        let (unpacker, sampling) = Unpacker::select(format, config.high_speed());
        let fb_size = frame_buffer_size(format, width, height, config.jpeg_quality);
        log::debug!(
            "in_bpp: {}, fb_bpp: {}, fb_size: {}, mode: {:?}, width: {}, height: {}",
            format.in_bytes_per_pixel(),
            format.fb_bytes_per_pixel(),
            fb_size,
            sampling,
            width,
            height
        );

        let layout = DmaLayout::compute(width, format.in_bytes_per_pixel(), sampling)
            .map_err(|err| {
                log::error!("{}", err);
                CameraError::ConfigError("frame width does not split into DMA lines")
            })?;
        let ring = DmaRing::build(layout)?;
        let handoff = Handoff::new()?;

        let shared = Arc::new(CaptureShared {
            width,
            height,
            format,
            unpacker,
            stride: layout.output_stride(width, format.fb_bytes_per_pixel()),
            dma_per_line: layout.dma_per_line,
            fb_size: AtomicUsize::new(fb_size),
            desc_addrs: (0..ring.desc_count()).map(|i| ring.desc_addr(i)).collect(),
            buffers: (0..ring.desc_count()).map(|i| ring.buffer_view(i)).collect(),
            buf_capacity: layout.buf_size,
            desc_count: ring.desc_count(),
            sample_count: ring.total_samples() as u32,
            vsync_pin: config.pin_vsync,
            intr_handle: AtomicPtr::new(ptr::null_mut()),
            desc_cur: AtomicUsize::new(0),
            received: AtomicUsize::new(0),
            filtered: AtomicUsize::new(0),
            bad: AtomicBool::new(false),
            referenced: AtomicBool::new(false),
            state: AtomicU8::new(CaptureState::Idle as u8),
            handoff,
            frame: Mutex::new(None),
        });

        let mut inner = Inner {
            config,
            sensor,
            xclk,
            ring,
            shared,
            intr: None,
            worker: ptr::null_mut(),
            vsync_isr_added: false,
        };

        if let Err(err) = Self::init_capture(&mut inner) {
            inner.shared.set_state(CaptureState::Faulted);
            teardown(inner);
            return Err(err);
        }
        Ok(inner)
    }

    /// Peripheral, worker and interrupt bring-up; sensor configuration;
    /// one discarded settle frame.
    fn init_capture(inner: &mut Inner) -> Result<(), CameraError> {
        let config = inner.config.clone();
        let sampling = Unpacker::select(config.pixel_format, config.high_speed()).1;
        let shared_arg = Arc::as_ptr(&inner.shared) as *mut c_void;

        let intr = unsafe {
            i2s::init(
                &config.data_pins,
                config.pin_vsync,
                config.pin_href,
                config.pin_pclk,
                sampling,
                capture::i2s_isr,
                shared_arg,
            )?
        };
        inner
            .shared
            .intr_handle
            .store(intr.handle(), Ordering::Release);
        inner.intr = Some(intr);

        let task_name = CString::new("cam_filter")
            .map_err(|_| CameraError::ConfigError("worker task name"))?;
        let mut handle: TaskHandle_t = ptr::null_mut();
        let created = unsafe {
            xTaskCreatePinnedToCore(
                Some(capture::filter_task),
                task_name.as_ptr(),
                WORKER_STACK_BYTES,
                shared_arg,
                WORKER_PRIORITY,
                &mut handle,
                config.worker_core,
            )
        };
        if created != 1 {
            return Err(CameraError::OutOfMemory("reformat worker task"));
        }
        inner.worker = handle;

        unsafe {
            capture::vsync_intr_disable(config.pin_vsync);
            // The application may already own the GPIO ISR service.
            let err = gpio_install_isr_service((ESP_INTR_FLAG_LEVEL1 | ESP_INTR_FLAG_IRAM) as i32);
            if err != ESP_OK && err != ESP_ERR_INVALID_STATE as esp_err_t {
                esp_ok("gpio_install_isr_service", err)?;
            }
            esp_ok(
                "gpio_isr_handler_add",
                gpio_isr_handler_add(
                    config.pin_vsync,
                    Some(capture::vsync_isr),
                    shared_arg,
                ),
            )?;
        }
        inner.vsync_isr_added = true;

        log::debug!(
            "setting frame size to {}x{}",
            inner.shared.width,
            inner.shared.height
        );
        inner.sensor.set_framesize(config.frame_size)?;
        inner.sensor.set_pixformat(config.pixel_format)?;

        if inner.sensor.id().pid == OV2640_PID {
            inner.sensor.set_gainceiling(GainCeiling::X2)?;
            inner.sensor.set_bpc(false)?;
            inner.sensor.set_wpc(true)?;
            inner.sensor.set_lenc(true)?;
        }

        // Let one frame pass so AGC/AWB settle before the first capture.
        skip_frame(config.pin_vsync)?;
        inner.sensor.init_status()?;

        log::info!(
            "camera session ready: {:?} {}x{}",
            inner.shared.format,
            inner.shared.width,
            inner.shared.height
        );
        Ok(())
    }

    /// Capture one frame.
    ///
    /// Starts the peripheral if idle, then blocks until the worker
    /// releases a finished frame or the 4 s budget runs out. On timeout
    /// the transfer is stopped and the partial frame discarded; the
    /// session stays usable.
    pub fn capture(&mut self) -> Result<FrameBuffer, CameraError> {
        let inner = self.inner.as_mut().ok_or(CameraError::NotInitialized)?;
        let shared = Arc::clone(&inner.shared);

        if !unsafe { i2s::is_running() } {
            shared.bad.store(false, Ordering::Relaxed);
            shared.referenced.store(false, Ordering::Relaxed);
            // Drop any stale release left by a raced timeout.
            let _ = shared.handoff.wait_frame(Duration::ZERO);

            let fb = FrameBuffer::alloc(shared.fb_size.load(Ordering::Relaxed), shared.format)?;
            match shared.frame.lock() {
                Ok(mut guard) => *guard = Some(fb),
                Err(_) => return Err(CameraError::TransferError),
            }
            inner.run_transfer()?;
        }

        if !shared.handoff.wait_frame(FRAME_TIMEOUT) {
            // Mark the frame reclaimed first so the worker drops whatever
            // is still queued, then stop the bus.
            shared.referenced.store(true, Ordering::Relaxed);
            let mut need_yield = false;
            unsafe { capture::i2s_stop(&shared, &mut need_yield) };
            if let Ok(mut guard) = shared.frame.lock() {
                guard.take();
            }
            shared.set_state(CaptureState::Idle);
            return Err(CameraError::Timeout("frame"));
        }

        let fb = shared
            .frame
            .lock()
            .map_err(|_| CameraError::TransferError)?
            .take()
            .ok_or(CameraError::TransferError)?;
        Ok(fb)
    }

    /// Borrow the sensor driver for tuning while the session is alive.
    pub fn sensor(&self) -> Result<&dyn SensorDriver, CameraError> {
        self.inner
            .as_ref()
            .map(|inner| &*inner.sensor)
            .ok_or(CameraError::NotInitialized)
    }

    pub fn sensor_mut(&mut self) -> Result<&mut dyn SensorDriver, CameraError> {
        self.inner
            .as_mut()
            .map(|inner| &mut *inner.sensor)
            .ok_or(CameraError::NotInitialized)
    }

    /// Re-bound the JPEG frame buffer for a new quality setting and push
    /// the quality to the sensor. Takes effect at the next capture.
    pub fn recalculate_compression(&mut self, quality: u8) -> Result<(), CameraError> {
        let inner = self.inner.as_mut().ok_or(CameraError::NotInitialized)?;
        if !(4..=63).contains(&quality) {
            return Err(CameraError::ConfigError("jpeg quality out of range"));
        }
        inner.sensor.set_quality(quality)?;
        let (width, height) = inner.config.frame_size.dimensions();
        let size = frame_buffer_size(inner.config.pixel_format, width, height, quality);
        inner.shared.fb_size.store(size, Ordering::Relaxed);
        inner.config.jpeg_quality = quality;
        log::debug!("frame buffer bound recalculated to {} bytes (q={})", size, quality);
        Ok(())
    }

    /// Tear the session down. Idempotent; must not be called with a
    /// capture in flight.
    pub fn deinit(&mut self) -> Result<(), CameraError> {
        if let Some(inner) = self.inner.take() {
            teardown(inner);
            SESSION_ACTIVE.store(false, Ordering::Release);
        }
        Ok(())
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        let _ = self.deinit();
    }
}

/// Reverse-order teardown; tolerates a partially initialized session.
fn teardown(mut inner: Inner) {
    log::debug!(
        "tearing down camera session (state {})",
        inner.shared.state.load(Ordering::Relaxed)
    );
    unsafe {
        if i2s::is_running() {
            capture::stop_bus(&inner.shared);
        }
        if !inner.worker.is_null() {
            vTaskDelete(inner.worker);
            inner.worker = ptr::null_mut();
        }
        if inner.vsync_isr_added {
            gpio_isr_handler_remove(inner.config.pin_vsync);
        }
    }
    inner
        .shared
        .intr_handle
        .store(ptr::null_mut(), Ordering::Release);
    // Disable and free the I2S interrupt before the ring goes away.
    drop(inner.intr.take());
    unsafe { i2s::deinit_peripheral() };
    // Ring, handoff, SCCB bus and XCLK unwind with `inner`.
    log::info!("camera session deinitialized");
}

/// Cycle the power-down and reset lines at their configured polarities.
fn cycle_power_and_reset(config: &CameraConfig) -> Result<(), CameraError> {
    unsafe {
        if config.pin_pwdn >= 0 {
            log::debug!("resetting camera by power down line");
            let conf = gpio_config_t {
                pin_bit_mask: 1u64 << config.pin_pwdn,
                mode: gpio_mode_t_GPIO_MODE_OUTPUT,
                ..Default::default()
            };
            esp_ok("gpio_config", gpio_config(&conf))?;
            // Logic is inverted compared to the reset pin.
            gpio_set_level(config.pin_pwdn, 1);
            FreeRtos::delay_ms(10);
            gpio_set_level(config.pin_pwdn, 0);
            FreeRtos::delay_ms(10);
        }
        if config.pin_reset >= 0 {
            log::debug!("resetting camera");
            let conf = gpio_config_t {
                pin_bit_mask: 1u64 << config.pin_reset,
                mode: gpio_mode_t_GPIO_MODE_OUTPUT,
                ..Default::default()
            };
            esp_ok("gpio_config", gpio_config(&conf))?;
            gpio_set_level(config.pin_reset, 0);
            FreeRtos::delay_ms(10);
            gpio_set_level(config.pin_reset, 1);
            FreeRtos::delay_ms(10);
        }
    }
    Ok(())
}

/// Busy-wait one full frame period on VSYNC: low, high, low again.
fn skip_frame(pin_vsync: i32) -> Result<(), CameraError> {
    let start = unsafe { esp_timer_get_time() };
    let expired = || unsafe { esp_timer_get_time() } - start > VSYNC_WAIT_US;

    while unsafe { i2s::gpio_level_raw(pin_vsync) } == 0 {
        if expired() {
            return Err(CameraError::Timeout("VSYNC"));
        }
    }
    while unsafe { i2s::gpio_level_raw(pin_vsync) } != 0 {
        if expired() {
            return Err(CameraError::Timeout("VSYNC"));
        }
    }
    while unsafe { i2s::gpio_level_raw(pin_vsync) } == 0 {
        if expired() {
            return Err(CameraError::Timeout("VSYNC"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_core::FrameSize;

    #[test]
    fn frame_buffer_sizes_per_format_table() {
        let (w, h) = FrameSize::Qvga.dimensions();
        assert_eq!(frame_buffer_size(PixelFormat::Grayscale, w, h, 0), 76_800);
        assert_eq!(frame_buffer_size(PixelFormat::Rgb565, w, h, 0), 153_600);
        assert_eq!(frame_buffer_size(PixelFormat::Yuv422, w, h, 0), 153_600);
        assert_eq!(frame_buffer_size(PixelFormat::Rgb888, w, h, 0), 230_400);

        let (w, h) = FrameSize::Uxga.dimensions();
        assert_eq!(frame_buffer_size(PixelFormat::Jpeg, w, h, 12), 240_000);
        assert_eq!(frame_buffer_size(PixelFormat::Jpeg, w, h, 6), 384_000);
        assert_eq!(frame_buffer_size(PixelFormat::Jpeg, w, h, 4), 960_000);
    }
}
