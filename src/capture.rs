//! Capture state machine.
//!
//! Three execution contexts share this module's state: the I2S
//! descriptor-done ISR, the VSYNC falling-edge ISR and the reformat worker
//! task. The ISRs only touch atomics, registers and the non-blocking side
//! of the handoff queue; the worker owns the frame buffer contents.

use core::ffi::c_void;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicUsize, Ordering};
use std::sync::Mutex;

use camera_core::{jpeg, PixelFormat, Unpacker};
use esp_idf_sys::*;

use crate::frame::FrameBuffer;
use crate::handoff::{DmaEvent, Handoff};
use crate::i2s;

// The xtensa port's yield-from-ISR entry point is a plain function but is
// not part of the generated bindings.
extern "C" {
    fn vPortYieldFromISR();
}

/// Capture progress, kept for logging and teardown sanity checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum CaptureState {
    Idle = 0,
    WaitingVsync = 1,
    Capturing = 2,
    Draining = 3,
    Faulted = 4,
}

/// State shared between the session, the worker task and both ISRs.
///
/// The geometry fields and ring views are written once at init and
/// read-only afterwards; the counters and flags are the ISR-safe mutable
/// surface. The frame buffer itself lives behind a mutex that only the
/// worker and the requesting task ever take.
pub(crate) struct CaptureShared {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub unpacker: Unpacker,
    /// Output bytes per bounce buffer.
    pub stride: usize,
    pub dma_per_line: usize,
    /// Frame buffer allocation size; revised by `recalculate_compression`.
    pub fb_size: AtomicUsize,

    /// Physical descriptor addresses, published once by the ring.
    pub desc_addrs: Vec<u32>,
    /// Bounce buffer base pointers with their programmed lengths.
    pub buffers: Vec<(*const u8, usize)>,
    /// Allocation size of every bounce buffer (tail reads overshoot the
    /// programmed length on shortened descriptors).
    pub buf_capacity: usize,
    pub desc_count: usize,
    /// `rx_eof_num` watermark for one lap of the ring.
    pub sample_count: u32,

    pub vsync_pin: i32,
    /// I2S interrupt handle; the stop path disables it from ISR context.
    pub intr_handle: AtomicPtr<intr_handle_data_t>,

    pub desc_cur: AtomicUsize,
    pub received: AtomicUsize,
    pub filtered: AtomicUsize,
    /// Frame spoiled (queue overflow, bad JPEG header); recovered by
    /// restarting the bus without releasing the handoff.
    pub bad: AtomicBool,
    /// The session reclaimed the in-flight frame (timeout path); the
    /// worker must stop writing into it.
    pub referenced: AtomicBool,
    pub state: AtomicU8,

    pub handoff: Handoff,
    pub frame: Mutex<Option<FrameBuffer>>,
}

// Raw ring views are only dereferenced by the worker while the session
// keeps the ring alive.
unsafe impl Send for CaptureShared {}
unsafe impl Sync for CaptureShared {}

impl CaptureShared {
    pub fn set_state(&self, state: CaptureState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    fn is_jpeg(&self) -> bool {
        self.format == PixelFormat::Jpeg
    }
}

#[link_section = ".iram1.cam_intr_disable"]
unsafe fn peripheral_intr_disable(shared: &CaptureShared) {
    let handle = shared.intr_handle.load(Ordering::Acquire);
    if !handle.is_null() {
        esp_intr_disable(handle);
    }
}

unsafe fn peripheral_intr_enable(shared: &CaptureShared) {
    let handle = shared.intr_handle.load(Ordering::Acquire);
    if !handle.is_null() {
        esp_intr_enable(handle);
    }
}

unsafe fn vsync_intr_enable(pin: i32) {
    gpio_set_intr_type(pin, gpio_int_type_t_GPIO_INTR_NEGEDGE);
}

#[link_section = ".iram1.cam_vsync_off"]
pub(crate) unsafe fn vsync_intr_disable(pin: i32) {
    gpio_set_intr_type(pin, gpio_int_type_t_GPIO_INTR_DISABLE);
}

/// Arm the ring from descriptor 0 and start receiving.
///
/// Called by the requesting task for the first frame and by the worker
/// when a bad or empty frame is retried.
pub(crate) unsafe fn start_bus(shared: &CaptureShared) {
    shared.desc_cur.store(0, Ordering::Relaxed);
    shared.received.store(0, Ordering::Relaxed);
    peripheral_intr_disable(shared);
    i2s::conf_reset();

    i2s::set_rx_eof_num(shared.sample_count);
    i2s::start_in_link(shared.desc_addrs[0]);
    i2s::clear_interrupts();
    i2s::enable_in_done_only();

    peripheral_intr_enable(shared);
    i2s::set_rx_start(true);
    shared.set_state(CaptureState::Capturing);
    // Fixed-size formats count descriptors; the JPEG stream length is
    // unknown, so end of frame comes from the VSYNC edge instead.
    if shared.is_jpeg() {
        vsync_intr_enable(shared.vsync_pin);
    }
}

#[link_section = ".iram1.cam_stop_bus"]
pub(crate) unsafe fn stop_bus(shared: &CaptureShared) {
    peripheral_intr_disable(shared);
    vsync_intr_disable(shared.vsync_pin);
    i2s::conf_reset();
    i2s::set_rx_start(false);
}

/// Stop the transfer and push the end-of-frame sentinel.
///
/// A spoiled frame keeps the bus running; the worker restarts cleanly once
/// it drains the sentinel.
#[link_section = ".iram1.cam_i2s_stop"]
pub(crate) unsafe fn i2s_stop(shared: &CaptureShared, need_yield: &mut bool) {
    if !shared.bad.load(Ordering::Relaxed) {
        stop_bus(shared);
        shared.set_state(CaptureState::Draining);
    } else {
        shared.received.store(0, Ordering::Relaxed);
    }

    let mut woken = false;
    let sent = shared.handoff.send_from_isr(DmaEvent::EndOfFrame, &mut woken);
    if !*need_yield {
        *need_yield = sent && woken;
    }
}

/// Advance the ring cursor and hand the completed buffer to the worker.
#[link_section = ".iram1.cam_buf_received"]
unsafe fn signal_dma_buf_received(shared: &CaptureShared, need_yield: &mut bool) {
    let filled = shared.desc_cur.load(Ordering::Relaxed);
    shared
        .desc_cur
        .store((filled + 1) % shared.desc_count, Ordering::Relaxed);
    shared.received.fetch_add(1, Ordering::Relaxed);

    if !shared.referenced.load(Ordering::Relaxed) && shared.bad.load(Ordering::Relaxed) {
        *need_yield = false;
        return;
    }

    let mut woken = false;
    let sent = shared
        .handoff
        .send_from_isr(DmaEvent::Buffer(filled), &mut woken);
    if !sent && !shared.referenced.load(Ordering::Relaxed) {
        // Worker fell behind and the queue is full; the frame is lost.
        shared.bad.store(true, Ordering::Relaxed);
    }
    *need_yield = sent && woken;
}

/// Descriptor-done interrupt: one bounce buffer completed.
#[link_section = ".iram1.cam_i2s_isr"]
pub(crate) unsafe extern "C" fn i2s_isr(arg: *mut c_void) {
    let shared = &*(arg as *const CaptureShared);
    i2s::clear_interrupts();

    let mut need_yield = false;
    signal_dma_buf_received(shared, &mut need_yield);

    if !shared.is_jpeg()
        && shared.received.load(Ordering::Relaxed) == shared.height * shared.dma_per_line
    {
        i2s_stop(shared, &mut need_yield);
    }

    if need_yield {
        vPortYieldFromISR();
    }
}

/// VSYNC falling edge: end of a JPEG frame, or a restart point when no
/// usable data arrived yet.
#[link_section = ".iram1.cam_vsync_isr"]
pub(crate) unsafe extern "C" fn vsync_isr(arg: *mut c_void) {
    let shared = &*(arg as *const CaptureShared);
    let mut need_yield = false;

    if i2s::gpio_level_raw(shared.vsync_pin) == 0 {
        if shared.received.load(Ordering::Relaxed) > 0 {
            signal_dma_buf_received(shared, &mut need_yield);
            if shared.filtered.load(Ordering::Relaxed) > 1 || shared.bad.load(Ordering::Relaxed) {
                i2s_stop(shared, &mut need_yield);
            }
        }
        if shared.filtered.load(Ordering::Relaxed) < 2 {
            // A short VSYNC this early means the sensor has not produced a
            // real frame yet; re-arm the ring in place and keep waiting
            // instead of releasing a runt frame.
            i2s::set_rx_start(false);
            i2s::stop_in_link();
            i2s::clear_interrupts();
            i2s::conf_reset();
            let cur =
                (shared.desc_cur.load(Ordering::Relaxed) + 1) % shared.desc_count;
            shared.desc_cur.store(cur, Ordering::Relaxed);
            i2s::start_in_link(shared.desc_addrs[cur]);
            i2s::set_rx_start(true);
            shared.received.store(0, Ordering::Relaxed);
        }
    }

    if need_yield {
        vPortYieldFromISR();
    }
}

/// Reformat worker task entry. Parameter is a raw pointer to the shared
/// state; the session keeps it alive until after the task is deleted.
pub(crate) unsafe extern "C" fn filter_task(arg: *mut c_void) {
    let shared = &*(arg as *const CaptureShared);
    shared.filtered.store(0, Ordering::Relaxed);
    loop {
        match shared.handoff.recv() {
            DmaEvent::Buffer(index) => filter_buffer(shared, index),
            DmaEvent::EndOfFrame => finish_frame(shared),
        }
    }
}

/// Unpack one bounce buffer into the frame at the running write position.
fn filter_buffer(shared: &CaptureShared, index: usize) {
    if shared.referenced.load(Ordering::Relaxed) || shared.bad.load(Ordering::Relaxed) {
        return;
    }

    let stride = shared.stride;
    let fb_pos = shared.filtered.load(Ordering::Relaxed) * stride;

    let mut guard = match shared.frame.lock() {
        Ok(guard) => guard,
        Err(_) => return,
    };
    let fb = match guard.as_mut() {
        Some(fb) => fb,
        None => return,
    };
    if fb_pos + stride > fb.bytes().len() {
        // Overrun: more buffers arrived than the frame can hold.
        return;
    }

    let (src_ptr, len) = shared.buffers[index];
    let src = unsafe { core::slice::from_raw_parts(src_ptr, shared.buf_capacity) };
    let first = shared.filtered.load(Ordering::Relaxed) == 0;
    shared
        .unpacker
        .run(src, len, &mut fb.bytes_mut()[fb_pos..fb_pos + stride]);

    if first {
        if shared.format == PixelFormat::Jpeg && !jpeg::has_soi_prefix(fb.bytes()) {
            log::warn!(
                "bad JPEG header {:02x} {:02x} {:02x}",
                fb.bytes()[0],
                fb.bytes()[1],
                fb.bytes()[2]
            );
            shared.bad.store(true, Ordering::Relaxed);
            return;
        }
        fb.stamp(shared.width, shared.height, shared.format);
    }
    shared.filtered.fetch_add(1, Ordering::Relaxed);
}

/// End-of-frame sentinel: finalize and release, or restart on a spoiled or
/// empty frame.
fn finish_frame(shared: &CaptureShared) {
    if !shared.referenced.load(Ordering::Relaxed) {
        if shared.bad.load(Ordering::Relaxed) {
            shared.bad.store(false, Ordering::Relaxed);
            if let Ok(mut guard) = shared.frame.lock() {
                if let Some(fb) = guard.as_mut() {
                    fb.set_len(0);
                    let bytes = fb.bytes_mut();
                    if bytes.len() >= 4 {
                        bytes[..4].fill(0);
                    }
                }
            }
            unsafe { start_bus(shared) };
        } else {
            let mut released = false;
            if let Ok(mut guard) = shared.frame.lock() {
                if let Some(fb) = guard.as_mut() {
                    let mut len = shared.filtered.load(Ordering::Relaxed) * shared.stride;
                    if len != 0 {
                        if shared.format == PixelFormat::Jpeg {
                            // Everything past the end-of-image marker is
                            // filler from whole-buffer ingest.
                            if let Some(end) = jpeg::find_trailer(fb.bytes(), len) {
                                len = jpeg::pad_length(end);
                            }
                        }
                        fb.set_len(len);
                        released = true;
                    }
                }
            }
            if released {
                shared.set_state(CaptureState::Idle);
                shared.handoff.release();
            } else {
                // An empty frame; run another one.
                unsafe { start_bus(shared) };
            }
        }
    } else {
        let has_frame = shared
            .frame
            .lock()
            .map(|guard| guard.as_ref().map_or(false, |fb| fb.len() != 0))
            .unwrap_or(false);
        if has_frame {
            shared.handoff.release();
        }
    }
    shared.filtered.store(0, Ordering::Relaxed);
}
