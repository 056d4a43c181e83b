//! ISR → worker → caller handoff.
//!
//! Two FreeRTOS objects: a 16-deep queue of DMA events feeding the
//! reformat worker, and a binary semaphore the blocking `capture` call
//! waits on. Both are owned here and deleted on drop.

use core::ffi::c_void;
use core::time::Duration;

use esp_idf_hal::delay::{TickType, BLOCK};
use esp_idf_sys::*;

use crate::error::CameraError;

/// Event queue depth; two full lines of UXGA headroom.
const EVENT_QUEUE_LEN: u32 = 16;

// Queue type codes from FreeRTOS' queue.h (the creation macros are not in
// the generated bindings).
const QUEUE_TYPE_BASE: u8 = 0;
const QUEUE_TYPE_BINARY_SEMAPHORE: u8 = 3;

/// One element of the worker queue.
///
/// `EndOfFrame` is the out-of-band sentinel; it is always enqueued after
/// the last buffer of its frame and acts as a barrier between frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DmaEvent {
    /// Descriptor `index` completed and its bounce buffer is ready.
    Buffer(usize),
    EndOfFrame,
}

pub(crate) struct Handoff {
    events: QueueHandle_t,
    frame_ready: QueueHandle_t,
}

unsafe impl Send for Handoff {}
unsafe impl Sync for Handoff {}

impl Handoff {
    pub fn new() -> Result<Self, CameraError> {
        let events = unsafe {
            xQueueGenericCreate(
                EVENT_QUEUE_LEN,
                core::mem::size_of::<DmaEvent>() as u32,
                QUEUE_TYPE_BASE,
            )
        };
        if events.is_null() {
            return Err(CameraError::OutOfMemory("DMA event queue"));
        }
        let frame_ready = unsafe { xQueueGenericCreate(1, 0, QUEUE_TYPE_BINARY_SEMAPHORE) };
        if frame_ready.is_null() {
            unsafe { vQueueDelete(events) };
            return Err(CameraError::OutOfMemory("frame semaphore"));
        }
        Ok(Handoff {
            events,
            frame_ready,
        })
    }

    /// Non-blocking enqueue from ISR context. Returns whether the event
    /// was accepted and records whether a higher-priority task woke.
    #[link_section = ".iram1.cam_handoff_send"]
    pub unsafe fn send_from_isr(&self, event: DmaEvent, woken: &mut bool) -> bool {
        let mut higher_woken: BaseType_t = 0;
        let ok = xQueueGenericSendFromISR(
            self.events,
            &event as *const DmaEvent as *const c_void,
            &mut higher_woken,
            0,
        );
        *woken = higher_woken != 0;
        ok == 1
    }

    /// Blocking dequeue; only the worker calls this.
    pub fn recv(&self) -> DmaEvent {
        let mut event = DmaEvent::EndOfFrame;
        loop {
            let ok = unsafe {
                xQueueReceive(
                    self.events,
                    &mut event as *mut DmaEvent as *mut c_void,
                    BLOCK,
                )
            };
            if ok == 1 {
                return event;
            }
        }
    }

    /// Release the completed frame to the waiting `capture` call.
    /// Idempotent per frame: a second give on the held semaphore is a
    /// no-op.
    pub fn release(&self) {
        unsafe {
            xQueueGenericSend(self.frame_ready, core::ptr::null(), 0, 0);
        }
    }

    /// Wait for a released frame. Returns false on timeout.
    pub fn wait_frame(&self, timeout: Duration) -> bool {
        let ticks = TickType::from(timeout).0;
        unsafe { xQueueSemaphoreTake(self.frame_ready, ticks) == 1 }
    }
}

impl Drop for Handoff {
    fn drop(&mut self) {
        unsafe {
            vQueueDelete(self.events);
            vQueueDelete(self.frame_ready);
        }
    }
}
