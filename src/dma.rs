//! DMA descriptor ring.
//!
//! The I2S RX engine walks a cyclic list of `lldesc`-format descriptors,
//! each pointing at a bounce buffer in DMA-capable internal RAM. The ring
//! is published to the hardware once at start; afterwards software only
//! reads the immutable buffer pointers.

use core::ptr;

use camera_core::DmaLayout;
use esp_idf_sys::{heap_caps_free, heap_caps_malloc, MALLOC_CAP_DMA};

use crate::error::CameraError;

// lldesc word 0 layout.
const DESC_SIZE_SHIFT: u32 = 0; // size[11:0]
const DESC_LENGTH_SHIFT: u32 = 12; // length[23:12]
const DESC_SOSF: u32 = 1 << 29;
const DESC_EOF: u32 = 1 << 30;
const DESC_OWNER_DMA: u32 = 1 << 31;

/// Hardware descriptor: control word, buffer pointer, next link.
#[repr(C, align(4))]
struct DmaDescriptor {
    header: u32,
    buf: *const u8,
    next: *mut DmaDescriptor,
}

impl DmaDescriptor {
    /// Program the control word. Every buffer is an end-of-frame candidate
    /// and owned by the DMA engine until it completes.
    unsafe fn program(desc: *mut DmaDescriptor, buf: *const u8, len: usize, next: *mut DmaDescriptor) {
        let header = ((len as u32) << DESC_SIZE_SHIFT)
            | ((len as u32) << DESC_LENGTH_SHIFT)
            | DESC_SOSF
            | DESC_EOF
            | DESC_OWNER_DMA;
        ptr::write_volatile(ptr::addr_of_mut!((*desc).header), header);
        ptr::write_volatile(ptr::addr_of_mut!((*desc).buf), buf);
        ptr::write_volatile(ptr::addr_of_mut!((*desc).next), next);
    }
}

/// The allocated ring: descriptor array plus one bounce buffer per entry.
pub(crate) struct DmaRing {
    desc: *mut DmaDescriptor,
    bufs: Vec<*mut u8>,
    lengths: Vec<usize>,
    layout: DmaLayout,
}

// The ring is created and torn down by the session and only handed to the
// worker task as raw buffer views; the allocations themselves never move.
unsafe impl Send for DmaRing {}
unsafe impl Sync for DmaRing {}

impl DmaRing {
    pub fn build(layout: DmaLayout) -> Result<Self, CameraError> {
        let count = layout.desc_count;
        log::debug!(
            "DMA ring: {} descriptors of {} bytes, {} per line ({} bytes total)",
            count,
            layout.buf_size,
            layout.dma_per_line,
            count * layout.buf_size
        );

        let desc = unsafe {
            heap_caps_malloc(count * core::mem::size_of::<DmaDescriptor>(), MALLOC_CAP_DMA)
        } as *mut DmaDescriptor;
        if desc.is_null() {
            return Err(CameraError::OutOfMemory("DMA descriptors"));
        }

        let mut ring = DmaRing {
            desc,
            bufs: Vec::with_capacity(count),
            lengths: Vec::with_capacity(count),
            layout,
        };

        for i in 0..count {
            let buf = unsafe { heap_caps_malloc(layout.buf_size, MALLOC_CAP_DMA) } as *mut u8;
            if buf.is_null() {
                // Drop unwinds the partial allocation.
                return Err(CameraError::OutOfMemory("DMA bounce buffer"));
            }
            ring.bufs.push(buf);
            ring.lengths.push(layout.desc_len(i));
        }

        unsafe {
            for i in 0..count {
                let next = ring.desc.add((i + 1) % count);
                DmaDescriptor::program(ring.desc.add(i), ring.bufs[i], ring.lengths[i], next);
            }
        }

        Ok(ring)
    }

    /// Physical address of descriptor `i` for the `in_link` register.
    pub fn desc_addr(&self, i: usize) -> u32 {
        unsafe { self.desc.add(i) as u32 }
    }

    /// Raw view of bounce buffer `i` and its programmed length, for the
    /// worker's unpack step.
    pub fn buffer_view(&self, i: usize) -> (*const u8, usize) {
        (self.bufs[i] as *const u8, self.lengths[i])
    }

    pub fn desc_count(&self) -> usize {
        self.layout.desc_count
    }

    /// Total 32-bit samples in one lap of the ring.
    pub fn total_samples(&self) -> usize {
        self.layout.total_samples()
    }

    /// Clear every bounce buffer before a capture starts.
    pub fn zero_buffers(&mut self) {
        for (buf, len) in self.bufs.iter().zip(self.lengths.iter()) {
            unsafe {
                ptr::write_bytes(*buf, 0, *len);
            }
        }
    }
}

impl Drop for DmaRing {
    fn drop(&mut self) {
        unsafe {
            for buf in self.bufs.drain(..) {
                heap_caps_free(buf as *mut core::ffi::c_void);
            }
            if !self.desc.is_null() {
                heap_caps_free(self.desc as *mut core::ffi::c_void);
                self.desc = ptr::null_mut();
            }
        }
    }
}
