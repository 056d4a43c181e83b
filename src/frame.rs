use camera_core::PixelFormat;

use crate::error::CameraError;

/// Capture time, split the way the sensor pipeline stamps it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    /// Seconds since boot.
    pub sec: u64,
    /// Microsecond remainder.
    pub usec: u32,
}

impl Timestamp {
    pub(crate) fn now() -> Self {
        let us = unsafe { esp_idf_sys::esp_timer_get_time() } as u64;
        Timestamp {
            sec: us / 1_000_000,
            usec: (us % 1_000_000) as u32,
        }
    }
}

/// One captured frame.
///
/// Owned by the session while the capture is in flight, by the caller once
/// `capture` returns it. `release` frees the backing bytes early; the
/// buffer also frees itself on drop.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Option<Vec<u8>>,
    len: usize,
    width: usize,
    height: usize,
    format: PixelFormat,
    timestamp: Timestamp,
}

impl FrameBuffer {
    /// Allocate a zeroed buffer of `size` bytes.
    pub(crate) fn alloc(size: usize, format: PixelFormat) -> Result<Self, CameraError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size)
            .map_err(|_| CameraError::OutOfMemory("frame buffer"))?;
        buf.resize(size, 0);
        Ok(FrameBuffer {
            buf: Some(buf),
            len: 0,
            width: 0,
            height: 0,
            format,
            timestamp: Timestamp::default(),
        })
    }

    /// Valid frame bytes. Fails after `release`.
    pub fn data(&self) -> Result<&[u8], CameraError> {
        match &self.buf {
            Some(buf) => Ok(&buf[..self.len]),
            None => Err(CameraError::Invalidated),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Free the backing bytes and zero the metadata. Further `data` calls
    /// fail with `Invalidated`.
    pub fn release(&mut self) {
        self.buf = None;
        self.len = 0;
        self.width = 0;
        self.height = 0;
        self.format = PixelFormat::default();
        self.timestamp = Timestamp::default();
    }

    /// Whole backing allocation, including the slack past `len` that the
    /// JPEG trailer scan relies on.
    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len;
    }

    pub(crate) fn stamp(&mut self, width: usize, height: usize, format: PixelFormat) {
        self.width = width;
        self.height = height;
        self.format = format;
        self.timestamp = Timestamp::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_invalidates_reads() {
        let mut fb = FrameBuffer::alloc(64, PixelFormat::Jpeg).unwrap();
        fb.set_len(16);
        assert_eq!(fb.data().unwrap().len(), 16);
        fb.release();
        assert_eq!(fb.data(), Err(CameraError::Invalidated));
        assert_eq!(fb.len(), 0);
        assert_eq!(fb.width(), 0);
        assert_eq!(fb.format(), PixelFormat::default());
        assert_eq!(fb.timestamp(), Timestamp::default());
    }

    #[test]
    fn data_is_bounded_by_len_not_capacity() {
        let mut fb = FrameBuffer::alloc(128, PixelFormat::Jpeg).unwrap();
        fb.set_len(100);
        assert_eq!(fb.data().unwrap().len(), 100);
        assert_eq!(fb.bytes().len(), 128);
    }
}
