//! Camera Core - Hardware-independent capture logic for the ESP32 camera
//! driver.
//!
//! Everything in this crate is pure computation over byte slices and
//! integers: pixel format tables, DMA ring sizing, the bounce-buffer
//! unpackers and JPEG stream finalization. The firmware crate feeds it DMA
//! buffers; the host feeds it test vectors.

pub mod format;
pub mod jpeg;
pub mod layout;
pub mod unpack;

pub use format::{FrameSize, PixelFormat, SamplingMode};
pub use layout::DmaLayout;
pub use unpack::Unpacker;
