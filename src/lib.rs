//! Camera capture driver for OV2640-class parallel sensors on the ESP32.
//!
//! The sensor streams pixels into I2S0 running in slave/camera mode; DMA
//! moves them through a cyclic descriptor ring of bounce buffers, and a
//! worker task reformats each buffer into the caller's pixel layout. One
//! finished frame at a time is handed to the blocking [`Camera::capture`]
//! call.
//!
//! ```no_run
//! use esp32_camera::{Camera, CameraConfig};
//!
//! # fn run(config: CameraConfig) -> Result<(), esp32_camera::CameraError> {
//! let mut camera = Camera::new(config)?;
//! let frame = camera.capture()?;
//! log::info!("{} bytes of {:?}", frame.len(), frame.format());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod sensor;

mod capture;
mod dma;
mod handoff;
mod i2s;
mod ov2640;
mod sccb;
mod session;
mod xclk;

pub use camera_core::{FrameSize, PixelFormat};
pub use config::CameraConfig;
pub use error::CameraError;
pub use frame::{FrameBuffer, Timestamp};
pub use session::Camera;
pub use sensor::{GainCeiling, SensorDriver, SensorId, SensorStatus};
