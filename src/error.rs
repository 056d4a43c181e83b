use thiserror::Error;

/// Errors surfaced by the camera driver.
///
/// ESP-IDF status codes never cross the public boundary; failed IDF calls
/// are logged with their raw code and mapped onto the variant that
/// describes what the caller can do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CameraError {
    #[error("camera session not initialized")]
    NotInitialized,

    #[error("no camera detected on the SCCB bus")]
    NotDetected,

    #[error("detected camera is not supported (pid=0x{pid:02X})")]
    NotSupported { pid: u8 },

    #[error("out of memory allocating {0}")]
    OutOfMemory(&'static str),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("transfer error: VSYNC never asserted after start")]
    TransferError,

    #[error("configuration error: {0}")]
    ConfigError(&'static str),

    #[error("frame buffer has been released")]
    Invalidated,
}

/// Map an ESP-IDF status code onto `ConfigError`, logging the raw code.
pub(crate) fn esp_ok(op: &'static str, code: esp_idf_sys::esp_err_t) -> Result<(), CameraError> {
    if code == esp_idf_sys::ESP_OK {
        Ok(())
    } else {
        log::error!("{} failed: {:#x}", op, code);
        Err(CameraError::ConfigError(op))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(
            CameraError::NotSupported { pid: 0x77 }.to_string(),
            "detected camera is not supported (pid=0x77)"
        );
        assert_eq!(
            CameraError::Timeout("frame").to_string(),
            "timed out waiting for frame"
        );
    }
}
