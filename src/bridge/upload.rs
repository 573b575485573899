//! Data uploader
//!
//! Writes go through the device's single default queue at offset 0. A
//! successful return means the native queue accepted the data; when the GPU
//! observes it is governed by the native queue's submission order.

use super::Bridge;
use crate::errors::{BridgeError, Result};
use crate::registry::ResourceHandle;

impl Bridge {
    /// Uploads `data` into the start of `buffer`.
    ///
    /// Data shorter than the buffer updates only that prefix. Data longer than
    /// the buffer's recorded size is rejected whole; nothing is written.
    pub fn write_buffer(
        &self,
        device: &ResourceHandle,
        buffer: &ResourceHandle,
        data: &[u8],
    ) -> Result<()> {
        let shared = &self.shared;
        let raw_device = shared.device(device)?;
        let (raw_buffer, wrapper) = shared.buffer(buffer)?;

        if wrapper.device != device.id() {
            log::warn!(
                "buffer {} belongs to device {}, not {}",
                buffer.id(),
                wrapper.device,
                device.id()
            );
            return Err(BridgeError::InvalidBuffer);
        }

        let len = data.len() as u64;
        if len > wrapper.size {
            return Err(BridgeError::SizeMismatch {
                len,
                size: wrapper.size,
            });
        }

        shared
            .api
            .write_buffer(raw_device, raw_buffer, 0, data)
            .map_err(|reason| {
                log::warn!("native write into buffer {} failed: {reason}", buffer.id());
                BridgeError::WriteFailed(reason)
            })
    }
}
