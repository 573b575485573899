//! Buffer manager

use super::{Bridge, BufferWrapper};
use crate::errors::{BridgeError, Result};
use crate::native::{BufferDescriptor, raw_id};
use crate::registry::ResourceHandle;
use crate::usage::BufferUsage;

impl Bridge {
    /// Creates a buffer of `size` bytes on a resolved device.
    ///
    /// `size` must convert losslessly into the native `u64` size; zero is
    /// accepted. `usage` is a set of symbolic tokens, each mapping to one bit
    /// of the native mask; an unknown token fails the whole call.
    pub fn create_buffer<S, I, T>(
        &self,
        device: &ResourceHandle,
        size: S,
        usage: I,
    ) -> Result<ResourceHandle>
    where
        S: TryInto<u64>,
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let shared = &self.shared;
        let raw_device = shared.device(device)?;
        let size: u64 = size.try_into().map_err(|_| BridgeError::InvalidSize)?;
        let usage = BufferUsage::parse(usage)?;

        let reservation = shared.registry.reserve(shared.tags.buffer)?;
        let label = shared.settings.label("buffer");
        let descriptor = BufferDescriptor {
            label: Some(&label),
            size,
            usage,
        };
        let Some(raw) = shared.api.create_buffer(raw_device, &descriptor) else {
            log::warn!("native buffer allocation of {size} bytes failed");
            return Err(BridgeError::AllocFailed);
        };

        log::debug!(
            "buffer {} created: {size} bytes, usage {:?}",
            raw_id(raw),
            usage.tokens()
        );
        Ok(reservation.wrap(BufferWrapper {
            native: Some(raw),
            size,
            usage,
            device: device.id(),
        }))
    }
}
