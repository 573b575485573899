//! Device acquisition
//!
//! Same protocol as adapter acquisition, one layer down. Every call owns its
//! own request state, so concurrent requests against one adapter never share
//! in-flight bookkeeping.

use std::sync::Arc;

use super::request::{Deadline, acquire};
use super::{Bridge, DeviceWrapper, Shared};
use crate::errors::{BridgeError, Result};
use crate::native::{DeviceDescriptor, raw_id};
use crate::registry::ResourceHandle;

impl Bridge {
    /// Requests a device from a resolved adapter. Blocks like
    /// [`Bridge::create_adapter`].
    pub fn create_device(&self, adapter: &ResourceHandle) -> Result<ResourceHandle> {
        let deadline = self.deadline();
        let shared = Arc::clone(&self.shared);
        let adapter = adapter.clone();
        self.scheduler
            .run_until(deadline.reply_by(), move || {
                shared.acquire_device(&adapter, deadline)
            })?
            .unwrap_or(Err(BridgeError::RequestTimedOut(deadline.timeout)))
    }
}

impl Shared {
    pub(crate) fn acquire_device(
        &self,
        adapter: &ResourceHandle,
        deadline: Deadline,
    ) -> Result<ResourceHandle> {
        let raw_adapter = self
            .registry
            .unwrap(adapter, self.tags.adapter)
            .map_err(|e| {
                log::warn!("rejected adapter argument: {e}");
                BridgeError::InvalidAdapter
            })?
            .native
            .ok_or(BridgeError::InvalidAdapter)?;

        let reservation = self.registry.reserve(self.tags.device)?;
        let label = self.settings.label("device");
        let descriptor = DeviceDescriptor {
            label: Some(&label),
        };
        let late_api = Arc::clone(&self.api);
        let raw = acquire(
            "device",
            deadline.timeout,
            deadline.at,
            |callback| self.api.request_device(raw_adapter, &descriptor, callback),
            move |late| late_api.release_device(late),
        )?;

        log::debug!(
            "device {} resolved from adapter {}",
            raw_id(raw),
            raw_id(raw_adapter)
        );
        Ok(reservation.wrap(DeviceWrapper {
            native: Some(raw),
            adapter: adapter.id(),
        }))
    }
}
