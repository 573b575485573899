//! Adapter acquisition

use std::sync::Arc;

use super::request::{Deadline, acquire};
use super::{AdapterWrapper, Bridge, Shared};
use crate::errors::{BridgeError, Result};
use crate::native::raw_id;
use crate::registry::ResourceHandle;

impl Bridge {
    /// Requests an adapter from a resolved instance.
    ///
    /// Runs on the dirty scheduler and blocks the caller until the native
    /// callback fires or the request timeout expires. An instance handle that
    /// is of the wrong kind or holds a null reference fails immediately,
    /// without issuing a native request.
    pub fn create_adapter(&self, instance: &ResourceHandle) -> Result<ResourceHandle> {
        let deadline = self.deadline();
        let shared = Arc::clone(&self.shared);
        let instance = instance.clone();
        self.scheduler
            .run_until(deadline.reply_by(), move || {
                shared.acquire_adapter(&instance, deadline)
            })?
            .unwrap_or(Err(BridgeError::RequestTimedOut(deadline.timeout)))
    }
}

impl Shared {
    pub(crate) fn acquire_adapter(
        &self,
        instance: &ResourceHandle,
        deadline: Deadline,
    ) -> Result<ResourceHandle> {
        let raw_instance = self
            .registry
            .unwrap(instance, self.tags.instance)
            .map_err(|e| {
                log::warn!("rejected instance argument: {e}");
                BridgeError::InvalidInstance
            })?
            .native
            .ok_or(BridgeError::InvalidInstance)?;

        let reservation = self.registry.reserve(self.tags.adapter)?;
        let options = self.settings.adapter_options;
        let late_api = Arc::clone(&self.api);
        let raw = acquire(
            "adapter",
            deadline.timeout,
            deadline.at,
            |callback| self.api.request_adapter(raw_instance, &options, callback),
            move |late| late_api.release_adapter(late),
        )?;

        log::debug!(
            "adapter {} resolved from instance {}",
            raw_id(raw),
            raw_id(raw_instance)
        );
        Ok(reservation.wrap(AdapterWrapper {
            native: Some(raw),
            instance: instance.id(),
        }))
    }
}
