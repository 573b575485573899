//! Instance manager

use super::{Bridge, InstanceWrapper};
use crate::errors::Result;
use crate::native::raw_id;
use crate::registry::ResourceHandle;

impl Bridge {
    /// Creates the root native context.
    ///
    /// Fails only when the wrapper itself cannot be allocated. A native
    /// refusal still produces a handle, holding a null reference that every
    /// downstream operation rejects as an invalid instance.
    pub fn create_instance(&self) -> Result<ResourceHandle> {
        let shared = &self.shared;
        let reservation = shared.registry.reserve(shared.tags.instance)?;
        let native = shared.api.create_instance();
        match native {
            Some(raw) => log::debug!("native instance {} created", raw_id(raw)),
            None => log::warn!("native instance creation failed, handing out a null instance"),
        }
        Ok(reservation.wrap(InstanceWrapper { native }))
    }
}
