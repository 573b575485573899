//! Resource Registry
//!
//! Owns the table of resource types and mediates every wrap and unwrap.
//!
//! The table is filled once through a [`RegistryBuilder`] and frozen into a
//! [`Registry`]; after that it is only read, so lookups take no lock. Each
//! registry has its own id, baked into every [`TypeTag`] it hands out and
//! every wrapper it creates, which is how handles from a different registry
//! are told apart from valid ones.
//!
//! ```rust,ignore
//! let mut builder = RegistryBuilder::new();
//! let buffer_tag = builder.register_type::<Vec<u8>>("buffer", |_| {})?;
//! let registry = builder.build(None);
//!
//! let handle = registry.wrap(buffer_tag, vec![0u8; 16])?;
//! assert_eq!(registry.unwrap(&handle, buffer_tag)?.len(), 16);
//! ```

mod handle;

pub use handle::{Reservation, ResourceHandle, ResourceId};

use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use thiserror::Error;

use crate::errors::BridgeError;

static NEXT_REGISTRY_ID: AtomicU32 = AtomicU32::new(1);

type ReleaseFn = Box<dyn Fn(&mut (dyn Any + Send + Sync)) + Send + Sync>;

/// Registry-level failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("resource type {0:?} is already registered")]
    DuplicateType(&'static str),

    #[error("expected a {expected} handle, got a {found} handle")]
    InvalidHandle {
        expected: &'static str,
        found: &'static str,
    },

    #[error("live handle limit of {limit} reached")]
    Exhausted { limit: usize },

    #[error("type tag belongs to another registry")]
    ForeignTag,
}

impl From<RegistryError> for BridgeError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::DuplicateType(_) | RegistryError::ForeignTag => {
                BridgeError::Registration(err.to_string())
            }
            RegistryError::Exhausted { .. } => BridgeError::AllocFailed,
            // Bridge calls map this to the argument's own kind before it gets here.
            RegistryError::InvalidHandle { expected, found } => {
                BridgeError::InvalidHandle { expected, found }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TagId {
    registry: u32,
    index: u32,
}

/// Typed tag for one registered resource type.
///
/// The payload type is fixed at registration, so wrapping the wrong payload
/// is a compile error; the runtime check in [`Registry::unwrap`] covers the
/// untyped handles coming back from the host.
pub struct TypeTag<T> {
    id: TagId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for TypeTag<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for TypeTag<T> {}

impl<T> std::fmt::Debug for TypeTag<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TypeTag({}:{})", self.id.registry, self.id.index)
    }
}

pub(crate) struct ResourceType {
    name: &'static str,
    release: ReleaseFn,
    live: AtomicUsize,
}

/// Mutable registration phase. Consumed by [`RegistryBuilder::build`].
pub struct RegistryBuilder {
    id: u32,
    types: Vec<ResourceType>,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            types: Vec::new(),
        }
    }

    /// Registers a resource type and the routine that releases its payload.
    ///
    /// `release` runs on whichever thread drops the last handle. It must not
    /// block and must not create handles.
    pub fn register_type<T: Send + Sync + 'static>(
        &mut self,
        name: &'static str,
        release: impl Fn(&mut T) + Send + Sync + 'static,
    ) -> Result<TypeTag<T>, RegistryError> {
        if self.types.iter().any(|ty| ty.name == name) {
            log::error!("resource type {name} registered twice");
            return Err(RegistryError::DuplicateType(name));
        }
        let index = self.types.len() as u32;
        self.types.push(ResourceType {
            name,
            release: Box::new(move |payload: &mut (dyn Any + Send + Sync)| {
                if let Some(payload) = payload.downcast_mut::<T>() {
                    release(payload);
                }
            }),
            live: AtomicUsize::new(0),
        });
        log::debug!("registered resource type {name} (registry {}, slot {index})", self.id);
        Ok(TypeTag {
            id: TagId {
                registry: self.id,
                index,
            },
            _marker: PhantomData,
        })
    }

    /// Freezes the table. `capacity` caps the number of live wrappers.
    #[must_use]
    pub fn build(self, capacity: Option<usize>) -> Registry {
        Registry {
            id: self.id,
            types: self.types.into_iter().map(Arc::new).collect(),
            capacity,
            total: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Frozen, process-wide table of resource types.
pub struct Registry {
    id: u32,
    types: Box<[Arc<ResourceType>]>,
    capacity: Option<usize>,
    total: Arc<AtomicUsize>,
}

impl Registry {
    fn entry<T>(&self, tag: TypeTag<T>) -> Result<&Arc<ResourceType>, RegistryError> {
        if tag.id.registry != self.id {
            return Err(RegistryError::ForeignTag);
        }
        self.types
            .get(tag.id.index as usize)
            .ok_or(RegistryError::ForeignTag)
    }

    /// Accounts one wrapper slot of the tagged type.
    pub fn reserve<T>(&self, tag: TypeTag<T>) -> Result<Reservation<T>, RegistryError> {
        let ty = self.entry(tag)?;
        let previous = self.total.fetch_add(1, Ordering::AcqRel);
        if let Some(limit) = self.capacity
            && previous >= limit
        {
            self.total.fetch_sub(1, Ordering::AcqRel);
            log::warn!("cannot allocate {} wrapper: {limit} handles live", ty.name);
            return Err(RegistryError::Exhausted { limit });
        }
        ty.live.fetch_add(1, Ordering::AcqRel);
        Ok(Reservation {
            tag: tag.id,
            ty: Arc::clone(ty),
            total: Arc::clone(&self.total),
            armed: true,
            _marker: PhantomData,
        })
    }

    /// Reserves and fills a wrapper in one call.
    pub fn wrap<T: Send + Sync + 'static>(
        &self,
        tag: TypeTag<T>,
        payload: T,
    ) -> Result<ResourceHandle, RegistryError> {
        Ok(self.reserve(tag)?.wrap(payload))
    }

    /// Type-checked access to a handle's payload.
    pub fn unwrap<'h, T: 'static>(
        &self,
        handle: &'h ResourceHandle,
        tag: TypeTag<T>,
    ) -> Result<&'h T, RegistryError> {
        let wrapper = &handle.0;
        let expected = self.entry(tag)?.name;
        let mismatch = || RegistryError::InvalidHandle {
            expected,
            found: wrapper.ty.name,
        };
        if wrapper.tag != tag.id {
            return Err(mismatch());
        }
        wrapper.payload.downcast_ref::<T>().ok_or_else(mismatch)
    }

    /// Whether the handle was created under `tag`.
    #[must_use]
    pub fn is<T>(&self, handle: &ResourceHandle, tag: TypeTag<T>) -> bool {
        handle.0.tag == tag.id && tag.id.registry == self.id
    }

    /// Live wrappers of the tagged type, reservations included.
    #[must_use]
    pub fn live_count<T>(&self, tag: TypeTag<T>) -> usize {
        self.entry(tag)
            .map_or(0, |ty| ty.live.load(Ordering::Acquire))
    }

    /// Live wrappers of all types, reservations included.
    #[must_use]
    pub fn live_total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    /// Registered type names in slot order.
    pub fn type_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.types.iter().map(|ty| ty.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Payload(u32);

    fn counted_registry() -> (Registry, TypeTag<Payload>, TypeTag<String>, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&released);
        let mut builder = RegistryBuilder::new();
        let payload_tag = builder
            .register_type::<Payload>("payload", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let string_tag = builder.register_type::<String>("string", |_| {}).unwrap();
        (builder.build(None), payload_tag, string_tag, released)
    }

    #[test]
    fn test_wrap_unwrap_round_trip() {
        let (registry, tag, _, _) = counted_registry();
        let handle = registry.wrap(tag, Payload(7)).unwrap();
        assert_eq!(registry.unwrap(&handle, tag).unwrap().0, 7);
        assert_eq!(handle.type_name(), "payload");
    }

    #[test]
    fn test_unwrap_with_wrong_tag_fails() {
        let (registry, payload_tag, string_tag, _) = counted_registry();
        let handle = registry.wrap(string_tag, "hi".to_string()).unwrap();
        let err = registry.unwrap(&handle, payload_tag).unwrap_err();
        assert_eq!(
            err,
            RegistryError::InvalidHandle {
                expected: "payload",
                found: "string"
            }
        );
    }

    #[test]
    fn test_registry_errors_convert_to_bridge_errors() {
        let (registry, payload_tag, string_tag, _) = counted_registry();
        let handle = registry.wrap(string_tag, "hi".to_string()).unwrap();
        let err = BridgeError::from(registry.unwrap(&handle, payload_tag).unwrap_err());
        assert_eq!(
            err,
            BridgeError::InvalidHandle {
                expected: "payload",
                found: "string"
            }
        );
        assert_eq!(err.reason(), "invalid_handle");
        assert!(err.is_handle_error());

        assert_eq!(
            BridgeError::from(RegistryError::Exhausted { limit: 1 }),
            BridgeError::AllocFailed
        );
        assert_eq!(
            BridgeError::from(RegistryError::ForeignTag).reason(),
            "registration_failed"
        );
    }

    #[test]
    fn test_handle_from_other_registry_is_rejected() {
        let (registry_a, tag_a, _, _) = counted_registry();
        let (registry_b, tag_b, _, _) = counted_registry();
        let foreign = registry_b.wrap(tag_b, Payload(1)).unwrap();
        assert!(registry_a.unwrap(&foreign, tag_a).is_err());
        assert_eq!(
            registry_a.unwrap(&foreign, tag_b).unwrap_err(),
            RegistryError::ForeignTag
        );
        assert!(!registry_a.is(&foreign, tag_a));
    }

    #[test]
    fn test_release_runs_once_after_last_clone() {
        let (registry, tag, _, released) = counted_registry();
        let handle = registry.wrap(tag, Payload(3)).unwrap();
        let clone = handle.clone();
        assert_eq!(handle.root_count(), 2);

        drop(handle);
        assert_eq!(released.load(Ordering::SeqCst), 0);
        assert_eq!(registry.live_count(tag), 1);

        drop(clone);
        assert_eq!(released.load(Ordering::SeqCst), 1);
        assert_eq!(registry.live_count(tag), 0);
        assert_eq!(registry.live_total(), 0);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut builder = RegistryBuilder::new();
        builder.register_type::<u8>("dup", |_| {}).unwrap();
        let err = builder.register_type::<u16>("dup", |_| {}).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateType("dup"));
    }

    #[test]
    fn test_capacity_exhaustion_and_reservation_rollback() {
        let mut builder = RegistryBuilder::new();
        let tag = builder.register_type::<u8>("byte", |_| {}).unwrap();
        let registry = builder.build(Some(1));

        let reservation = registry.reserve(tag).unwrap();
        assert_eq!(registry.reserve(tag).unwrap_err(), RegistryError::Exhausted { limit: 1 });

        drop(reservation);
        assert_eq!(registry.live_total(), 0);

        let handle = registry.wrap(tag, 1).unwrap();
        assert!(registry.wrap(tag, 2).is_err());
        drop(handle);
        assert!(registry.wrap(tag, 3).is_ok());
    }

    #[test]
    fn test_unfilled_reservation_skips_release() {
        let (registry, tag, _, released) = counted_registry();
        let reservation = registry.reserve(tag).unwrap();
        assert_eq!(registry.live_count(tag), 1);
        drop(reservation);
        assert_eq!(registry.live_count(tag), 0);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_from_another_thread() {
        let (registry, tag, _, released) = counted_registry();
        let handle = registry.wrap(tag, Payload(9)).unwrap();
        std::thread::spawn(move || drop(handle)).join().unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
