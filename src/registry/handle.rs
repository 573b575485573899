//! Resource Handle System
//!
//! A [`ResourceHandle`] is the opaque value the host runtime holds. Cloning it
//! adds a root; dropping the last clone is the finalizer. The wrapper behind
//! it owns exactly one payload and runs its type's release routine exactly
//! once, from `Drop`, after no clone can observe the payload any more.
//!
//! # Design Principles
//! - Uses `Arc` for reference counting, standing in for the host collector
//! - The payload is written before the handle exists and never mutated
//!   afterwards, so readers on other threads need no further synchronisation
//! - A [`Reservation`] accounts a wrapper slot before native work starts and
//!   gives the slot back if the work fails

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use super::{ResourceType, TagId};

/// Global unique ID generator
static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a wrapper.
///
/// Used for weak back-references (buffer → device, adapter → instance) and in
/// diagnostics. Holding one confers no ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    fn next() -> Self {
        Self(NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(super) struct Wrapper {
    pub(super) id: ResourceId,
    pub(super) tag: TagId,
    pub(super) ty: Arc<ResourceType>,
    pub(super) total: Arc<AtomicUsize>,
    pub(super) payload: Box<dyn Any + Send + Sync>,
}

impl Drop for Wrapper {
    fn drop(&mut self) {
        (self.ty.release)(&mut *self.payload);
        self.ty.live.fetch_sub(1, Ordering::AcqRel);
        self.total.fetch_sub(1, Ordering::AcqRel);
        log::debug!("released {} {}", self.ty.name, self.id);
    }
}

/// Opaque, type-tagged reference to a native resource.
///
/// Callers can only pass it back into bridge operations; the payload is
/// reachable solely through [`Registry::unwrap`](super::Registry::unwrap)
/// with the matching tag.
#[derive(Clone)]
pub struct ResourceHandle(pub(super) Arc<Wrapper>);

impl ResourceHandle {
    #[inline]
    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.0.id
    }

    /// Registered name of the handle's resource type.
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.0.ty.name
    }

    /// Number of live clones, i.e. host roots keeping the wrapper alive.
    #[must_use]
    pub fn root_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ResourceHandle {}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Resource<{}{}>", self.0.ty.name, self.0.id)
    }
}

/// An accounted but not yet filled wrapper slot.
///
/// Dropping it unfilled returns the slot without running any release
/// routine: nothing native was handed over yet.
pub struct Reservation<T> {
    pub(super) tag: TagId,
    pub(super) ty: Arc<ResourceType>,
    pub(super) total: Arc<AtomicUsize>,
    pub(super) armed: bool,
    pub(super) _marker: PhantomData<fn() -> T>,
}

impl<T> fmt::Debug for Reservation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("tag", &self.tag)
            .field("ty", &self.ty.name)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> Reservation<T> {
    /// Fills the slot and hands the wrapper to its first owner in one step.
    #[must_use]
    pub fn wrap(mut self, payload: T) -> ResourceHandle {
        self.armed = false;
        let wrapper = Wrapper {
            id: ResourceId::next(),
            tag: self.tag,
            ty: Arc::clone(&self.ty),
            total: Arc::clone(&self.total),
            payload: Box::new(payload),
        };
        log::debug!("wrapped {} {}", wrapper.ty.name, wrapper.id);
        ResourceHandle(Arc::new(wrapper))
    }
}

impl<T> Drop for Reservation<T> {
    fn drop(&mut self) {
        if self.armed {
            self.ty.live.fetch_sub(1, Ordering::AcqRel);
            self.total.fetch_sub(1, Ordering::AcqRel);
        }
    }
}
