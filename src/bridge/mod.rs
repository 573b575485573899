//! Native resource bridge
//!
//! [`Bridge`] is the explicitly constructed process state behind every host
//! call: the frozen resource registry, the native API, the settings and the
//! dirty scheduler. The operations are split by component, each adding an
//! `impl Bridge` block:
//! - instance.rs: `create_instance`
//! - adapter.rs: `create_adapter`
//! - device.rs: `create_device`
//! - buffer.rs: `create_buffer`
//! - upload.rs: `write_buffer`
//!
//! Control flow is strictly layered. Each operation validates its input
//! handle through the registry before it touches the native API, so a handle
//! of the wrong kind, from another registry, or with a null native reference
//! never reaches the native side.

mod adapter;
mod buffer;
mod device;
mod instance;
pub(crate) mod request;
mod upload;

use std::sync::Arc;

use crate::errors::{BridgeError, Result};
use crate::native::{
    NativeApi, RawAdapter, RawBuffer, RawDevice, RawInstance, RawTexture, raw_id,
};
use crate::registry::{Registry, RegistryBuilder, ResourceHandle, ResourceId, TypeTag};
use crate::scheduler::DirtyScheduler;
use crate::settings::BridgeSettings;
use crate::usage::BufferUsage;

// ============================================================================
// Wrapper payloads
// ============================================================================

/// Payload of an instance handle. The native reference is null when the
/// native API refused to create the instance.
#[derive(Debug)]
pub struct InstanceWrapper {
    native: Option<RawInstance>,
}

/// Payload of an adapter handle.
#[derive(Debug)]
pub struct AdapterWrapper {
    native: Option<RawAdapter>,
    instance: ResourceId,
}

/// Payload of a device handle. The device owns exactly one default queue,
/// which is the one uploads go through.
#[derive(Debug)]
pub struct DeviceWrapper {
    native: Option<RawDevice>,
    adapter: ResourceId,
}

/// Payload of a buffer handle. `size` is fixed at creation and bounds every
/// write.
#[derive(Debug)]
pub struct BufferWrapper {
    native: Option<RawBuffer>,
    size: u64,
    usage: BufferUsage,
    device: ResourceId,
}

impl BufferWrapper {
    #[inline]
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    #[must_use]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Weak back-reference to the creating device.
    #[inline]
    #[must_use]
    pub fn device(&self) -> ResourceId {
        self.device
    }
}

/// Payload of a texture handle. No operation creates textures yet; the type
/// is registered so its release path exists from the start.
#[derive(Debug)]
pub struct TextureWrapper {
    native: Option<RawTexture>,
}

impl TextureWrapper {
    #[must_use]
    pub fn new(native: Option<RawTexture>) -> Self {
        Self { native }
    }
}

/// Tags of the five registered resource types.
#[derive(Debug, Clone, Copy)]
pub struct ResourceTags {
    pub instance: TypeTag<InstanceWrapper>,
    pub adapter: TypeTag<AdapterWrapper>,
    pub device: TypeTag<DeviceWrapper>,
    pub buffer: TypeTag<BufferWrapper>,
    pub texture: TypeTag<TextureWrapper>,
}

impl ResourceTags {
    /// Registers every resource type with a release routine bound to `api`.
    /// Any failure here is fatal to loading.
    fn register(builder: &mut RegistryBuilder, api: &Arc<dyn NativeApi>) -> Result<Self> {
        let native = Arc::clone(api);
        let instance = builder.register_type("dawn_instance", move |w: &mut InstanceWrapper| {
            if let Some(raw) = w.native.take() {
                native.release_instance(raw);
            }
        })?;
        let native = Arc::clone(api);
        let adapter = builder.register_type("dawn_adapter", move |w: &mut AdapterWrapper| {
            if let Some(raw) = w.native.take() {
                native.release_adapter(raw);
            }
        })?;
        let native = Arc::clone(api);
        let device = builder.register_type("dawn_device", move |w: &mut DeviceWrapper| {
            if let Some(raw) = w.native.take() {
                native.release_device(raw);
            }
        })?;
        let native = Arc::clone(api);
        let buffer = builder.register_type("dawn_buffer", move |w: &mut BufferWrapper| {
            if let Some(raw) = w.native.take() {
                native.release_buffer(raw);
            }
        })?;
        let native = Arc::clone(api);
        let texture = builder.register_type("dawn_texture", move |w: &mut TextureWrapper| {
            if let Some(raw) = w.native.take() {
                native.release_texture(raw);
            }
        })?;
        Ok(Self {
            instance,
            adapter,
            device,
            buffer,
            texture,
        })
    }
}

/// Diagnostic view of a handle. Carries identifiers only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub kind: &'static str,
    pub id: ResourceId,
    /// Integer form of the native reference, `None` when null.
    pub native: Option<u64>,
    /// Weak back-reference to the originating resource.
    pub parent: Option<ResourceId>,
    /// Recorded size, for buffers.
    pub size: Option<u64>,
}

// ============================================================================
// Bridge
// ============================================================================

/// State shared with jobs running on the dirty scheduler.
pub(crate) struct Shared {
    pub(crate) api: Arc<dyn NativeApi>,
    pub(crate) registry: Registry,
    pub(crate) tags: ResourceTags,
    pub(crate) settings: BridgeSettings,
}

/// Loaded bridge. Construct once with [`Bridge::load`] before accepting calls.
pub struct Bridge {
    shared: Arc<Shared>,
    scheduler: DirtyScheduler,
}

impl Bridge {
    /// Registers the five resource types and starts the dirty scheduler.
    pub fn load(api: Arc<dyn NativeApi>, settings: BridgeSettings) -> Result<Self> {
        let mut builder = RegistryBuilder::new();
        let tags = ResourceTags::register(&mut builder, &api).inspect_err(|e| {
            log::error!("bridge load aborted: {e}");
        })?;
        let registry = builder.build(settings.max_live_handles);
        let scheduler = DirtyScheduler::new(settings.dirty_workers, settings.max_dirty_workers)?;
        log::info!(
            "bridge loaded: types [{}], request timeout {:?}",
            registry.type_names().collect::<Vec<_>>().join(", "),
            settings.request_timeout
        );
        Ok(Self {
            shared: Arc::new(Shared {
                api,
                registry,
                tags,
                settings,
            }),
            scheduler,
        })
    }

    fn deadline(&self) -> request::Deadline {
        request::Deadline::after(self.shared.settings.request_timeout)
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    #[must_use]
    pub fn tags(&self) -> &ResourceTags {
        &self.shared.tags
    }

    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.shared.settings
    }

    /// Recorded size of a buffer handle.
    pub fn buffer_size(&self, buffer: &ResourceHandle) -> Result<u64> {
        self.shared.buffer(buffer).map(|(_, wrapper)| wrapper.size)
    }

    /// Usage bits of a buffer handle.
    pub fn buffer_usage(&self, buffer: &ResourceHandle) -> Result<BufferUsage> {
        self.shared.buffer(buffer).map(|(_, wrapper)| wrapper.usage)
    }

    /// Identifiers behind a handle, for logs and tests. `None` when the handle
    /// was not created by this bridge.
    #[must_use]
    pub fn describe(&self, handle: &ResourceHandle) -> Option<ResourceInfo> {
        let registry = &self.shared.registry;
        let tags = &self.shared.tags;
        let info = |native: Option<u64>, parent: Option<ResourceId>, size: Option<u64>| ResourceInfo {
            kind: handle.type_name(),
            id: handle.id(),
            native,
            parent,
            size,
        };
        if let Ok(w) = registry.unwrap(handle, tags.instance) {
            return Some(info(w.native.map(raw_id), None, None));
        }
        if let Ok(w) = registry.unwrap(handle, tags.adapter) {
            return Some(info(w.native.map(raw_id), Some(w.instance), None));
        }
        if let Ok(w) = registry.unwrap(handle, tags.device) {
            return Some(info(w.native.map(raw_id), Some(w.adapter), None));
        }
        if let Ok(w) = registry.unwrap(handle, tags.buffer) {
            return Some(info(w.native.map(raw_id), Some(w.device), Some(w.size)));
        }
        if let Ok(w) = registry.unwrap(handle, tags.texture) {
            return Some(info(w.native.map(raw_id), None, None));
        }
        None
    }
}

impl Shared {
    /// Resolves a buffer handle to its native reference, rejecting null.
    fn buffer<'h>(&self, handle: &'h ResourceHandle) -> Result<(RawBuffer, &'h BufferWrapper)> {
        let wrapper = self
            .registry
            .unwrap(handle, self.tags.buffer)
            .map_err(|e| {
                log::warn!("rejected buffer argument: {e}");
                BridgeError::InvalidBuffer
            })?;
        let raw = wrapper.native.ok_or(BridgeError::InvalidBuffer)?;
        Ok((raw, wrapper))
    }

    /// Resolves a device handle to its native reference, rejecting null.
    fn device(&self, handle: &ResourceHandle) -> Result<RawDevice> {
        self.registry
            .unwrap(handle, self.tags.device)
            .map_err(|e| {
                log::warn!("rejected device argument: {e}");
                BridgeError::InvalidDevice
            })?
            .native
            .ok_or(BridgeError::InvalidDevice)
    }
}
