//! In-process native layer
//!
//! [`MockNative`] stands in for a real GPU driver. Objects live in slot maps,
//! buffers are plain byte vectors, and every entry point is counted so tests
//! can assert how often the bridge reached the native side and how often it
//! released what it got back.
//!
//! Adapter and device requests resolve according to a [`Resolution`] mode,
//! which covers the interesting callback shapes: inline completion, completion
//! from a driver thread after a delay, native failure, and callbacks that are
//! parked until the test fires them by hand.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use slotmap::{KeyData, SlotMap};

use super::{
    BufferDescriptor, DeviceDescriptor, NativeApi, RawAdapter, RawBuffer, RawDevice, RawInstance,
    RawTexture, RequestCallback, RequestStatus, raw_id,
};
use crate::settings::AdapterOptions;
use crate::usage::BufferUsage;

/// How adapter or device requests complete.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Resolution {
    /// The callback runs before `request_*` returns.
    #[default]
    Immediate,
    /// The callback runs on a separate thread after the delay.
    Delayed(Duration),
    /// The callback reports the given failure.
    Fail(String),
    /// The callback is parked until [`MockNative::complete_pending`] runs.
    Manual,
}

/// Snapshot of the call and release counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MockStats {
    pub instances_created: usize,
    pub adapter_requests: usize,
    pub device_requests: usize,
    pub buffers_created: usize,
    pub writes: usize,

    pub instances_released: usize,
    pub adapters_released: usize,
    pub devices_released: usize,
    pub buffers_released: usize,
    pub textures_released: usize,

    /// Release calls for keys that were not live. Always zero for a correct bridge.
    pub double_releases: usize,
}

#[derive(Default)]
struct Counters {
    instances_created: AtomicUsize,
    adapter_requests: AtomicUsize,
    device_requests: AtomicUsize,
    buffers_created: AtomicUsize,
    writes: AtomicUsize,
    instances_released: AtomicUsize,
    adapters_released: AtomicUsize,
    devices_released: AtomicUsize,
    buffers_released: AtomicUsize,
    textures_released: AtomicUsize,
    double_releases: AtomicUsize,
}

struct MockBuffer {
    device: RawDevice,
    usage: BufferUsage,
    bytes: Vec<u8>,
}

#[derive(Default)]
struct Objects {
    instances: SlotMap<RawInstance, ()>,
    adapters: SlotMap<RawAdapter, RawInstance>,
    devices: SlotMap<RawDevice, RawAdapter>,
    buffers: SlotMap<RawBuffer, MockBuffer>,
    textures: SlotMap<RawTexture, ()>,
}

type PendingAdapter = (RawInstance, RequestCallback<RawAdapter>);
type PendingDevice = (RawAdapter, RequestCallback<RawDevice>);

#[derive(Default)]
struct Inner {
    objects: Mutex<Objects>,
    pending_adapters: Mutex<Vec<PendingAdapter>>,
    pending_devices: Mutex<Vec<PendingDevice>>,
    adapter_resolution: Mutex<Resolution>,
    device_resolution: Mutex<Resolution>,
    fail_instances: AtomicBool,
    fail_buffers: AtomicBool,
    fail_writes: AtomicBool,
    counters: Counters,
}

/// Deterministic native layer. Cheap to clone; clones share all state.
#[derive(Clone, Default)]
pub struct MockNative {
    inner: Arc<Inner>,
}

impl MockNative {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Behaviour knobs
    // ========================================================================

    pub fn set_adapter_resolution(&self, resolution: Resolution) {
        *self.inner.adapter_resolution.lock() = resolution;
    }

    pub fn set_device_resolution(&self, resolution: Resolution) {
        *self.inner.device_resolution.lock() = resolution;
    }

    pub fn set_fail_instances(&self, fail: bool) {
        self.inner.fail_instances.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_buffers(&self, fail: bool) {
        self.inner.fail_buffers.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.fail_writes.store(fail, Ordering::SeqCst);
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    #[must_use]
    pub fn stats(&self) -> MockStats {
        let c = &self.inner.counters;
        let load = |counter: &AtomicUsize| counter.load(Ordering::SeqCst);
        MockStats {
            instances_created: load(&c.instances_created),
            adapter_requests: load(&c.adapter_requests),
            device_requests: load(&c.device_requests),
            buffers_created: load(&c.buffers_created),
            writes: load(&c.writes),
            instances_released: load(&c.instances_released),
            adapters_released: load(&c.adapters_released),
            devices_released: load(&c.devices_released),
            buffers_released: load(&c.buffers_released),
            textures_released: load(&c.textures_released),
            double_releases: load(&c.double_releases),
        }
    }

    /// Number of native objects of every kind that have not been released.
    #[must_use]
    pub fn live_objects(&self) -> usize {
        let objects = self.inner.objects.lock();
        objects.instances.len()
            + objects.adapters.len()
            + objects.devices.len()
            + objects.buffers.len()
            + objects.textures.len()
    }

    /// The instance an adapter was requested from, by raw id.
    #[must_use]
    pub fn adapter_parent(&self, adapter: u64) -> Option<u64> {
        let key = RawAdapter::from(KeyData::from_ffi(adapter));
        self.inner.objects.lock().adapters.get(key).map(|i| raw_id(*i))
    }

    /// The adapter a device was requested from, by raw id.
    #[must_use]
    pub fn device_parent(&self, device: u64) -> Option<u64> {
        let key = RawDevice::from(KeyData::from_ffi(device));
        self.inner.objects.lock().devices.get(key).map(|a| raw_id(*a))
    }

    /// Contents of a live buffer, by raw id.
    #[must_use]
    pub fn buffer_contents(&self, buffer: u64) -> Option<Vec<u8>> {
        let key = RawBuffer::from(KeyData::from_ffi(buffer));
        self.inner.objects.lock().buffers.get(key).map(|b| b.bytes.clone())
    }

    /// Usage bits a live buffer was created with, by raw id.
    #[must_use]
    pub fn buffer_usage(&self, buffer: u64) -> Option<BufferUsage> {
        let key = RawBuffer::from(KeyData::from_ffi(buffer));
        self.inner.objects.lock().buffers.get(key).map(|b| b.usage)
    }

    /// Allocates a texture directly, for exercising the texture release path.
    #[must_use]
    pub fn create_texture(&self) -> RawTexture {
        self.inner.objects.lock().textures.insert(())
    }

    /// Number of parked adapter and device callbacks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.pending_adapters.lock().len() + self.inner.pending_devices.lock().len()
    }

    /// Resolves every parked callback successfully. Returns how many fired.
    pub fn complete_pending(&self) -> usize {
        let adapters = std::mem::take(&mut *self.inner.pending_adapters.lock());
        let devices = std::mem::take(&mut *self.inner.pending_devices.lock());
        let fired = adapters.len() + devices.len();
        for (instance, callback) in adapters {
            let status = Self::make_adapter(&self.inner, instance);
            callback(status);
        }
        for (adapter, callback) in devices {
            let status = Self::make_device(&self.inner, adapter);
            callback(status);
        }
        fired
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn make_adapter(inner: &Inner, instance: RawInstance) -> RequestStatus<RawAdapter> {
        let mut objects = inner.objects.lock();
        if !objects.instances.contains_key(instance) {
            return RequestStatus::Failure("instance is not live".to_string());
        }
        RequestStatus::Success(objects.adapters.insert(instance))
    }

    fn make_device(inner: &Inner, adapter: RawAdapter) -> RequestStatus<RawDevice> {
        let mut objects = inner.objects.lock();
        if !objects.adapters.contains_key(adapter) {
            return RequestStatus::Failure("adapter is not live".to_string());
        }
        RequestStatus::Success(objects.devices.insert(adapter))
    }

    /// Runs the callback according to `resolution`. Callbacks never run while
    /// an internal lock is held, since they may call back into `release_*`.
    fn dispatch<P: Copy + Send + 'static, T: Send + 'static>(
        &self,
        resolution: Resolution,
        parent: P,
        callback: RequestCallback<T>,
        make: fn(&Inner, P) -> RequestStatus<T>,
        park: fn(&Inner, P, RequestCallback<T>),
    ) {
        match resolution {
            Resolution::Immediate => callback(make(&self.inner, parent)),
            Resolution::Fail(reason) => callback(RequestStatus::Failure(reason)),
            Resolution::Delayed(delay) => {
                let inner = Arc::clone(&self.inner);
                thread::spawn(move || {
                    thread::sleep(delay);
                    callback(make(&inner, parent));
                });
            }
            Resolution::Manual => park(&self.inner, parent, callback),
        }
    }

    fn release<K: slotmap::Key, V>(
        &self,
        select: impl FnOnce(&mut Objects) -> Option<V>,
        released: &AtomicUsize,
        key: K,
        kind: &str,
    ) {
        let removed = {
            let mut objects = self.inner.objects.lock();
            select(&mut *objects)
        };
        if removed.is_some() {
            released.fetch_add(1, Ordering::SeqCst);
        } else {
            log::error!("MockNative: {kind} {} released twice or never created", raw_id(key));
            self.inner.counters.double_releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl NativeApi for MockNative {
    fn create_instance(&self) -> Option<RawInstance> {
        if self.inner.fail_instances.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.counters.instances_created.fetch_add(1, Ordering::SeqCst);
        Some(self.inner.objects.lock().instances.insert(()))
    }

    fn request_adapter(
        &self,
        instance: RawInstance,
        _options: &AdapterOptions,
        callback: RequestCallback<RawAdapter>,
    ) {
        self.inner.counters.adapter_requests.fetch_add(1, Ordering::SeqCst);
        let resolution = self.inner.adapter_resolution.lock().clone();
        self.dispatch(resolution, instance, callback, Self::make_adapter, |inner, p, cb| {
            inner.pending_adapters.lock().push((p, cb));
        });
    }

    fn request_device(
        &self,
        adapter: RawAdapter,
        _descriptor: &DeviceDescriptor<'_>,
        callback: RequestCallback<RawDevice>,
    ) {
        self.inner.counters.device_requests.fetch_add(1, Ordering::SeqCst);
        let resolution = self.inner.device_resolution.lock().clone();
        self.dispatch(resolution, adapter, callback, Self::make_device, |inner, p, cb| {
            inner.pending_devices.lock().push((p, cb));
        });
    }

    fn create_buffer(
        &self,
        device: RawDevice,
        descriptor: &BufferDescriptor<'_>,
    ) -> Option<RawBuffer> {
        if self.inner.fail_buffers.load(Ordering::SeqCst) {
            return None;
        }
        if !self.inner.objects.lock().devices.contains_key(device) {
            return None;
        }
        // Host memory stands in for device memory; running out of it is an
        // allocation failure, never an abort.
        let size = usize::try_from(descriptor.size).ok()?;
        let mut bytes = Vec::new();
        if let Err(e) = bytes.try_reserve_exact(size) {
            log::warn!("MockNative: cannot back a {size}-byte buffer: {e}");
            return None;
        }
        bytes.resize(size, 0);

        let mut objects = self.inner.objects.lock();
        if !objects.devices.contains_key(device) {
            return None;
        }
        self.inner.counters.buffers_created.fetch_add(1, Ordering::SeqCst);
        Some(objects.buffers.insert(MockBuffer {
            device,
            usage: descriptor.usage,
            bytes,
        }))
    }

    fn write_buffer(
        &self,
        device: RawDevice,
        buffer: RawBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), String> {
        if self.inner.fail_writes.load(Ordering::SeqCst) {
            return Err("queue rejected the write".to_string());
        }
        let mut objects = self.inner.objects.lock();
        let target = objects
            .buffers
            .get_mut(buffer)
            .ok_or_else(|| "buffer is not live".to_string())?;
        if target.device != device {
            return Err("buffer belongs to another device".to_string());
        }
        let start = usize::try_from(offset).map_err(|e| e.to_string())?;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= target.bytes.len())
            .ok_or_else(|| "write out of bounds".to_string())?;
        target.bytes[start..end].copy_from_slice(data);
        self.inner.counters.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_instance(&self, instance: RawInstance) {
        let c = &self.inner.counters;
        self.release(|o| o.instances.remove(instance), &c.instances_released, instance, "instance");
    }

    fn release_adapter(&self, adapter: RawAdapter) {
        let c = &self.inner.counters;
        self.release(|o| o.adapters.remove(adapter), &c.adapters_released, adapter, "adapter");
    }

    fn release_device(&self, device: RawDevice) {
        let c = &self.inner.counters;
        self.release(|o| o.devices.remove(device), &c.devices_released, device, "device");
    }

    fn release_buffer(&self, buffer: RawBuffer) {
        let c = &self.inner.counters;
        self.release(|o| o.buffers.remove(buffer), &c.buffers_released, buffer, "buffer");
    }

    fn release_texture(&self, texture: RawTexture) {
        let c = &self.inner.counters;
        self.release(|o| o.textures.remove(texture), &c.textures_released, texture, "texture");
    }
}
