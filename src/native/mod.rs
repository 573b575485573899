//! Native GPU API Seam
//!
//! The bridge never talks to a GPU driver directly. Everything it needs from
//! the native side is expressed by the [`NativeApi`] trait, shaped after the
//! C WebGPU surface: synchronous creation for instances and buffers,
//! callback-driven requests for adapters and devices, one explicit release
//! call per object kind.
//!
//! Native references are opaque copyable keys ([`RawInstance`],
//! [`RawAdapter`], ...). Whoever implements [`NativeApi`] decides what they
//! point at; the bridge only stores them and hands them back.
//!
//! Implementations:
//! - [`mock::MockNative`]: deterministic in-process layer with call and
//!   release instrumentation
//! - `wgpu_backend::WgpuNative` (feature `wgpu`): backed by the `wgpu` crate

pub mod mock;
#[cfg(feature = "wgpu")]
pub mod wgpu_backend;

use slotmap::{Key, new_key_type};

use crate::settings::AdapterOptions;
use crate::usage::BufferUsage;

// Strongly-typed native references
new_key_type! {
    pub struct RawInstance;
    pub struct RawAdapter;
    pub struct RawDevice;
    pub struct RawBuffer;
    pub struct RawTexture;
}

/// Stable integer form of a native reference, for logs and diagnostics.
#[inline]
pub fn raw_id<K: Key>(key: K) -> u64 {
    key.data().as_ffi()
}

/// Outcome delivered to a request callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus<T> {
    /// The native object was produced. Ownership passes to the receiver.
    Success(T),
    /// The native API could not satisfy the request.
    Failure(String),
}

/// Completion callback for adapter and device requests.
///
/// Called at most once, possibly on a driver thread other than the one that
/// issued the request, possibly long after the requester stopped waiting.
pub type RequestCallback<T> = Box<dyn FnOnce(RequestStatus<T>) + Send + 'static>;

#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceDescriptor<'a> {
    pub label: Option<&'a str>,
}

#[derive(Debug, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    pub label: Option<&'a str>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// The native GPU API as seen by the bridge.
pub trait NativeApi: Send + Sync + 'static {
    /// Creates the root context. `None` when the native API refuses.
    fn create_instance(&self) -> Option<RawInstance>;

    /// Starts an adapter request. `callback` receives the outcome exactly once.
    fn request_adapter(
        &self,
        instance: RawInstance,
        options: &AdapterOptions,
        callback: RequestCallback<RawAdapter>,
    );

    /// Starts a device request. `callback` receives the outcome exactly once.
    fn request_device(
        &self,
        adapter: RawAdapter,
        descriptor: &DeviceDescriptor<'_>,
        callback: RequestCallback<RawDevice>,
    );

    /// Creates a buffer synchronously. `None` when the native allocation fails.
    fn create_buffer(&self, device: RawDevice, descriptor: &BufferDescriptor<'_>)
    -> Option<RawBuffer>;

    /// Queues `data` for upload into `buffer` through the device's default queue.
    fn write_buffer(
        &self,
        device: RawDevice,
        buffer: RawBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), String>;

    fn release_instance(&self, instance: RawInstance);
    fn release_adapter(&self, adapter: RawAdapter);
    fn release_device(&self, device: RawDevice);
    fn release_buffer(&self, buffer: RawBuffer);
    fn release_texture(&self, texture: RawTexture);
}
