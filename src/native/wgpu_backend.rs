//! `wgpu`-backed native layer
//!
//! Maps the [`NativeApi`] seam onto the `wgpu` crate. Every native object is
//! held in a slot map and addressed by its raw key; releasing a key drops the
//! `wgpu` object (buffers are destroyed first).
//!
//! Adapter and device requests resolve on a short-lived driver thread, so the
//! completion callback always arrives from a thread other than the caller's.
//!
//! `wgpu` reports validation failures through its uncaptured-error handler,
//! which panics by default. Requests that would fail validation are therefore
//! refused here, before they reach `wgpu`.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use slotmap::SlotMap;

use super::{
    BufferDescriptor, DeviceDescriptor, NativeApi, RawAdapter, RawBuffer, RawDevice, RawInstance,
    RawTexture, RequestCallback, RequestStatus,
};
use crate::settings::{AdapterOptions, PowerPreference};
use crate::usage::BufferUsage;

struct GpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    device: RawDevice,
    usage: BufferUsage,
}

#[derive(Default)]
struct Tables {
    instances: SlotMap<RawInstance, wgpu::Instance>,
    adapters: SlotMap<RawAdapter, wgpu::Adapter>,
    devices: SlotMap<RawDevice, GpuDevice>,
    buffers: SlotMap<RawBuffer, GpuBuffer>,
    textures: SlotMap<RawTexture, wgpu::Texture>,
}

/// Native layer backed by `wgpu`. Clones share the same object tables.
#[derive(Clone, Default)]
pub struct WgpuNative {
    tables: Arc<Mutex<Tables>>,
}

impl WgpuNative {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn power_preference(preference: PowerPreference) -> wgpu::PowerPreference {
    match preference {
        PowerPreference::None => wgpu::PowerPreference::None,
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    }
}

/// Usage must be non-empty, and mappable buffers may only be combined with
/// the matching copy usage.
fn valid_usage(usage: BufferUsage) -> bool {
    if usage.is_empty() {
        return false;
    }
    if usage.contains(BufferUsage::MAP_READ) {
        return (usage - BufferUsage::MAP_READ - BufferUsage::COPY_DST).is_empty();
    }
    if usage.contains(BufferUsage::MAP_WRITE) {
        return (usage - BufferUsage::MAP_WRITE - BufferUsage::COPY_SRC).is_empty();
    }
    true
}

impl NativeApi for WgpuNative {
    fn create_instance(&self) -> Option<RawInstance> {
        let instance = wgpu::Instance::default();
        Some(self.tables.lock().instances.insert(instance))
    }

    fn request_adapter(
        &self,
        instance: RawInstance,
        options: &AdapterOptions,
        callback: RequestCallback<RawAdapter>,
    ) {
        let Some(instance_obj) = self.tables.lock().instances.get(instance).cloned() else {
            callback(RequestStatus::Failure("instance is not live".to_string()));
            return;
        };
        let request = wgpu::RequestAdapterOptions {
            power_preference: power_preference(options.power_preference),
            force_fallback_adapter: options.force_fallback_adapter,
            compatible_surface: None,
        };
        let tables = Arc::clone(&self.tables);
        thread::spawn(move || {
            let status = match pollster::block_on(instance_obj.request_adapter(&request)) {
                Ok(adapter) => {
                    log::info!("wgpu adapter: {:?}", adapter.get_info().name);
                    RequestStatus::Success(tables.lock().adapters.insert(adapter))
                }
                Err(e) => RequestStatus::Failure(e.to_string()),
            };
            callback(status);
        });
    }

    fn request_device(
        &self,
        adapter: RawAdapter,
        descriptor: &DeviceDescriptor<'_>,
        callback: RequestCallback<RawDevice>,
    ) {
        let Some(adapter_obj) = self.tables.lock().adapters.get(adapter).cloned() else {
            callback(RequestStatus::Failure("adapter is not live".to_string()));
            return;
        };
        let label = descriptor.label.map(str::to_owned);
        let tables = Arc::clone(&self.tables);
        thread::spawn(move || {
            let request = adapter_obj.request_device(&wgpu::DeviceDescriptor {
                label: label.as_deref(),
                ..Default::default()
            });
            let status = match pollster::block_on(request) {
                Ok((device, queue)) => {
                    RequestStatus::Success(tables.lock().devices.insert(GpuDevice { device, queue }))
                }
                Err(e) => RequestStatus::Failure(e.to_string()),
            };
            callback(status);
        });
    }

    fn create_buffer(
        &self,
        device: RawDevice,
        descriptor: &BufferDescriptor<'_>,
    ) -> Option<RawBuffer> {
        if !valid_usage(descriptor.usage) {
            log::warn!("wgpu: rejected usage combination {:?}", descriptor.usage.tokens());
            return None;
        }
        let mut tables = self.tables.lock();
        let gpu = tables.devices.get(device)?;
        if descriptor.size > gpu.device.limits().max_buffer_size {
            log::warn!("wgpu: buffer size {} exceeds device limit", descriptor.size);
            return None;
        }
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: descriptor.label,
            size: descriptor.size,
            usage: wgpu::BufferUsages::from_bits_truncate(descriptor.usage.bits()),
            mapped_at_creation: false,
        });
        Some(tables.buffers.insert(GpuBuffer {
            buffer,
            device,
            usage: descriptor.usage,
        }))
    }

    fn write_buffer(
        &self,
        device: RawDevice,
        buffer: RawBuffer,
        offset: u64,
        data: &[u8],
    ) -> Result<(), String> {
        let tables = self.tables.lock();
        let gpu = tables
            .devices
            .get(device)
            .ok_or_else(|| "device is not live".to_string())?;
        let target = tables
            .buffers
            .get(buffer)
            .ok_or_else(|| "buffer is not live".to_string())?;
        if target.device != device {
            return Err("buffer belongs to another device".to_string());
        }
        if !target.usage.contains(BufferUsage::COPY_DST) {
            return Err("buffer was not created with copy_dst usage".to_string());
        }
        let len = data.len() as u64;
        if !offset.is_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            || !len.is_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
        {
            return Err(format!(
                "offset and length must be multiples of {}",
                wgpu::COPY_BUFFER_ALIGNMENT
            ));
        }
        if offset.checked_add(len).is_none_or(|end| end > target.buffer.size()) {
            return Err("write out of bounds".to_string());
        }
        gpu.queue.write_buffer(&target.buffer, offset, data);
        Ok(())
    }

    fn release_instance(&self, instance: RawInstance) {
        if self.tables.lock().instances.remove(instance).is_none() {
            log::error!("wgpu: instance released twice");
        }
    }

    fn release_adapter(&self, adapter: RawAdapter) {
        if self.tables.lock().adapters.remove(adapter).is_none() {
            log::error!("wgpu: adapter released twice");
        }
    }

    fn release_device(&self, device: RawDevice) {
        if self.tables.lock().devices.remove(device).is_none() {
            log::error!("wgpu: device released twice");
        }
    }

    fn release_buffer(&self, buffer: RawBuffer) {
        match self.tables.lock().buffers.remove(buffer) {
            Some(gpu) => gpu.buffer.destroy(),
            None => log::error!("wgpu: buffer released twice"),
        }
    }

    fn release_texture(&self, texture: RawTexture) {
        match self.tables.lock().textures.remove(texture) {
            Some(tex) => tex.destroy(),
            None => log::error!("wgpu: texture released twice"),
        }
    }
}
