//! Bridge Tests
//!
//! Tests for:
//! - Instance, adapter and device acquisition against the in-process native layer
//! - Handle validation: wrong kind, foreign registry, null native references
//! - Request protocol: native failure, timeout, late callbacks, concurrent requests
//! - Buffer creation: sizes, usage tokens, allocation failure
//! - Uploads: prefix writes, oversized writes, device mismatch, queue rejection
//! - Finalization: every native object released exactly once

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use exdawn::{
    Bridge, BridgeError, BridgeSettings, BufferUsage, MockNative, Resolution, ResourceHandle,
    TextureWrapper,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn setup_with(settings: BridgeSettings) -> (MockNative, Bridge) {
    init_logging();
    let mock = MockNative::new();
    let bridge = Bridge::load(Arc::new(mock.clone()), settings).unwrap();
    (mock, bridge)
}

fn setup() -> (MockNative, Bridge) {
    setup_with(BridgeSettings::default())
}

fn device(bridge: &Bridge) -> ResourceHandle {
    let instance = bridge.create_instance().unwrap();
    let adapter = bridge.create_adapter(&instance).unwrap();
    bridge.create_device(&adapter).unwrap()
}

// ============================================================================
// Acquisition
// ============================================================================

#[test]
fn full_chain_uploads_into_buffer() {
    let (mock, bridge) = setup();
    let device = device(&bridge);

    let buffer = bridge
        .create_buffer(&device, 1024u64, ["vertex", "copy_dst"])
        .unwrap();
    assert_eq!(bridge.buffer_size(&buffer), Ok(1024));
    assert_eq!(
        bridge.buffer_usage(&buffer),
        Ok(BufferUsage::VERTEX | BufferUsage::COPY_DST)
    );

    bridge.write_buffer(&device, &buffer, &[7u8; 512]).unwrap();
    assert_eq!(
        bridge.write_buffer(&device, &buffer, &[0u8; 2048]),
        Err(BridgeError::SizeMismatch { len: 2048, size: 1024 })
    );
    assert_eq!(mock.stats().writes, 1);
}

#[test]
fn adapter_records_its_instance() {
    let (mock, bridge) = setup();
    let instance = bridge.create_instance().unwrap();
    let adapter = bridge.create_adapter(&instance).unwrap();

    let instance_info = bridge.describe(&instance).unwrap();
    let adapter_info = bridge.describe(&adapter).unwrap();
    assert_eq!(adapter_info.kind, "dawn_adapter");
    assert_eq!(adapter_info.parent, Some(instance.id()));
    assert_eq!(
        mock.adapter_parent(adapter_info.native.unwrap()),
        instance_info.native
    );
}

#[test]
fn delayed_callbacks_resolve_from_driver_thread() {
    let (mock, bridge) = setup();
    mock.set_adapter_resolution(Resolution::Delayed(Duration::from_millis(20)));
    mock.set_device_resolution(Resolution::Delayed(Duration::from_millis(20)));

    let device = device(&bridge);
    assert_eq!(bridge.describe(&device).unwrap().kind, "dawn_device");
}

// ============================================================================
// Handle validation
// ============================================================================

#[test]
fn wrong_kind_is_rejected_before_native_call() {
    let (mock, bridge) = setup();
    let instance = bridge.create_instance().unwrap();
    let adapter = bridge.create_adapter(&instance).unwrap();

    assert_eq!(bridge.create_adapter(&adapter), Err(BridgeError::InvalidInstance));
    assert_eq!(bridge.create_device(&instance), Err(BridgeError::InvalidAdapter));
    assert_eq!(
        bridge.create_buffer(&adapter, 16u64, ["vertex"]),
        Err(BridgeError::InvalidDevice)
    );
    assert_eq!(mock.stats().adapter_requests, 1);
    assert_eq!(mock.stats().device_requests, 0);
}

#[test]
fn handle_from_another_bridge_is_rejected() {
    let (_, bridge) = setup();
    let (other_mock, other) = setup();
    let foreign = other.create_instance().unwrap();

    assert_eq!(bridge.create_adapter(&foreign), Err(BridgeError::InvalidInstance));
    assert!(bridge.describe(&foreign).is_none());
    assert_eq!(other_mock.stats().adapter_requests, 0);
}

#[test]
fn null_instance_yields_invalid_instance() {
    let (mock, bridge) = setup();
    mock.set_fail_instances(true);

    let instance = bridge.create_instance().unwrap();
    assert_eq!(bridge.describe(&instance).unwrap().native, None);
    assert_eq!(bridge.create_adapter(&instance), Err(BridgeError::InvalidInstance));
    assert_eq!(mock.stats().adapter_requests, 0);

    drop(instance);
    assert_eq!(mock.stats().instances_released, 0);
    assert_eq!(mock.stats().double_releases, 0);
}

#[test]
fn buffer_handle_is_not_a_device() {
    let (_, bridge) = setup();
    let device = device(&bridge);
    let buffer = bridge.create_buffer(&device, 8u64, ["copy_dst"]).unwrap();

    assert_eq!(
        bridge.write_buffer(&buffer, &buffer, &[1, 2]),
        Err(BridgeError::InvalidDevice)
    );
    assert_eq!(
        bridge.write_buffer(&device, &device, &[1, 2]),
        Err(BridgeError::InvalidBuffer)
    );
}

// ============================================================================
// Request protocol
// ============================================================================

#[test]
fn native_failure_maps_to_request_failed() {
    let (mock, bridge) = setup();
    mock.set_adapter_resolution(Resolution::Fail("no suitable adapter".into()));
    let instance = bridge.create_instance().unwrap();

    assert_eq!(
        bridge.create_adapter(&instance),
        Err(BridgeError::RequestFailed("no suitable adapter".into()))
    );
    assert_eq!(bridge.registry().live_count(bridge.tags().adapter), 0);
}

#[test]
fn device_failure_maps_to_request_failed() {
    let (mock, bridge) = setup();
    mock.set_device_resolution(Resolution::Fail("device lost".into()));
    let instance = bridge.create_instance().unwrap();
    let adapter = bridge.create_adapter(&instance).unwrap();

    assert!(matches!(
        bridge.create_device(&adapter),
        Err(BridgeError::RequestFailed(_))
    ));
}

#[test]
fn timeout_then_late_callback_releases_once() {
    let timeout = Duration::from_millis(50);
    let (mock, bridge) = setup_with(BridgeSettings::default().with_request_timeout(timeout));
    mock.set_adapter_resolution(Resolution::Manual);
    let instance = bridge.create_instance().unwrap();

    assert_eq!(
        bridge.create_adapter(&instance),
        Err(BridgeError::RequestTimedOut(timeout))
    );
    assert_eq!(mock.pending(), 1);
    assert_eq!(bridge.registry().live_count(bridge.tags().adapter), 0);

    assert_eq!(mock.complete_pending(), 1);
    let stats = mock.stats();
    assert_eq!(stats.adapters_released, 1);
    assert_eq!(stats.double_releases, 0);
}

/// Runs one concurrent adapter request per instance, none of which resolve on
/// their own, and returns how long each caller waited.
fn parked_adapter_waits(
    mock: &MockNative,
    bridge: &Bridge,
    instances: &[ResourceHandle],
) -> Vec<Duration> {
    mock.set_adapter_resolution(Resolution::Manual);
    thread::scope(|s| {
        let jobs: Vec<_> = instances
            .iter()
            .map(|instance| {
                s.spawn(move || {
                    let started = Instant::now();
                    let result = bridge.create_adapter(instance);
                    assert!(matches!(result, Err(BridgeError::RequestTimedOut(_))));
                    started.elapsed()
                })
            })
            .collect();
        jobs.into_iter().map(|job| job.join().unwrap()).collect()
    })
}

#[test]
fn queued_requests_share_the_timeout_bound() {
    let timeout = Duration::from_millis(300);
    let (mock, bridge) = setup_with(
        BridgeSettings::default()
            .with_request_timeout(timeout)
            .with_dirty_workers(2),
    );

    let instances: Vec<_> = (0..6).map(|_| bridge.create_instance().unwrap()).collect();
    for waited in parked_adapter_waits(&mock, &bridge, &instances) {
        assert!(waited < timeout * 2, "caller waited {waited:?} for a {timeout:?} bound");
    }
    assert_eq!(mock.stats().adapter_requests, 6);

    let fired = mock.complete_pending();
    assert_eq!(mock.stats().adapters_released, fired);
    assert_eq!(mock.stats().double_releases, 0);
}

#[test]
fn saturated_pool_still_honours_the_timeout() {
    let timeout = Duration::from_millis(200);
    let (mock, bridge) = setup_with(
        BridgeSettings::default()
            .with_request_timeout(timeout)
            .with_dirty_workers(1)
            .with_max_dirty_workers(1),
    );

    let instances: Vec<_> = (0..4).map(|_| bridge.create_instance().unwrap()).collect();
    for waited in parked_adapter_waits(&mock, &bridge, &instances) {
        assert!(waited < timeout * 2, "caller waited {waited:?} for a {timeout:?} bound");
    }

    // Joins the workers, so every queued job has either issued or expired.
    drop(bridge);
    let fired = mock.complete_pending();
    assert_eq!(mock.stats().adapters_released, fired);
    assert_eq!(mock.stats().double_releases, 0);
}

#[test]
fn concurrent_adapters_do_not_cross() {
    let (mock, bridge) = setup();
    mock.set_adapter_resolution(Resolution::Delayed(Duration::from_millis(10)));

    let instances: Vec<_> = (0..4).map(|_| bridge.create_instance().unwrap()).collect();
    let bridge_ref = &bridge;
    let adapters: Vec<_> = thread::scope(|s| {
        let jobs: Vec<_> = instances
            .iter()
            .map(|instance| s.spawn(move || bridge_ref.create_adapter(instance).unwrap()))
            .collect();
        jobs.into_iter().map(|job| job.join().unwrap()).collect()
    });

    for (instance, adapter) in instances.iter().zip(&adapters) {
        let info = bridge.describe(adapter).unwrap();
        assert_eq!(info.parent, Some(instance.id()));
        assert_eq!(
            mock.adapter_parent(info.native.unwrap()),
            bridge.describe(instance).unwrap().native
        );
    }
}

#[test]
fn concurrent_devices_on_one_adapter() {
    let (mock, bridge) = setup();
    mock.set_device_resolution(Resolution::Delayed(Duration::from_millis(10)));
    let instance = bridge.create_instance().unwrap();
    let adapter = bridge.create_adapter(&instance).unwrap();

    let devices: Vec<_> = thread::scope(|s| {
        let jobs: Vec<_> = (0..3)
            .map(|_| s.spawn(|| bridge.create_device(&adapter).unwrap()))
            .collect();
        jobs.into_iter().map(|job| job.join().unwrap()).collect()
    });

    let adapter_native = bridge.describe(&adapter).unwrap().native;
    let mut natives: Vec<_> = devices
        .iter()
        .map(|d| bridge.describe(d).unwrap().native.unwrap())
        .collect();
    for native in &natives {
        assert_eq!(mock.device_parent(*native), adapter_native);
    }
    natives.sort_unstable();
    natives.dedup();
    assert_eq!(natives.len(), 3);
    assert_eq!(mock.stats().device_requests, 3);
}

// ============================================================================
// Buffers
// ============================================================================

#[test]
fn zero_size_buffer_is_accepted() {
    let (_, bridge) = setup();
    let device = device(&bridge);
    let buffer = bridge.create_buffer(&device, 0u64, ["uniform"]).unwrap();

    assert_eq!(bridge.buffer_size(&buffer), Ok(0));
    assert_eq!(bridge.write_buffer(&device, &buffer, &[]), Ok(()));
    assert_eq!(
        bridge.write_buffer(&device, &buffer, &[1]),
        Err(BridgeError::SizeMismatch { len: 1, size: 0 })
    );
}

#[test]
fn unknown_usage_token_fails_whole_call() {
    let (mock, bridge) = setup();
    let device = device(&bridge);

    assert_eq!(
        bridge.create_buffer(&device, 64u64, ["vertex", "sparkly"]),
        Err(BridgeError::InvalidUsage("sparkly".into()))
    );
    assert_eq!(mock.stats().buffers_created, 0);
}

#[test]
fn usage_tokens_reach_native_layer() {
    let (mock, bridge) = setup();
    let device = device(&bridge);
    let buffer = bridge
        .create_buffer(&device, 64u64, ["storage", "copy-src"])
        .unwrap();

    let native = bridge.describe(&buffer).unwrap().native.unwrap();
    assert_eq!(
        mock.buffer_usage(native),
        Some(BufferUsage::STORAGE | BufferUsage::COPY_SRC)
    );
}

#[test]
fn negative_size_is_invalid() {
    let (_, bridge) = setup();
    let device = device(&bridge);

    assert_eq!(
        bridge.create_buffer(&device, -1i64, ["vertex"]),
        Err(BridgeError::InvalidSize)
    );
}

#[test]
fn native_allocation_failure() {
    let (mock, bridge) = setup();
    let device = device(&bridge);
    mock.set_fail_buffers(true);

    assert_eq!(
        bridge.create_buffer(&device, 64u64, ["vertex"]),
        Err(BridgeError::AllocFailed)
    );
    assert_eq!(bridge.registry().live_count(bridge.tags().buffer), 0);
}

#[test]
fn unbackable_size_fails_allocation() {
    let (mock, bridge) = setup();
    let device = device(&bridge);

    for size in [u64::MAX, u64::MAX / 2] {
        assert_eq!(
            bridge.create_buffer(&device, size, ["vertex"]),
            Err(BridgeError::AllocFailed)
        );
    }
    assert_eq!(bridge.registry().live_count(bridge.tags().buffer), 0);
    assert_eq!(mock.stats().buffers_created, 0);

    // The device is still usable afterwards.
    assert!(bridge.create_buffer(&device, 16u64, ["vertex"]).is_ok());
}

#[test]
fn wrapper_capacity_exhaustion() {
    let (mock, bridge) = setup_with(BridgeSettings::default().with_max_live_handles(2));
    let first = bridge.create_instance().unwrap();
    let _second = bridge.create_instance().unwrap();

    assert_eq!(bridge.create_instance(), Err(BridgeError::AllocFailed));
    assert_eq!(bridge.create_adapter(&first), Err(BridgeError::AllocFailed));
    assert_eq!(mock.stats().instances_created, 2);
    assert_eq!(mock.stats().adapter_requests, 0);

    drop(first);
    assert!(bridge.create_instance().is_ok());
}

// ============================================================================
// Uploads
// ============================================================================

#[test]
fn prefix_write_leaves_tail_untouched() {
    let (mock, bridge) = setup();
    let device = device(&bridge);
    let buffer = bridge.create_buffer(&device, 8u64, ["copy_dst"]).unwrap();
    let native = bridge.describe(&buffer).unwrap().native.unwrap();

    bridge.write_buffer(&device, &buffer, &[9; 8]).unwrap();
    bridge.write_buffer(&device, &buffer, &[1, 2, 3]).unwrap();
    assert_eq!(mock.buffer_contents(native), Some(vec![1, 2, 3, 9, 9, 9, 9, 9]));
}

#[test]
fn oversized_write_changes_nothing() {
    let (mock, bridge) = setup();
    let device = device(&bridge);
    let buffer = bridge.create_buffer(&device, 4u64, ["copy_dst"]).unwrap();
    let native = bridge.describe(&buffer).unwrap().native.unwrap();

    assert!(bridge.write_buffer(&device, &buffer, &[5; 5]).is_err());
    assert_eq!(mock.buffer_contents(native), Some(vec![0; 4]));
    assert_eq!(bridge.buffer_size(&buffer), Ok(4));
}

#[test]
fn write_through_other_device_is_rejected() {
    let (mock, bridge) = setup();
    let owner = device(&bridge);
    let stranger = device(&bridge);
    let buffer = bridge.create_buffer(&owner, 16u64, ["copy_dst"]).unwrap();

    assert_eq!(
        bridge.write_buffer(&stranger, &buffer, &[1; 4]),
        Err(BridgeError::InvalidBuffer)
    );
    assert_eq!(mock.stats().writes, 0);
}

#[test]
fn queue_rejection_maps_to_write_failed() {
    let (mock, bridge) = setup();
    let device = device(&bridge);
    let buffer = bridge.create_buffer(&device, 16u64, ["copy_dst"]).unwrap();
    mock.set_fail_writes(true);

    assert!(matches!(
        bridge.write_buffer(&device, &buffer, &[1; 4]),
        Err(BridgeError::WriteFailed(_))
    ));
}

// ============================================================================
// Finalization
// ============================================================================

#[test]
fn every_kind_released_exactly_once() {
    let (mock, bridge) = setup();
    {
        let instance = bridge.create_instance().unwrap();
        let adapter = bridge.create_adapter(&instance).unwrap();
        let device = bridge.create_device(&adapter).unwrap();
        let buffer = bridge.create_buffer(&device, 32u64, ["index"]).unwrap();
        let texture = bridge
            .registry()
            .wrap(bridge.tags().texture, TextureWrapper::new(Some(mock.create_texture())))
            .unwrap();

        let extra_root = buffer.clone();
        assert_eq!(buffer.root_count(), 2);
        drop(buffer);
        assert_eq!(mock.stats().buffers_released, 0);
        drop(extra_root);
        assert_eq!(mock.stats().buffers_released, 1);

        drop((texture, device, adapter, instance));
    }

    let stats = mock.stats();
    assert_eq!(stats.instances_released, 1);
    assert_eq!(stats.adapters_released, 1);
    assert_eq!(stats.devices_released, 1);
    assert_eq!(stats.buffers_released, 1);
    assert_eq!(stats.textures_released, 1);
    assert_eq!(stats.double_releases, 0);
    assert_eq!(mock.live_objects(), 0);
    assert_eq!(bridge.registry().live_total(), 0);
}

#[test]
fn child_keeps_working_after_parent_handle_dropped() {
    let (mock, bridge) = setup();
    let instance = bridge.create_instance().unwrap();
    let adapter = bridge.create_adapter(&instance).unwrap();
    let device = bridge.create_device(&adapter).unwrap();
    drop(adapter);
    drop(instance);

    let buffer = bridge.create_buffer(&device, 4u64, ["copy_dst"]).unwrap();
    assert_eq!(bridge.write_buffer(&device, &buffer, &[1, 2, 3, 4]), Ok(()));
    assert_eq!(mock.stats().adapters_released, 1);
}

#[test]
fn handles_released_from_another_thread() {
    let (mock, bridge) = setup();
    let device = device(&bridge);
    let buffer = bridge.create_buffer(&device, 4u64, ["copy_dst"]).unwrap();

    thread::spawn(move || drop(buffer)).join().unwrap();
    assert_eq!(mock.stats().buffers_released, 1);
    drop(device);
}
