//! Stream ordering, event dependencies, and synchronization.

use sluice::{Backend, Sluice};

fn host_runtime(devices: usize) -> Sluice {
    Sluice::builder()
        .backend(Backend::Host)
        .devices(devices)
        .build()
        .expect("host runtime should build")
}

fn read_region(runtime: &Sluice, region: &sluice::DeviceRegion) -> Vec<u8> {
    let mut bytes = vec![0u8; region.len()];
    runtime
        .copy_device_to_host(region, &mut bytes)
        .expect("download");
    bytes
}

#[test]
fn commands_on_one_stream_apply_in_submission_order() {
    let runtime = host_runtime(1);
    let region = runtime.allocate(64).expect("allocate");
    let stream = runtime.create_stream().expect("stream");

    runtime
        .fill_u8_async(&region, 0x55, 64, &stream)
        .expect("first fill");
    runtime
        .fill_u8_async(&region, 0x99, 16, &stream)
        .expect("second fill");
    runtime.stream_synchronize(&stream).expect("drain");

    let bytes = read_region(&runtime, &region);
    assert_eq!(&bytes[..16], &[0x99; 16]);
    assert_eq!(&bytes[16..], &[0x55; 48]);

    runtime.destroy_stream(stream).expect("destroy");
    runtime.free(region);
}

#[test]
fn independent_streams_both_complete() {
    let runtime = host_runtime(1);
    let first = runtime.allocate(32).expect("allocate");
    let second = runtime.allocate(32).expect("allocate");
    let stream_a = runtime.create_stream().expect("stream a");
    let stream_b = runtime.create_stream().expect("stream b");

    runtime
        .fill_u8_async(&first, 0x0A, 32, &stream_a)
        .expect("fill a");
    runtime
        .fill_u8_async(&second, 0x0B, 32, &stream_b)
        .expect("fill b");
    runtime.device_synchronize().expect("device drain");

    assert_eq!(read_region(&runtime, &first), vec![0x0A; 32]);
    assert_eq!(read_region(&runtime, &second), vec![0x0B; 32]);

    runtime.destroy_stream(stream_a).expect("destroy");
    runtime.destroy_stream(stream_b).expect("destroy");
    runtime.free(first);
    runtime.free(second);
}

#[test]
fn wait_event_sequences_two_streams() {
    let runtime = host_runtime(1);
    let region = runtime.allocate(64).expect("allocate");
    let producer = runtime.create_stream().expect("producer");
    let consumer = runtime.create_stream().expect("consumer");

    runtime
        .fill_u8_async(&region, 0xAA, 64, &producer)
        .expect("producer fill");
    let ready = runtime.record_event(&producer).expect("record");
    runtime.wait_event(&consumer, &ready).expect("wait");
    runtime
        .fill_u8_async(&region, 0xBB, 16, &consumer)
        .expect("consumer fill");

    runtime.device_synchronize().expect("device drain");

    let bytes = read_region(&runtime, &region);
    assert_eq!(&bytes[..16], &[0xBB; 16]);
    assert_eq!(&bytes[16..], &[0xAA; 48]);

    runtime.destroy_stream(producer).expect("destroy");
    runtime.destroy_stream(consumer).expect("destroy");
    runtime.free(region);
}

#[test]
fn waiting_on_your_own_event_is_satisfied_by_fifo_order() {
    let runtime = host_runtime(1);
    let region = runtime.allocate(8).expect("allocate");
    let stream = runtime.create_stream().expect("stream");

    runtime
        .fill_u8_async(&region, 0x01, 8, &stream)
        .expect("fill");
    let marker = runtime.record_event(&stream).expect("record");
    runtime.wait_event(&stream, &marker).expect("self wait");
    runtime
        .fill_u8_async(&region, 0x02, 4, &stream)
        .expect("second fill");
    runtime.stream_synchronize(&stream).expect("drain");

    let bytes = read_region(&runtime, &region);
    assert_eq!(&bytes[..4], &[0x02; 4]);
    assert_eq!(&bytes[4..], &[0x01; 4]);

    runtime.destroy_stream(stream).expect("destroy");
    runtime.free(region);
}

#[test]
fn completed_events_are_noop_dependencies() {
    let runtime = host_runtime(1);
    let region = runtime.allocate(8).expect("allocate");
    let producer = runtime.create_stream().expect("producer");
    let consumer = runtime.create_stream().expect("consumer");

    let marker = runtime.record_event(&producer).expect("record");
    runtime.stream_synchronize(&producer).expect("producer drain");

    runtime.wait_event(&consumer, &marker).expect("wait");
    runtime
        .fill_u8_async(&region, 0x33, 8, &consumer)
        .expect("fill");
    runtime.stream_synchronize(&consumer).expect("consumer drain");

    assert_eq!(read_region(&runtime, &region), vec![0x33; 8]);

    runtime.destroy_stream(producer).expect("destroy");
    runtime.destroy_stream(consumer).expect("destroy");
    runtime.free(region);
}

#[test]
fn dropping_an_undestroyed_stream_retires_quietly() {
    let runtime = host_runtime(1);
    let region = runtime.allocate(16).expect("allocate");

    {
        let stream = runtime.create_stream().expect("stream");
        runtime
            .fill_u8_async(&region, 0x66, 16, &stream)
            .expect("fill");
        // Dropped without destroy_stream.
    }

    runtime.device_synchronize().expect("device drain");
    assert_eq!(read_region(&runtime, &region), vec![0x66; 16]);
    runtime.free(region);
}

#[test]
fn destroy_does_not_cancel_queued_work() {
    let runtime = host_runtime(1);
    let region = runtime.allocate(32).expect("allocate");
    let stream = runtime.create_stream().expect("stream");

    for value in 1..=4u8 {
        runtime
            .fill_u8_async(&region, value, 32, &stream)
            .expect("fill");
    }
    runtime.destroy_stream(stream).expect("destroy");
    runtime.device_synchronize().expect("device drain");

    assert_eq!(read_region(&runtime, &region), vec![4; 32]);
    runtime.free(region);
}

#[test]
fn destroy_trusts_the_current_device_at_destroy_time() {
    let runtime = host_runtime(2);

    runtime.set_current_device(1).expect("select device 1");
    let stream = runtime.create_stream().expect("stream");
    runtime.set_current_device(0).expect("select device 0");

    // The resolved ordinal no longer matches the stream's binding; the
    // destroy still succeeds and the queue retires on its own device.
    runtime.destroy_stream(stream).expect("destroy");
    runtime.set_current_device(1).expect("select device 1");
    runtime.device_synchronize().expect("drain device 1");
}
