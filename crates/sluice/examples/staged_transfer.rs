//! Stage a payload through pinned memory onto an emulated device, hand it
//! between two streams with an event, and read it back.
//!
//! Run with: `cargo run --example staged_transfer`

use sluice::{Backend, PinnedBuffer, Sluice};

const PAYLOAD_BYTES: usize = 1 << 20;

fn main() -> sluice::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let runtime = Sluice::builder()
        .backend(Backend::Host)
        .devices(2)
        .build()?;
    println!(
        "runtime up: backend {:?}, {} device(s)",
        runtime.backend(),
        runtime.device_count()?
    );

    runtime.set_current_device(1)?;
    let region = match runtime.allocate(PAYLOAD_BYTES) {
        Some(region) => region,
        None => {
            eprintln!("device 1 could not provide {PAYLOAD_BYTES} bytes");
            return Ok(());
        }
    };

    let payload: Vec<u8> = (0..PAYLOAD_BYTES).map(|i| (i * 31 % 255) as u8).collect();
    let staging = PinnedBuffer::from_slice(&payload);
    let readback = PinnedBuffer::new(PAYLOAD_BYTES);

    // Upload on one stream, download on another, ordered by an event.
    let upload = runtime.create_stream()?;
    let download = runtime.create_stream()?;

    runtime.copy_host_to_device_async(&staging, &region, PAYLOAD_BYTES, &upload)?;
    let uploaded = runtime.record_event(&upload)?;
    runtime.wait_event(&download, &uploaded)?;
    runtime.copy_device_to_host_async(&region, &readback, PAYLOAD_BYTES, &download)?;

    runtime.device_synchronize()?;

    assert_eq!(readback.to_vec(), payload);
    println!("round-tripped {PAYLOAD_BYTES} bytes across two streams");

    runtime.destroy_stream(upload)?;
    runtime.destroy_stream(download)?;
    runtime.free(region);
    Ok(())
}
