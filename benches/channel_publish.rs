//! Benchmarks for latest-frame delivery
//!
//! Measures the cost of the single-slot hand-off between a capture task and
//! its consumers:
//! - publish with and without a reader taking frames
//! - latest() on a held frame
//! - full-resolution Kinect v2 frame construction and validation
//!
//! Platform: Cross-platform (synthetic frames, CI-safe)

use criterion::{BatchSize, Criterion, Throughput, criterion_group, criterion_main};
use depthcam::test_utils::{small_frame, small_profile};
use depthcam::{Frame, FrameChannel, PixelFormat, StreamKind, StreamProfile, StreamRequest};
use futures::StreamExt;
use std::hint::black_box;
use std::time::Duration;

fn kinect_frame(kind: StreamKind, sequence: u32) -> Frame {
    let request = StreamRequest::kinect_v2(kind);
    let len = (request.width * request.height) as usize * request.pixel_format.bytes_per_pixel();
    Frame::new(
        kind,
        request.width,
        request.height,
        request.pixel_format,
        Duration::from_millis(sequence as u64 * 33),
        sequence,
        vec![0u8; len],
    )
}

fn bench_publish(c: &mut Criterion) {
    let channel = FrameChannel::new(StreamKind::Depth);
    channel.open(small_profile(StreamKind::Depth));

    let mut group = c.benchmark_group("publish");

    group.bench_function("unread_overwrite", |b| {
        let mut sequence = 0u32;
        b.iter(|| {
            sequence = sequence.wrapping_add(1);
            black_box(channel.publish(small_frame(StreamKind::Depth, sequence)))
        })
    });

    group.bench_function("publish_then_latest", |b| {
        let mut sequence = 0u32;
        b.iter(|| {
            sequence = sequence.wrapping_add(1);
            channel.publish(small_frame(StreamKind::Depth, sequence));
            black_box(channel.latest())
        })
    });

    group.bench_function("rejected_wrong_kind", |b| {
        b.iter(|| black_box(channel.publish(small_frame(StreamKind::Color, 1))))
    });

    group.finish();
}

fn bench_latest(c: &mut Criterion) {
    let channel = FrameChannel::new(StreamKind::Color);
    channel.open(small_profile(StreamKind::Color));
    channel.publish(small_frame(StreamKind::Color, 1));

    c.bench_function("latest_held_frame", |b| b.iter(|| black_box(channel.latest())));

    channel.close();
    c.bench_function("latest_closed_channel", |b| b.iter(|| black_box(channel.latest())));
}

fn bench_full_resolution(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_resolution");

    for kind in StreamKind::ALL {
        let request = StreamRequest::kinect_v2(kind);
        let bytes = (request.width * request.height) as usize * request.pixel_format.bytes_per_pixel();
        group.throughput(Throughput::Bytes(bytes as u64));

        let channel = FrameChannel::new(kind);
        channel.open(StreamProfile::from_request(kind, &request));
        group.bench_function(format!("publish_{}", kind), |b| {
            b.iter_batched(
                || kinect_frame(kind, 1),
                |frame| black_box(channel.publish(frame)),
                BatchSize::LargeInput,
            )
        });
    }

    let frame = kinect_frame(StreamKind::Depth, 1);
    let profile = StreamProfile::from_request(StreamKind::Depth, &StreamRequest::kinect_v2(StreamKind::Depth));
    assert_eq!(frame.pixel_format, PixelFormat::Float32);
    group.bench_function("matches_profile", |b| b.iter(|| black_box(frame.matches(&profile))));

    group.finish();
}

fn bench_subscription_delivery(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    let channel = FrameChannel::new(StreamKind::Depth);
    channel.open(small_profile(StreamKind::Depth));

    c.bench_function("publish_to_subscriber", |b| {
        let mut frames = Box::pin(channel.subscribe());
        let mut sequence = 0u32;
        b.iter(|| {
            sequence = sequence.wrapping_add(1);
            channel.publish(small_frame(StreamKind::Depth, sequence));
            runtime.block_on(async { black_box(frames.next().await) })
        })
    });
}

criterion_group!(
    benches,
    bench_publish,
    bench_latest,
    bench_full_resolution,
    bench_subscription_delivery
);
criterion_main!(benches);
