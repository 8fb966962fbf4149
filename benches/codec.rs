//! Wire codec benchmarks

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use flowio_core::core::codec::ANALOG_FRAME_LEN;
use flowio_core::{Action, AnalogSamples, ControlCommand, HardwareStatus, PidControl, PidSettings, PortSet};
use std::hint::black_box;

fn notification_benchmark(c: &mut Criterion) {
    let frame: Vec<u8> = (0..ANALOG_FRAME_LEN).map(|i| i as u8).collect();

    let mut group = c.benchmark_group("notifications");
    group.throughput(Throughput::Bytes(frame.len() as u64));

    group.bench_function("analog_decode", |b| {
        b.iter(|| black_box(AnalogSamples::decode(black_box(&frame))))
    });

    group.bench_function("status_decode", |b| {
        b.iter(|| black_box(HardwareStatus::decode(black_box(&[0x83, 0x01]))))
    });

    group.finish();
}

fn command_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("commands");

    group.bench_function("control_encode", |b| {
        let command = ControlCommand::new(Action::Inflate, PortSet::ports(&[1, 3, 5]), 200);
        b.iter(|| black_box(black_box(command).encode()))
    });

    group.bench_function("pid_settings_round_trip", |b| {
        let mut settings = PidSettings::default();
        settings.controls[0] = PidControl::new(1, 0x01_u8, 2.0, 0.5, 0.1);
        b.iter(|| {
            let frame = black_box(&settings).encode();
            black_box(PidSettings::decode(&frame))
        })
    });

    group.finish();
}

criterion_group!(benches, notification_benchmark, command_benchmark);
criterion_main!(benches);
