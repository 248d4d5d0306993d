//! Scheduling-path benchmarks
//!
//! Measures the monitor-guarded hot paths a caller actually pays for:
//! arming, rescheduling, and canceling alarms while the pending list holds a
//! realistic number of peers. Callbacks never fire during these runs; every
//! deadline sits far in the future.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use wakealarm::AlarmService;

/// Far enough out that the dispatcher stays idle for the whole run.
const IDLE_DEADLINE_MS: u64 = 3_600_000;

fn bench_set_and_cancel(c: &mut Criterion) {
    let service = AlarmService::new().expect("service");
    let alarm = service.new_alarm("bench_target").expect("alarm");

    c.bench_function("set_then_cancel", |b| {
        b.iter(|| {
            alarm.set(IDLE_DEADLINE_MS, || {}).expect("set");
            alarm.cancel();
        })
    });
}

fn bench_reschedule_under_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("reschedule_with_pending_peers");
    for peers in [1usize, 16, 64] {
        let service = AlarmService::new().expect("service");
        let background: Vec<_> = (0..peers)
            .map(|i| {
                let peer = service
                    .new_alarm(&format!("peer_{i}"))
                    .expect("peer alarm");
                peer.set(IDLE_DEADLINE_MS + i as u64, || {}).expect("set peer");
                peer
            })
            .collect();

        let alarm = service.new_alarm("mover").expect("alarm");
        alarm.set(IDLE_DEADLINE_MS / 2, || {}).expect("seed");

        group.bench_with_input(BenchmarkId::from_parameter(peers), &peers, |b, _| {
            b.iter(|| {
                // Implicit reschedule: drain, re-anchor, re-insert, re-arm.
                alarm.set(IDLE_DEADLINE_MS / 2, || {}).expect("reset");
            })
        });

        alarm.cancel();
        drop(background);
        service.cleanup();
    }
    group.finish();
}

criterion_group!(benches, bench_set_and_cancel, bench_reschedule_under_load);
criterion_main!(benches);
