use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use cadence_lockstep::{LockstepConfig, LockstepEngine};

const DELTA: f64 = 1.0 / 30.0;

fn warmed_engine() -> LockstepEngine {
    let mut engine = LockstepEngine::new(LockstepConfig::default());
    engine.pause(false);
    let granted = engine.adjust_tick(DELTA, DELTA);
    engine.tick(granted, DELTA);
    engine
}

fn bench_push_command(c: &mut Criterion) {
    c.bench_function("push_command", |b| {
        b.iter_batched(
            warmed_engine,
            |mut engine| {
                for _ in 0..100 {
                    engine
                        .push_command(&[0x41, 0x42, 0x43, 0x44])
                        .expect("admitted");
                }
                engine
            },
            BatchSize::SmallInput,
        );
    });
}

fn bench_tick_with_backlog(c: &mut Criterion) {
    c.bench_function("tick_with_command_backlog", |b| {
        b.iter_batched(
            || {
                let mut engine = warmed_engine();
                for _ in 0..64 {
                    engine.push_command(&[0x41]).expect("admitted");
                }
                engine
            },
            |mut engine| {
                for _ in 0..60 {
                    let granted = engine.adjust_tick(DELTA, DELTA);
                    engine.tick(granted, DELTA);
                    engine.end_frame();
                }
                engine
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_push_command, bench_tick_with_backlog);
criterion_main!(benches);
