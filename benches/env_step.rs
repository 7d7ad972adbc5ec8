use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use env_2048::batch::BatchEnv;
use env_2048::engine::{self as GameEngine, Board, Move};
use env_2048::env::{Game2048, Key};
use rand::{rngs::StdRng, SeedableRng};
use std::hint::black_box;

fn corpus() -> Vec<Board> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut boards = vec![Board::EMPTY];
    let mut b = Board::EMPTY.with_random_tile(&mut rng).with_random_tile(&mut rng);
    // Derive a variety of densities deterministically
    for dir in Move::ALL.into_iter().cycle().take(40) {
        let nb = b.shift(dir);
        if nb != b { b = nb.with_random_tile(&mut rng); }
        boards.push(b);
    }
    boards
}

fn bench_engine(c: &mut Criterion) {
    GameEngine::new();
    let boards = corpus();
    for dir in Move::ALL {
        c.bench_function(&format!("shift/{dir}"), |bch| {
            bch.iter(|| {
                let mut acc = 0u64;
                for &bd in &boards { acc ^= bd.shift(dir).raw(); }
                black_box(acc)
            })
        });
    }
    c.bench_function("shift_with_reward/left", |bch| {
        bch.iter(|| {
            let mut acc = 0u32;
            for &bd in &boards { acc = acc.wrapping_add(bd.shift_with_reward(Move::Left).1); }
            black_box(acc)
        })
    });
}

fn bench_env(c: &mut Criterion) {
    let env = Game2048::new();
    c.bench_function("env/reset", |bch| {
        let mut seed = 0u64;
        bch.iter(|| {
            seed += 1;
            black_box(env.reset(Key::new(seed)))
        })
    });
    c.bench_function("env/step_64", |bch| {
        bch.iter_batched(
            || env.reset(Key::new(9)).0,
            |mut state| {
                for i in 0..64 {
                    let (next, ts) = env.step(&state, Move::ALL[i % 4]);
                    state = if ts.is_last() { env.reset(next.key).0 } else { next };
                }
                black_box(state)
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_batch(c: &mut Criterion) {
    let actions: Vec<Move> = (0..1024).map(|i| Move::ALL[i % 4]).collect();
    c.bench_function("batch/step_1024", |bch| {
        let mut batch = BatchEnv::new(Game2048::new(), 1024, Key::new(1)).auto_reset(true);
        bch.iter(|| black_box(batch.step(&actions).map(|ts| ts.len())))
    });
}

criterion_group!(env_step, bench_engine, bench_env, bench_batch);
criterion_main!(env_step);
