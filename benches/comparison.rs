//! Comparison benchmarks: Petek vs a mutex-guarded VecDeque

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::sync::Arc;
use std::thread;

// Petek implementation
mod petek_bench {
    use super::*;
    use petek::Queue;

    pub fn bench_mpmc(num_threads: usize, ops_per_thread: usize) {
        let queue = Arc::new(Queue::new());

        let handles: Vec<_> = (0..num_threads)
            .map(|tid| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..ops_per_thread {
                        queue.push(tid * ops_per_thread + i);
                        while queue.try_pop().is_none() {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}

// Mutex<VecDeque> implementation
mod mutex_bench {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub fn bench_mpmc(num_threads: usize, ops_per_thread: usize) {
        let queue = Arc::new(Mutex::new(VecDeque::new()));

        let handles: Vec<_> = (0..num_threads)
            .map(|tid| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..ops_per_thread {
                        queue.lock().unwrap().push_back(tid * ops_per_thread + i);
                        loop {
                            if queue.lock().unwrap().pop_front().is_some() {
                                break;
                            }
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}

fn bench_mpmc_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc_queue");
    group.sample_size(20);

    for threads in [1, 2, 4, 8].iter() {
        let ops_per_thread = 5000;
        group.throughput(Throughput::Elements((threads * ops_per_thread * 2) as u64));

        group.bench_with_input(
            BenchmarkId::new("petek", threads),
            threads,
            |b, &num_threads| {
                b.iter(|| {
                    petek_bench::bench_mpmc(num_threads, ops_per_thread);
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("mutex_vecdeque", threads),
            threads,
            |b, &num_threads| {
                b.iter(|| {
                    mutex_bench::bench_mpmc(num_threads, ops_per_thread);
                });
            },
        );
    }

    group.finish();
}

fn bench_uncontended(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread");

    group.throughput(Throughput::Elements(2));
    group.bench_function("petek_push_pop", |b| {
        let q = petek::Queue::new();
        b.iter(|| {
            q.push(1usize);
            q.try_pop()
        });
    });

    group.bench_function("mutex_push_pop", |b| {
        let q = std::sync::Mutex::new(std::collections::VecDeque::new());
        b.iter(|| {
            q.lock().unwrap().push_back(1usize);
            q.lock().unwrap().pop_front()
        });
    });

    group.finish();
}

criterion_group!(benches, bench_mpmc_comparison, bench_uncontended);
criterion_main!(benches);
