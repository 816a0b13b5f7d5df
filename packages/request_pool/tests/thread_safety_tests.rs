//! Requests served from many threads at once against one shared registry.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

use request_pool::{Registry, RequestContext, Shape};

const SCRATCH: Shape<Vec<u64>> = Shape::new("scratch").with_capacity(8);

const THREADS: usize = 8;
const REQUESTS_PER_THREAD: usize = 200;

#[test]
fn parallel_requests_never_observe_foreign_data() {
    let registry = Registry::builder().register_recyclable(SCRATCH).build();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles = (0..THREADS)
        .map(|thread_index| {
            let registry = registry.clone();
            let barrier = Arc::clone(&barrier);

            thread::spawn(move || {
                barrier.wait();

                for request in 0..REQUESTS_PER_THREAD {
                    let ctx = request_pool::acquire(&registry, RequestContext::new());
                    let marker = (thread_index * REQUESTS_PER_THREAD + request) as u64;

                    let first = request_pool::borrow(&ctx, &SCRATCH);
                    let second = request_pool::borrow(&ctx, &SCRATCH);

                    // Every borrowed object starts out empty and stays ours until the drain.
                    assert!(first.lock().is_empty());
                    assert!(second.lock().is_empty());

                    first.lock().push(marker);
                    second.lock().push(marker);

                    thread::yield_now();

                    assert_eq!(*first.lock(), vec![marker]);
                    assert_eq!(*second.lock(), vec![marker]);

                    assert!(request_pool::manual_drain(&ctx));
                }
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        handle.join().unwrap();
    }

    let stats = registry.freelist(&SCRATCH).unwrap().stats();

    // Two objects per concurrent request at most.
    assert!(stats.misses <= THREADS * 2);
    assert_eq!(stats.returns, THREADS * REQUESTS_PER_THREAD * 2);
    assert_eq!(stats.idle, stats.misses);
}

#[test]
fn one_request_borrows_from_many_threads() {
    let registry = Registry::builder().register_recyclable(SCRATCH).build();
    let ctx = request_pool::acquire(&registry, RequestContext::new());

    let leases = thread::scope(|scope| {
        let handles = (0..THREADS)
            .map(|_| scope.spawn(|| request_pool::borrow(&ctx, &SCRATCH)))
            .collect::<Vec<_>>();

        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect::<Vec<_>>()
    });

    assert_eq!(request_pool::factory(&ctx).unwrap().len(), THREADS);

    assert!(request_pool::manual_drain(&ctx));
    assert!(leases.iter().all(|lease| !lease.is_live()));

    // Each concurrent borrow got a distinct object and each came back once.
    let stats = registry.freelist(&SCRATCH).unwrap().stats();
    assert_eq!(stats.misses, THREADS);
    assert_eq!(stats.idle, THREADS);
}

#[test]
fn racing_drains_release_once() {
    let registry = Registry::builder().register_recyclable(SCRATCH).build();

    for _ in 0..50 {
        let ctx = request_pool::acquire(&registry, RequestContext::new());
        let _lease = request_pool::borrow(&ctx, &SCRATCH);

        let barrier = Barrier::new(THREADS);

        let winners = thread::scope(|scope| {
            let handles = (0..THREADS)
                .map(|_| {
                    let ctx = ctx.clone();
                    let barrier = &barrier;

                    scope.spawn(move || {
                        barrier.wait();
                        request_pool::manual_drain(&ctx)
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|drained| *drained)
                .count()
        });

        assert_eq!(winners, 1);
    }

    let stats = registry.freelist(&SCRATCH).unwrap().stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.returns, 50);
}

#[test]
fn distinct_objects_within_one_request() {
    let registry = Registry::builder().register_recyclable(SCRATCH).build();

    // Seed the freelist so borrows are served from reuse.
    let ctx = request_pool::acquire(&registry, RequestContext::new());
    let seeded = (0..4)
        .map(|_| request_pool::borrow(&ctx, &SCRATCH))
        .collect::<Vec<_>>();
    request_pool::manual_drain(&ctx);
    drop(seeded);

    let ctx = request_pool::acquire(&registry, RequestContext::new());
    let leases = (0..4)
        .map(|_| request_pool::borrow(&ctx, &SCRATCH))
        .collect::<Vec<_>>();

    let mut distinct = HashSet::new();
    for (index, lease) in leases.iter().enumerate() {
        lease.lock().push(index as u64);
        distinct.insert(lease.lock()[0]);
    }

    assert_eq!(distinct.len(), 4);
    request_pool::manual_drain(&ctx);
}
