// Cross-thread sharing tests.
//
// Invariants exercised:
// - Clones and drops of handles to one block may race freely; the block is
//   destroyed exactly once, after the last handle is gone.
// - Concurrent readers of a shared block see consistent contents.
// - Each thread unsharing its own handle gets a private copy; the original
//   block is unaffected.
use refcounted_array::RefCountedArray;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

struct Tracked {
    value: u64,
    live: Arc<AtomicIsize>,
}

impl Tracked {
    fn new(value: u64, live: &Arc<AtomicIsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Tracked {
            value,
            live: Arc::clone(live),
        }
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Tracked::new(self.value, &self.live)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}

const THREADS: usize = 8;

#[test]
fn racing_clone_and_drop_destroy_once() {
    for round in 0..50 {
        let live = Arc::new(AtomicIsize::new(0));
        let a = RefCountedArray::from_fn(16, |i| Tracked::new(i as u64, &live));
        let barrier = Arc::new(Barrier::new(THREADS));

        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let h = a.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut held = Vec::new();
                    for i in 0..200 {
                        held.push(h.clone());
                        if i % 3 == 0 {
                            held.pop();
                        }
                    }
                    assert_eq!(h[15].value, 15);
                    drop(held);
                    drop(h);
                })
            })
            .collect();

        // Let the original go while workers are still cloning.
        if round % 2 == 0 {
            drop(a);
            for w in workers {
                w.join().unwrap();
            }
        } else {
            for w in workers {
                w.join().unwrap();
            }
            assert_eq!(a.ref_count(), 1);
            drop(a);
        }
        assert_eq!(live.load(Ordering::Relaxed), 0);
    }
}

#[test]
fn concurrent_readers_see_shared_contents() {
    let a: RefCountedArray<u64> = RefCountedArray::from_fn(1024, |i| i as u64 * 3);
    let expected: u64 = (0..1024u64).map(|i| i * 3).sum();

    thread::scope(|s| {
        for _ in 0..THREADS {
            let a = &a;
            s.spawn(move || {
                let sum: u64 = a.as_slice().iter().sum();
                assert_eq!(sum, expected);
            });
        }
    });
    assert_eq!(a.ref_count(), 1);
}

#[test]
fn each_thread_unshares_its_own_copy() {
    let live = Arc::new(AtomicIsize::new(0));
    let a = RefCountedArray::from_fn(32, |i| Tracked::new(i as u64, &live));
    let p = a.as_ptr() as usize;

    let results: Vec<Vec<u64>> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let mut h = a.clone();
                s.spawn(move || {
                    for i in 0..h.len() {
                        h[i].value += t as u64 * 100;
                    }
                    assert_ne!(h.as_ptr() as usize, p);
                    h.as_slice().iter().map(|x| x.value).collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().map(|j| j.join().unwrap()).collect()
    });

    for (t, values) in results.iter().enumerate() {
        let want: Vec<u64> = (0..32).map(|i| i + t as u64 * 100).collect();
        assert_eq!(values, &want);
    }
    assert_eq!(a.ref_count(), 1);
    assert!(a.as_slice().iter().enumerate().all(|(i, x)| x.value == i as u64));
    drop(a);
    assert_eq!(live.load(Ordering::Relaxed), 0);
}
