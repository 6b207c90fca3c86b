//! Multi-threaded lock-order scenarios against an isolated context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use locksmith::{
    Acquisition, Error, Locksmith, LocksmithConfig, MutexAttrs, Release, TrackedMutex,
    ViolationPolicy,
};

fn context() -> (Locksmith, Arc<AtomicUsize>) {
    let ls = Locksmith::new(LocksmithConfig::default());
    let reported = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&reported);
    ls.set_error_callback(move |_, _| {
        sink.fetch_add(1, Ordering::Relaxed);
    });
    (ls, reported)
}

fn locks(ls: &Locksmith, n: usize) -> Arc<Vec<TrackedMutex>> {
    let locks: Vec<TrackedMutex> = (0..n).map(|_| TrackedMutex::new()).collect();
    for (i, lock) in locks.iter().enumerate() {
        ls.init(Some(&format!("lock{i}")), lock, MutexAttrs::default())
            .expect("init");
    }
    Arc::new(locks)
}

#[test]
fn test_consistent_partial_order_never_reports() {
    let (ls, reported) = context();
    let locks = locks(&ls, 6);

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let (ls, locks) = (ls.clone(), Arc::clone(&locks));
            thread::spawn(move || {
                for round in 0..200usize {
                    // Any subset, always taken in ascending index order.
                    let mask = (round * 7 + worker * 13) % 64;
                    let taken: Vec<&TrackedMutex> = locks
                        .iter()
                        .enumerate()
                        .filter(|(i, _)| mask & (1 << i) != 0)
                        .map(|(_, l)| l)
                        .collect();
                    for lock in &taken {
                        assert_eq!(ls.lock(lock), Ok(Acquisition::Ordered));
                    }
                    for lock in taken.iter().rev() {
                        assert_eq!(ls.unlock(lock), Ok(Release::InOrder));
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    let counters = ls.counters();
    assert_eq!(counters.lock_order_violation_total, 0);
    assert_eq!(counters.release_order_violation_total, 0);
    assert_eq!(reported.load(Ordering::Relaxed), 0);
    assert!(counters.acquisitions_total > 0);
}

#[test]
fn test_opposite_orders_in_two_threads_are_flagged() {
    let (ls, reported) = context();
    let locks = locks(&ls, 2);

    {
        let (ls, locks) = (ls.clone(), Arc::clone(&locks));
        thread::spawn(move || {
            let _ = ls.lock(&locks[0]).expect("x");
            let _ = ls.lock(&locks[1]).expect("y");
            let _ = ls.unlock(&locks[1]).expect("y");
            let _ = ls.unlock(&locks[0]).expect("x");
        })
        .join()
        .expect("thread A");
    }

    let result = {
        let (ls, locks) = (ls.clone(), Arc::clone(&locks));
        thread::spawn(move || {
            let _ = ls.lock(&locks[1]).expect("y");
            let result = ls.lock(&locks[0]);
            let _ = ls.unlock(&locks[1]).expect("y");
            result
        })
        .join()
        .expect("thread B")
    };

    assert!(matches!(result, Err(Error::LockOrderViolation { .. })));
    assert_eq!(reported.load(Ordering::Relaxed), 1);
    assert_eq!(ls.counters().lock_order_violation_total, 1);
}

#[test]
fn test_proceed_policy_lets_both_threads_continue() {
    let ls = Locksmith::new(LocksmithConfig {
        on_violation: ViolationPolicy::Proceed,
        ..LocksmithConfig::default()
    });
    ls.set_error_callback(|_, _| {});
    let locks = locks(&ls, 2);

    let _ = ls.lock(&locks[0]).expect("x");
    let _ = ls.lock(&locks[1]).expect("y");
    let _ = ls.unlock(&locks[1]).expect("y");
    let _ = ls.unlock(&locks[0]).expect("x");

    let outcome = {
        let (ls, locks) = (ls.clone(), Arc::clone(&locks));
        thread::spawn(move || {
            let _ = ls.lock(&locks[1]).expect("y");
            let outcome = ls.lock(&locks[0]).expect("x");
            let _ = ls.unlock(&locks[0]).expect("x");
            let _ = ls.unlock(&locks[1]).expect("y");
            outcome
        })
        .join()
        .expect("thread")
    };
    assert_eq!(outcome, Acquisition::Inverted);
    assert_eq!(ls.counters().lock_order_violation_total, 1);
}

#[test]
fn test_contended_lock_provides_mutual_exclusion() {
    let (ls, reported) = context();
    let locks = locks(&ls, 1);
    let inside = Arc::new(AtomicUsize::new(0));
    let total = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let (ls, locks) = (ls.clone(), Arc::clone(&locks));
            let (inside, total) = (Arc::clone(&inside), Arc::clone(&total));
            thread::spawn(move || {
                for _ in 0..500 {
                    let _ = ls.lock(&locks[0]).expect("lock");
                    assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.fetch_sub(1, Ordering::SeqCst);
                    let _ = ls.unlock(&locks[0]).expect("unlock");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    assert_eq!(total.load(Ordering::Relaxed), 2000);
    assert_eq!(locks[0].acquisitions(), Some(2000));
    assert_eq!(reported.load(Ordering::Relaxed), 0);
}

#[test]
fn test_destroy_and_reuse_under_churn() {
    let (ls, reported) = context();
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let ls = ls.clone();
            thread::spawn(move || {
                for _ in 0..100 {
                    let m = TrackedMutex::new();
                    ls.init(None, &m, MutexAttrs::default()).expect("init");
                    let _ = ls.lock(&m).expect("lock");
                    let _ = ls.unlock(&m).expect("unlock");
                    ls.destroy(&m).expect("destroy");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }
    assert_eq!(ls.live_count(), 0);
    assert!(ls.id_space() <= 4);
    assert_eq!(reported.load(Ordering::Relaxed), 0);
}
