//! Tests for the thread-local hold context.

use std::sync::Arc;

use super::hold::*;
use super::mutex::MutexKind;
use super::registry::{LockRecord, Registry};

fn records(n: usize) -> (Arc<Registry>, Vec<Arc<LockRecord>>) {
    let reg = Arc::new(Registry::new(16, usize::MAX));
    let records = (0..n)
        .map(|_| reg.register(1, None, MutexKind::Normal).expect("register"))
        .collect();
    (reg, records)
}

fn ids(held: &HeldLocks) -> Vec<usize> {
    held.iter().map(|r| r.id()).collect()
}

#[test]
fn test_push_pop_lifo() {
    let (_reg, locks) = records(2);
    let mut ctx = HoldContext::new();
    ctx.push(1, Arc::clone(&locks[0]), true);
    ctx.push(1, Arc::clone(&locks[1]), true);
    assert_eq!(ids(&ctx.snapshot(1)), vec![0, 1]);
    assert!(matches!(ctx.pop(1, &locks[1]), Popped::InOrder));
    assert!(matches!(ctx.pop(1, &locks[0]), Popped::InOrder));
    assert!(ctx.is_empty());
}

#[test]
fn test_pop_out_of_order_still_removes() {
    let (_reg, locks) = records(2);
    let mut ctx = HoldContext::new();
    ctx.push(1, Arc::clone(&locks[0]), true);
    ctx.push(1, Arc::clone(&locks[1]), true);
    match ctx.pop(1, &locks[0]) {
        Popped::OutOfOrder { most_recent } => assert_eq!(most_recent.id(), 1),
        other => panic!("expected out-of-order pop, got {other:?}"),
    }
    assert_eq!(ids(&ctx.snapshot(1)), vec![1]);
    assert!(matches!(ctx.pop(1, &locks[1]), Popped::InOrder));
}

#[test]
fn test_pop_not_held() {
    let (_reg, locks) = records(2);
    let mut ctx = HoldContext::new();
    ctx.push(1, Arc::clone(&locks[0]), true);
    assert!(matches!(ctx.pop(1, &locks[1]), Popped::NotHeld));
    assert!(matches!(ctx.pop(2, &locks[0]), Popped::NotHeld));
    assert!(ctx.contains(1, &locks[0]));
    assert!(matches!(ctx.pop(1, &locks[0]), Popped::InOrder));
}

#[test]
fn test_domains_are_independent() {
    let (_reg, locks) = records(4);
    let mut ctx = HoldContext::new();
    ctx.push(1, Arc::clone(&locks[0]), true);
    ctx.push(2, Arc::clone(&locks[0]), true);
    ctx.push(1, Arc::clone(&locks[3]), true);
    assert_eq!(ids(&ctx.snapshot(1)), vec![0, 3]);
    assert_eq!(ids(&ctx.snapshot(2)), vec![0]);
    // Domain 2's only entry is its most recent, whatever domain 1 did after.
    assert!(matches!(ctx.pop(2, &locks[0]), Popped::InOrder));
    assert!(!ctx.contains(2, &locks[0]));
    assert!(ctx.contains(1, &locks[0]));
    assert!(matches!(ctx.pop(1, &locks[3]), Popped::InOrder));
    assert!(matches!(ctx.pop(1, &locks[0]), Popped::InOrder));
}

#[test]
fn test_untracked_entries_hidden_from_snapshot() {
    let (_reg, locks) = records(2);
    let mut ctx = HoldContext::new();
    ctx.push(1, Arc::clone(&locks[0]), true);
    ctx.push(1, Arc::clone(&locks[1]), false);
    assert_eq!(ids(&ctx.snapshot(1)), vec![0]);
    assert_eq!(ctx.held_ids(1), vec![0, 1]);
    assert!(ctx.contains(1, &locks[1]));
    assert!(matches!(ctx.pop(1, &locks[1]), Popped::InOrder));
    assert!(matches!(ctx.pop(1, &locks[0]), Popped::InOrder));
}

#[test]
fn test_thread_local_is_per_thread() {
    let (_reg, locks) = records(1);
    with_hold_context(|ctx| ctx.push(42, Arc::clone(&locks[0]), true)).expect("tls");
    let record = Arc::clone(&locks[0]);
    let other = std::thread::spawn(move || with_hold_context(|ctx| ctx.contains(42, &record)))
        .join()
        .expect("join");
    assert_eq!(other, Some(false));
    let popped = with_hold_context(|ctx| ctx.pop(42, &locks[0])).expect("tls");
    assert!(matches!(popped, Popped::InOrder));
}

#[test]
fn test_stale_entry_does_not_match_reused_id() {
    let reg = Arc::new(Registry::new(16, usize::MAX));
    let old = reg.register(1, None, MutexKind::Normal).expect("register");
    let mut ctx = HoldContext::new();
    ctx.push(1, Arc::clone(&old), true);

    assert!(reg.release(&old));
    let new = reg.register(1, None, MutexKind::Normal).expect("register");
    assert_eq!(new.id(), old.id());

    assert!(!ctx.contains(1, &new));
    assert!(matches!(ctx.pop(1, &new), Popped::NotHeld));
    assert!(matches!(ctx.pop(1, &old), Popped::InOrder));
}
