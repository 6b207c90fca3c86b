//! The process-wide context behind the crate-root functions.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serial_test::serial;

use locksmith::{
    errno_status, error_cb_to_stderr, get_version, mutex_destroy, mutex_init, mutex_lock,
    mutex_timedlock, mutex_trylock, mutex_unlock, set_error_callback, version_to_str, Error,
    MutexAttrs, TrackedMutex, Version, API_VERSION,
};

fn capture() -> Arc<Mutex<Vec<i32>>> {
    let codes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&codes);
    set_error_callback(move |code, _| sink.lock().push(code));
    codes
}

#[test]
#[serial]
fn test_version_round_trip() {
    let mut buf = [0u8; 32];
    let len = version_to_str(get_version(), &mut buf).expect("render");
    let text = std::str::from_utf8(&buf[..len]).expect("utf8");
    let parsed: Version = text.parse().expect("parse");
    assert_eq!(parsed, API_VERSION);
    assert_eq!(parsed.pack(), get_version());
}

#[test]
#[serial]
fn test_version_buffer_too_small_is_reported() {
    let codes = capture();
    let mut buf = [0u8; 2];
    let result = version_to_str(get_version(), &mut buf);
    assert!(matches!(result, Err(Error::BufferTooSmall { .. })));
    assert_eq!(errno_status(&result), libc::ENAMETOOLONG);
    assert_eq!(*codes.lock(), vec![9]);
    set_error_callback(error_cb_to_stderr);
}

#[test]
#[serial]
fn test_free_function_lifecycle() {
    let codes = capture();
    let a = TrackedMutex::new();
    let b = TrackedMutex::new();
    assert_eq!(errno_status(&mutex_init(Some("global-a"), &a, MutexAttrs::default())), 0);
    assert_eq!(errno_status(&mutex_init(Some("global-b"), &b, MutexAttrs::default())), 0);
    assert_eq!(
        errno_status(&mutex_init(Some("global-a"), &a, MutexAttrs::default())),
        libc::EBUSY
    );

    assert_eq!(errno_status(&mutex_lock(&a)), 0);
    assert_eq!(errno_status(&mutex_trylock(&b, false)), 0);
    assert_eq!(errno_status(&mutex_trylock(&b, false)), libc::EBUSY);
    assert_eq!(errno_status(&mutex_destroy(&b)), libc::EBUSY);
    assert_eq!(errno_status(&mutex_unlock(&b)), 0);
    assert_eq!(errno_status(&mutex_unlock(&a)), 0);

    // Opposite order on the same thread: b then a.
    assert_eq!(errno_status(&mutex_lock(&b)), 0);
    let inverted = mutex_timedlock(&a, Instant::now() + Duration::from_millis(10));
    assert_eq!(errno_status(&inverted), libc::EDEADLK);
    assert_eq!(errno_status(&mutex_unlock(&b)), 0);

    assert_eq!(errno_status(&mutex_destroy(&a)), 0);
    assert_eq!(errno_status(&mutex_destroy(&b)), 0);
    assert_eq!(errno_status(&mutex_unlock(&a)), libc::EINVAL);

    // CreateWhileInUse, DestroyWhileLocked, LockOrderViolation, NotInitialized.
    assert_eq!(*codes.lock(), vec![2, 6, 4, 3]);
    set_error_callback(error_cb_to_stderr);
}
