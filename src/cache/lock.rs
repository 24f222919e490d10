use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    component: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    lock.lock().unwrap_or_else(|poisoned| {
        warn!(
            op,
            component,
            lock_kind = "mutex.lock",
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn recovers_poisoned_mutex() {
        let lock = Mutex::new(vec![1]);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("first lock");
            panic!("poison the lock");
        }));
        assert!(lock.is_poisoned());

        mutex_lock(&lock, "cache::lock", "test").push(2);
        assert_eq!(*mutex_lock(&lock, "cache::lock", "test"), vec![1, 2]);
    }
}
