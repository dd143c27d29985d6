use std::{
    sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

pub trait MutexUtils<T> {
    /// Lock a mutex and execute a function with its lock.
    /// This makes sure that the mutex is locked only during the function execution.
    ///
    /// A poisoned mutex is still entered: the guarded data of this crate
    /// stays consistent even if a holder panicked.
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> R
    where
        F: FnOnce(MutexGuard<'_, T>) -> R,
    {
        f(self.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

pub trait RwLockUtils<T> {
    /// Execute a function with a shared read lock
    fn with_read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(RwLockReadGuard<'_, T>) -> R;

    /// Execute a function with the exclusive write lock
    fn with_write<R, F>(&self, f: F) -> R
    where
        F: FnOnce(RwLockWriteGuard<'_, T>) -> R;
}

impl<T> RwLockUtils<T> for RwLock<T> {
    fn with_read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(RwLockReadGuard<'_, T>) -> R,
    {
        f(self.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn with_write<R, F>(&self, f: F) -> R
    where
        F: FnOnce(RwLockWriteGuard<'_, T>) -> R,
    {
        f(self.write().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Delay before the retry number `attempt` (starting at 0):
/// exponential backoff from `base` plus up to `base` of random jitter.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 1u32 << attempt.min(6);
    let jitter = base.mul_f64(fastrand::f64());
    base.saturating_mul(factor).saturating_add(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_stays_bounded() {
        let base = Duration::from_millis(100);
        for attempt in 0..10 {
            let delay = backoff_delay(base, attempt);
            let min = base * (1 << attempt.min(6));
            assert!(delay >= min, "{delay:?} < {min:?}");
            assert!(delay <= min + base, "{delay:?} > {:?}", min + base);
        }
        assert_eq!(backoff_delay(Duration::ZERO, 3), Duration::ZERO);
    }

    #[test]
    fn poisoned_mutex_is_still_usable() {
        let mutex = std::sync::Arc::new(Mutex::new(1));
        let poisoner = mutex.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("poison");
        })
        .join();

        assert!(mutex.is_poisoned());
        let value = mutex.with_lock(|mut n| {
            *n += 1;
            *n
        });
        assert_eq!(value, 2);
    }
}
