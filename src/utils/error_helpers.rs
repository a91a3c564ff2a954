//! Lock helpers for registry state
//!
//! Registry and breaker state sits behind std locks that are never held across
//! an await point. Every access recovers the guard of a poisoned lock instead
//! of unwrapping.

use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

/// Acquire a mutex, recovering from a poisoned state
pub fn safe_mutex_lock<'a, T>(mutex: &'a Mutex<T>, context: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                "Mutex poisoned in {}, recovering with potentially inconsistent state",
                context
            );
            poisoned.into_inner()
        }
    }
}

/// Acquire a read guard, recovering from a poisoned state
pub fn safe_read<'a, T>(lock: &'a RwLock<T>, context: &str) -> RwLockReadGuard<'a, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("RwLock poisoned in {}, recovering read access", context);
            poisoned.into_inner()
        }
    }
}

/// Acquire a write guard, recovering from a poisoned state
pub fn safe_write<'a, T>(lock: &'a RwLock<T>, context: &str) -> RwLockWriteGuard<'a, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("RwLock poisoned in {}, recovering write access", context);
            poisoned.into_inner()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_mutex_lock() {
        let mutex = Mutex::new(42);

        {
            let guard = safe_mutex_lock(&mutex, "test");
            assert_eq!(*guard, 42);
        }

        // Simulate poisoned mutex
        let mutex = Mutex::new(100);
        let _ = std::panic::catch_unwind(|| {
            let _guard = mutex.lock().unwrap();
            panic!("Simulated panic");
        });

        let guard = safe_mutex_lock(&mutex, "poisoned test");
        assert_eq!(*guard, 100);
    }

    #[test]
    fn test_safe_rwlock_recovers() {
        let lock = RwLock::new(vec![1]);
        let _ = std::panic::catch_unwind(|| {
            let _guard = lock.write().unwrap();
            panic!("Simulated panic");
        });

        safe_write(&lock, "poisoned write").push(2);
        assert_eq!(*safe_read(&lock, "poisoned read"), vec![1, 2]);
    }
}
