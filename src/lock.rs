//! Per-zone mutual exclusion.
//!
//! At most one signing run may touch a zone's files at a time. Distinct
//! zones never contend. Acquisition blocks the calling thread without
//! timeout and is not re-entrant: a second acquire from the holder of the
//! lock deadlocks, so callers must not nest.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex};

use tracing::debug;

//------------ LockManager ---------------------------------------------------

/// Tracks which zones currently have a signing run in progress.
#[derive(Default)]
pub struct LockManager {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `zone` is free, then mark it held.
    ///
    /// The returned guard releases the zone when dropped, on every exit
    /// path including unwinding, so a failed run never leaves a zone
    /// permanently locked.
    pub fn lock<'a>(&'a self, zone: &str) -> ZoneGuard<'a> {
        let mut held = self.held.lock().expect("lock() should not fail");
        while held.contains(zone) {
            debug!("waiting for lock on zone {zone} to be released");
            held = self.released.wait(held).expect("wait() should not fail");
        }
        held.insert(zone.to_string());
        debug!("zone {zone} locked");
        ZoneGuard {
            manager: self,
            zone: zone.to_string(),
        }
    }
}

//------------ ZoneGuard -----------------------------------------------------

/// Holds a zone's lock for the duration of a signing run.
pub struct ZoneGuard<'a> {
    manager: &'a LockManager,
    zone: String,
}

impl Drop for ZoneGuard<'_> {
    fn drop(&mut self) {
        debug!("releasing lock on zone {}", self.zone);
        self.manager
            .held
            .lock()
            .expect("lock() should not fail")
            .remove(&self.zone);
        self.manager.released.notify_all();
    }
}

//============ Tests =========================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn mutual_exclusion_per_zone() {
        let locks = LockManager::new();
        let active = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..25 {
                        let _guard = locks.lock("example.com");
                        let seen = active.fetch_add(1, Ordering::SeqCst) + 1;
                        assert_eq!(seen, 1, "two runs held the same zone lock");
                        thread::sleep(Duration::from_micros(50));
                        active.fetch_sub(1, Ordering::SeqCst);
                    }
                });
            }
        });
    }

    #[test]
    fn distinct_zones_do_not_contend() {
        let locks = LockManager::new();
        let _a = locks.lock("example.com");
        // Would deadlock if zones shared a lock.
        let _b = locks.lock("example.net");
    }

    #[test]
    fn guard_drop_releases() {
        let locks = LockManager::new();
        drop(locks.lock("example.com"));
        // Would deadlock if the first guard had not released.
        let _again = locks.lock("example.com");
    }

    #[test]
    fn blocked_acquirer_proceeds_after_release() {
        let locks = LockManager::new();
        let guard = locks.lock("example.com");

        thread::scope(|s| {
            let handle = s.spawn(|| {
                let _guard = locks.lock("example.com");
            });
            thread::sleep(Duration::from_millis(20));
            drop(guard);
            handle.join().unwrap();
        });
    }
}
