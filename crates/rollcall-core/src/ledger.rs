//! Daily dedup ledger.
//!
//! Remembers which (identity, date) pairs already produced an attendance
//! row during this process. Entries are never evicted; a process running for
//! many days grows by one entry per person per day.

use crate::types::{DedupKey, Identity};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: Mutex<HashSet<DedupKey>>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// True if no entry has been recorded for `identity` on `date`.
    pub fn should_record(&self, identity: &Identity, date: NaiveDate) -> bool {
        !self.lock().contains(&(identity.clone(), date))
    }

    /// Mark `identity` as recorded on `date`. Returns false if it already was.
    pub fn mark_recorded(&self, identity: &Identity, date: NaiveDate) -> bool {
        self.lock().insert((identity.clone(), date))
    }

    /// Atomically check, commit and mark.
    ///
    /// Returns `Ok(None)` if the key was already recorded. Otherwise runs
    /// `commit` while holding the ledger lock and marks the key only if the
    /// commit succeeded, so a failed write leaves the key eligible for retry.
    pub fn record_once<T, E>(
        &self,
        identity: &Identity,
        date: NaiveDate,
        commit: impl FnOnce() -> Result<T, E>,
    ) -> Result<Option<T>, E> {
        let mut seen = self.lock();
        let key = (identity.clone(), date);
        if seen.contains(&key) {
            return Ok(None);
        }
        let value = commit()?;
        seen.insert(key);
        Ok(Some(value))
    }

    /// Pre-populate from rows already present in the durable log.
    /// Returns how many keys were new.
    pub fn seed(&self, keys: impl IntoIterator<Item = DedupKey>) -> usize {
        let mut seen = self.lock();
        keys.into_iter().filter(|k| seen.insert(k.clone())).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    // Every mutation is a single insert, so a poisoned set is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashSet<DedupKey>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn alice() -> Identity {
        Identity::new("alice").unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_should_record_is_idempotent_until_marked() {
        let ledger = DedupLedger::new();
        assert!(ledger.should_record(&alice(), day(1)));
        assert!(ledger.should_record(&alice(), day(1)));

        assert!(ledger.mark_recorded(&alice(), day(1)));
        assert!(!ledger.should_record(&alice(), day(1)));
        assert!(!ledger.mark_recorded(&alice(), day(1)));

        // New day, new window.
        assert!(ledger.should_record(&alice(), day(2)));
    }

    #[test]
    fn test_record_once_commits_once() {
        let ledger = DedupLedger::new();
        let mut writes = 0;
        for _ in 0..100 {
            let r: Result<_, ()> = ledger.record_once(&alice(), day(1), || {
                writes += 1;
                Ok(())
            });
            assert!(r.is_ok());
        }
        assert_eq!(writes, 1);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn test_failed_commit_does_not_mark() {
        let ledger = DedupLedger::new();
        let r: Result<Option<()>, &str> = ledger.record_once(&alice(), day(1), || Err("disk full"));
        assert_eq!(r, Err("disk full"));
        assert!(ledger.should_record(&alice(), day(1)));
        assert!(ledger.is_empty());

        let r: Result<Option<u8>, &str> = ledger.record_once(&alice(), day(1), || Ok(7));
        assert_eq!(r, Ok(Some(7)));
        assert!(!ledger.should_record(&alice(), day(1)));
    }

    #[test]
    fn test_concurrent_record_once_writes_once() {
        let ledger = Arc::new(DedupLedger::new());
        let writes = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                let writes = Arc::clone(&writes);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let _: Result<_, ()> = ledger.record_once(&alice(), day(1), || {
                            writes.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_seed_counts_new_keys() {
        let ledger = DedupLedger::new();
        ledger.mark_recorded(&alice(), day(1));
        let bob = Identity::new("bob").unwrap();
        let added = ledger.seed(vec![(alice(), day(1)), (bob.clone(), day(1)), (bob, day(1))]);
        assert_eq!(added, 1);
        assert_eq!(ledger.len(), 2);
    }
}
