// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Process-wide writer mutexes keyed by region identity.
//!
//! Every handle opened on the same backing object inside one process gets the
//! same mutex, so buffers built over independently opened regions still
//! serialise their appends.

use std::sync::{Arc, Mutex, OnceLock, Weak};

use dashmap::DashMap;

static WRITER_LOCKS: OnceLock<DashMap<String, Weak<Mutex<()>>>> = OnceLock::new();

/// Return the writer mutex for `key`, creating it on first use.
///
/// Entries hold weak references and are pruned once the last handle using
/// them is dropped.
pub(crate) fn writer_lock_for(key: &str) -> Arc<Mutex<()>> {
    let locks = WRITER_LOCKS.get_or_init(DashMap::new);

    let lock = {
        let mut entry = locks.entry(key.to_string()).or_insert_with(Weak::new);
        if let Some(existing) = entry.upgrade() {
            return existing;
        }
        let lock = Arc::new(Mutex::new(()));
        *entry = Arc::downgrade(&lock);
        lock
    };

    locks.retain(|_, weak| weak.strong_count() > 0);
    lock
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_key_shares_mutex() {
        let first = writer_lock_for("registry:same");
        let second = writer_lock_for("registry:same");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_distinct_keys_get_distinct_mutexes() {
        let first = writer_lock_for("registry:left");
        let second = writer_lock_for("registry:right");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_released_entry_is_recreated() {
        let first = writer_lock_for("registry:released");
        let weak = Arc::downgrade(&first);
        drop(first);
        assert!(weak.upgrade().is_none());

        let second = writer_lock_for("registry:released");
        let third = writer_lock_for("registry:released");
        assert!(Arc::ptr_eq(&second, &third));
    }
}
