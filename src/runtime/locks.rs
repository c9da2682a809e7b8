use std::cell::RefCell;
use std::collections::HashMap;

use tracing::trace;

use crate::lang::container::Key;

/// Lock ownership shared by every interpreter of one manager.
///
/// Maps a lock key to the id of the interpreter holding it. Only touched
/// between instructions, so a `RefCell` is enough for the single-threaded
/// scheduler.
#[derive(Debug, Default)]
pub struct LockTable {
    owners: RefCell<HashMap<Key, u64>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn owner(&self, key: &Key) -> Option<u64> {
        self.owners.borrow().get(key).copied()
    }

    /// Claims `key` for `interpreter`; false when someone else holds it.
    pub fn claim(&self, key: &Key, interpreter: u64) -> bool {
        let mut owners = self.owners.borrow_mut();
        match owners.get(key) {
            Some(owner) if *owner != interpreter => {
                trace!(%key, owner, interpreter, "lock contended");
                false
            }
            _ => {
                owners.insert(key.clone(), interpreter);
                true
            }
        }
    }

    /// Releases `key` if `interpreter` holds it.
    pub fn release(&self, key: &Key, interpreter: u64) -> bool {
        let mut owners = self.owners.borrow_mut();
        if owners.get(key) == Some(&interpreter) {
            owners.remove(key);
            true
        } else {
            false
        }
    }

    pub fn is_empty(&self) -> bool {
        self.owners.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_and_release() {
        let table = LockTable::new();
        let key = Key::Str("queue".to_string());

        assert!(table.claim(&key, 1));
        assert!(table.claim(&key, 1));
        assert!(!table.claim(&key, 2));
        assert_eq!(table.owner(&key), Some(1));

        assert!(!table.release(&key, 2));
        assert!(table.release(&key, 1));
        assert!(table.is_empty());
        assert!(table.claim(&key, 2));
    }
}
