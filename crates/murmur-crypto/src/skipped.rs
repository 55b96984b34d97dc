//! Bounded store of skipped message keys.
//!
//! Out-of-order delivery within a session is tolerated by deriving and
//! retaining the keys of messages that have not arrived yet. The store is
//! bounded two ways: at most 1000 keys in total, spread over at most 5
//! receiving chains. A decrypt that would exceed either bound fails with
//! `OutOfOrder` and leaves the session untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::{RatchetError, Result};

/// Maximum skipped message keys retained across all chains.
pub(crate) const MAX_SKIPPED_KEYS: usize = 1000;

/// Maximum receiving chains with retained keys.
pub(crate) const MAX_SKIPPED_CHAINS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SkippedChain {
    ratchet_pub: [u8; 32],
    keys: BTreeMap<u32, [u8; 32]>,
}

/// Skipped keys, grouped by the sending ratchet key of their chain.
/// Chains are kept in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SkippedKeys {
    chains: Vec<SkippedChain>,
}

impl SkippedKeys {
    /// Total retained keys across all chains.
    pub(crate) fn len(&self) -> usize {
        self.chains.iter().map(|c| c.keys.len()).sum()
    }

    /// Store the key for `(ratchet_pub, counter)`.
    pub(crate) fn insert(
        &mut self,
        ratchet_pub: [u8; 32],
        counter: u32,
        key: [u8; 32],
    ) -> Result<()> {
        if self.len() + 1 > MAX_SKIPPED_KEYS {
            return Err(RatchetError::OutOfOrder { counter });
        }
        if let Some(chain) =
            self.chains.iter_mut().find(|c| c.ratchet_pub == ratchet_pub)
        {
            chain.keys.insert(counter, key);
            return Ok(());
        }
        if self.chains.len() + 1 > MAX_SKIPPED_CHAINS {
            return Err(RatchetError::OutOfOrder { counter });
        }
        self.chains.push(SkippedChain {
            ratchet_pub,
            keys: BTreeMap::from([(counter, key)]),
        });
        Ok(())
    }

    /// Remove and return the key for `(ratchet_pub, counter)`.
    pub(crate) fn take(&mut self, ratchet_pub: &[u8; 32], counter: u32) -> Option<[u8; 32]> {
        let idx = self.chains.iter().position(|c| &c.ratchet_pub == ratchet_pub)?;
        let key = self.chains[idx].keys.remove(&counter)?;
        if self.chains[idx].keys.is_empty() {
            self.chains.remove(idx);
        }
        Some(key)
    }

    pub(crate) fn zeroize_keys(&mut self) {
        for chain in &mut self.chains {
            for key in chain.keys.values_mut() {
                key.zeroize();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_take_round_trip() {
        let mut store = SkippedKeys::default();
        store.insert([1; 32], 5, [9; 32]).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.take(&[1; 32], 5), Some([9; 32]));
        assert_eq!(store.len(), 0);
        assert_eq!(store.take(&[1; 32], 5), None);
    }

    #[test]
    fn key_bound_enforced() {
        let mut store = SkippedKeys::default();
        for i in 0..MAX_SKIPPED_KEYS as u32 {
            store.insert([1; 32], i, [0; 32]).unwrap();
        }
        assert!(matches!(
            store.insert([1; 32], MAX_SKIPPED_KEYS as u32, [0; 32]),
            Err(RatchetError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn chain_bound_enforced() {
        let mut store = SkippedKeys::default();
        for i in 0..MAX_SKIPPED_CHAINS as u8 {
            store.insert([i; 32], 0, [0; 32]).unwrap();
        }
        assert!(matches!(
            store.insert([255; 32], 0, [0; 32]),
            Err(RatchetError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn emptied_chain_frees_its_slot() {
        let mut store = SkippedKeys::default();
        for i in 0..MAX_SKIPPED_CHAINS as u8 {
            store.insert([i; 32], 0, [0; 32]).unwrap();
        }
        assert!(store.take(&[0; 32], 0).is_some());
        assert!(store.insert([255; 32], 0, [0; 32]).is_ok());
    }
}
