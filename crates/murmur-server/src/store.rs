//! Redb-backed mailbox storage.
//!
//! Three tables, all keyed so one user's records form a contiguous range:
//!
//! - `users`: `uid` -> empty existence marker
//! - `prekeys`: `uid || sha256(signed_prekey)` -> signed prekey bytes
//! - `envelopes`: `uid || sha256(envelope)` -> envelope bytes
//!
//! Redb commits are durable (fsynced) and write transactions are
//! serialized, which makes [`MailboxStore::take_prekey`]'s scan-then-remove
//! atomic: no two callers can ever receive the same prekey. Content
//! addressing by SHA-256 makes envelope delivery idempotent.

use std::{path::Path, sync::Arc};

use murmur_proto::{Uid, envelope_id};
use redb::{Database, ReadableTable, TableDefinition};
use sha2::{Digest, Sha256};

use crate::StoreError;

/// Table: uid -> () existence marker.
const USERS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("users");

/// Table: uid || sha256(signed prekey) -> signed prekey bytes.
const PREKEYS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("prekeys");

/// Table: uid || sha256(envelope) -> envelope bytes.
const ENVELOPES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("envelopes");

/// Durable per-user mailbox state. Clone is cheap (Arc).
#[derive(Clone)]
pub struct MailboxStore {
    db: Arc<Database>,
}

/// `uid || hash` composite key.
fn scoped_key(uid: &Uid, hash: &[u8; 32]) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(uid);
    key[32..].copy_from_slice(hash);
    key
}

/// Inclusive key range covering every record of `uid`.
fn scope(uid: &Uid) -> ([u8; 64], [u8; 64]) {
    (scoped_key(uid, &[0x00; 32]), scoped_key(uid, &[0xff; 32]))
}

impl MailboxStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(USERS).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(PREKEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            let _ = txn.open_table(ENVELOPES).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Record `uid` as an account. Idempotent.
    pub fn create_user(&self, uid: &Uid) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(USERS).map_err(|e| StoreError::Io(e.to_string()))?;
            let marker: &[u8] = &[];
            table
                .insert(uid.as_slice(), marker)
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Batch-add signed prekeys to `uid`'s pool.
    pub fn add_prekeys(&self, uid: &Uid, keys: &[Vec<u8>]) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(PREKEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            for key in keys {
                let hash: [u8; 32] = Sha256::digest(key).into();
                table
                    .insert(scoped_key(uid, &hash).as_slice(), key.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }

    /// Count `uid`'s remaining prekeys.
    pub fn count_prekeys(&self, uid: &Uid) -> Result<i64, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(PREKEYS).map_err(|e| StoreError::Io(e.to_string()))?;
        let (start, end) = scope(uid);
        let range = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let mut count = 0i64;
        for entry in range {
            entry.map_err(|e| StoreError::Io(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }

    /// Remove and return one prekey from `uid`'s pool, or `None` when the
    /// pool is empty.
    ///
    /// The scan and the removal share one write transaction; concurrent
    /// callers serialize on it, so N calls against a pool of N distinct
    /// keys hand out N distinct keys.
    pub fn take_prekey(&self, uid: &Uid) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        let taken = {
            let mut table =
                txn.open_table(PREKEYS).map_err(|e| StoreError::Io(e.to_string()))?;
            let (start, end) = scope(uid);
            let first = {
                let mut range = table
                    .range(start.as_slice()..=end.as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
                match range.next() {
                    Some(entry) => {
                        let (key, value) =
                            entry.map_err(|e| StoreError::Io(e.to_string()))?;
                        Some((key.value().to_vec(), value.value().to_vec()))
                    }
                    None => None,
                }
            };
            match first {
                Some((key, value)) => {
                    table
                        .remove(key.as_slice())
                        .map_err(|e| StoreError::Io(e.to_string()))?;
                    Some(value)
                }
                None => None,
            }
        };
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(taken)
    }

    /// Store an envelope in `uid`'s mailbox, returning its identity hash.
    /// Depositing identical bytes twice leaves exactly one record.
    pub fn put_envelope(&self, uid: &Uid, envelope: &[u8]) -> Result<[u8; 32], StoreError> {
        let hash = envelope_id(envelope);
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(ENVELOPES).map_err(|e| StoreError::Io(e.to_string()))?;
            table
                .insert(scoped_key(uid, &hash).as_slice(), envelope)
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(hash)
    }

    /// Hashes of every envelope stored for `uid`, in storage order.
    pub fn list_envelopes(&self, uid: &Uid) -> Result<Vec<[u8; 32]>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table =
            txn.open_table(ENVELOPES).map_err(|e| StoreError::Io(e.to_string()))?;
        let (start, end) = scope(uid);
        let range = table
            .range(start.as_slice()..=end.as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        let mut hashes = Vec::new();
        for entry in range {
            let (key, _) = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            let mut hash = [0u8; 32];
            hash.copy_from_slice(&key.value()[32..]);
            hashes.push(hash);
        }
        Ok(hashes)
    }

    /// Fetch one envelope by hash.
    pub fn get_envelope(
        &self,
        uid: &Uid,
        hash: &[u8; 32],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table =
            txn.open_table(ENVELOPES).map_err(|e| StoreError::Io(e.to_string()))?;
        let value = table
            .get(scoped_key(uid, hash).as_slice())
            .map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    /// Batch-delete envelopes by hash. Unknown hashes are ignored.
    pub fn delete_envelopes(
        &self,
        uid: &Uid,
        hashes: &[[u8; 32]],
    ) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(ENVELOPES).map_err(|e| StoreError::Io(e.to_string()))?;
            for hash in hashes {
                table
                    .remove(scoped_key(uid, hash).as_slice())
                    .map_err(|e| StoreError::Io(e.to_string()))?;
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(())
    }
}
