//! Atomic local persistence.
//!
//! Every durable write stages into `<root>/tmp` and renames into place, so
//! a crash can never leave a torn ratchet or pool file: readers see the
//! old bytes or the new bytes, nothing in between.

use std::io::Write;

use murmur_crypto::Ratchet;
use murmur_registry::LookupReply;

use crate::{DaemonError, paths::Layout, prekeys::PrekeyPool};

/// Write `bytes` to `path` via a temp file in the layout's staging dir.
pub fn atomic_write(
    layout: &Layout,
    path: &std::path::Path,
    bytes: &[u8],
) -> Result<(), DaemonError> {
    let mut tmp = tempfile::NamedTempFile::new_in(layout.tmp())?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| DaemonError::Io(err.error))?;
    Ok(())
}

/// Persist the session for `peer`.
pub fn store_ratchet(layout: &Layout, peer: &str, ratchet: &Ratchet) -> Result<(), DaemonError> {
    let path = layout.ratchet_file(peer)?;
    atomic_write(layout, &path, &ratchet.to_bytes()?)
}

/// Load the session for `peer`, if one exists.
pub fn load_ratchet(layout: &Layout, peer: &str) -> Result<Option<Ratchet>, DaemonError> {
    let path = layout.ratchet_file(peer)?;
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(Ratchet::from_bytes(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Every persisted session, by peer name.
pub fn all_ratchets(layout: &Layout) -> Result<Vec<(String, Ratchet)>, DaemonError> {
    let mut sessions = Vec::new();
    for entry in std::fs::read_dir(layout.ratchets())? {
        let entry = entry?;
        let Ok(peer) = entry.file_name().into_string() else {
            continue;
        };
        let bytes = std::fs::read(entry.path())?;
        sessions.push((peer, Ratchet::from_bytes(&bytes)?));
    }
    // Deterministic trial order for inbound classification.
    sessions.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(sessions)
}

/// Persist the prekey pool.
pub fn store_prekey_pool(layout: &Layout, pool: &PrekeyPool) -> Result<(), DaemonError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(pool, &mut bytes)
        .map_err(|err| DaemonError::Config(format!("cannot encode prekey pool: {err}")))?;
    atomic_write(layout, &layout.prekey_pool(), &bytes)
}

/// Load the prekey pool; a fresh account has an empty one.
pub fn load_prekey_pool(layout: &Layout) -> Result<PrekeyPool, DaemonError> {
    match std::fs::read(layout.prekey_pool()) {
        Ok(bytes) => ciborium::from_reader(bytes.as_slice())
            .map_err(|err| DaemonError::Config(format!("cannot parse prekey pool: {err}"))),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(PrekeyPool::default()),
        Err(err) => Err(err.into()),
    }
}

/// Cache a registry reply for `name`.
pub fn store_profile_reply(
    layout: &Layout,
    name: &str,
    reply: &LookupReply,
) -> Result<(), DaemonError> {
    let path = layout.profile_file(name)?;
    atomic_write(layout, &path, &reply.to_bytes()?)
}

/// Load the cached registry reply for `name`, if present.
pub fn load_profile_reply(
    layout: &Layout,
    name: &str,
) -> Result<Option<LookupReply>, DaemonError> {
    let path = layout.profile_file(name)?;
    match std::fs::read(&path) {
        Ok(bytes) => Ok(Some(LookupReply::from_bytes(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, Layout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().to_path_buf());
        layout.init_fs().unwrap();
        (dir, layout)
    }

    #[test]
    fn atomic_write_replaces_whole_files() {
        let (_dir, layout) = fixture();
        let path = layout.root().join("conversations").join("file");
        atomic_write(&layout, &path, b"first").unwrap();
        atomic_write(&layout, &path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        // Staging area leaves nothing behind.
        assert_eq!(std::fs::read_dir(layout.tmp()).unwrap().count(), 0);
    }

    #[test]
    fn missing_state_reads_as_absent() {
        let (_dir, layout) = fixture();
        assert!(load_ratchet(&layout, "nobody").unwrap().is_none());
        assert!(load_profile_reply(&layout, "nobody").unwrap().is_none());
        assert_eq!(load_prekey_pool(&layout).unwrap().len(), 0);
        assert!(all_ratchets(&layout).unwrap().is_empty());
    }

    #[test]
    fn prekey_pool_round_trips() {
        let (_dir, layout) = fixture();
        let mut pool = PrekeyPool::default();
        pool.generate_into(3, &mut rand::rngs::OsRng);
        store_prekey_pool(&layout, &pool).unwrap();
        let loaded = load_prekey_pool(&layout).unwrap();
        assert_eq!(loaded.len(), 3);
    }
}
