//! On-disk layout and naming.
//!
//! Everything lives under one root directory:
//!
//! ```text
//! <root>/config              account configuration (secrets)
//! <root>/outbox/<conv>/      user-authored: metadata + message files
//! <root>/conversations/<conv>/  delivered messages and the sent mirror
//! <root>/ratchets/<peer>     persisted session per peer
//! <root>/prekeys/pool        local prekey pairs (secret halves)
//! <root>/profiles/<name>     cached registry replies
//! <root>/tmp/                staging for atomic renames
//! ```
//!
//! A conversation directory is named
//! `YYYY-MM-DDThh:mm:ssZ-<sorted participants joined by '-'>`, stamped
//! from the first message's date; both the sending and the receiving side
//! derive the same suffix from the participant list, and receivers reuse
//! an existing directory with a matching suffix and subject rather than
//! forking a new one.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::DaemonError;

/// Name of the per-conversation metadata file.
pub const METADATA_FILE: &str = "metadata";

/// Root-relative directory layout.
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    /// Layout rooted at `root`.
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The account root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// User-authored outgoing conversations.
    pub fn outbox(&self) -> PathBuf {
        self.root.join("outbox")
    }

    /// Delivered messages and the sent mirror.
    pub fn conversations(&self) -> PathBuf {
        self.root.join("conversations")
    }

    /// Persisted sessions.
    pub fn ratchets(&self) -> PathBuf {
        self.root.join("ratchets")
    }

    /// The local prekey pool file.
    pub fn prekey_pool(&self) -> PathBuf {
        self.root.join("prekeys").join("pool")
    }

    /// Cached registry replies.
    pub fn profiles(&self) -> PathBuf {
        self.root.join("profiles")
    }

    /// Staging directory for atomic renames.
    pub fn tmp(&self) -> PathBuf {
        self.root.join("tmp")
    }

    /// Create the directory tree.
    pub fn init_fs(&self) -> std::io::Result<()> {
        for dir in [
            self.outbox(),
            self.conversations(),
            self.ratchets(),
            self.root.join("prekeys"),
            self.profiles(),
            self.tmp(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Session file for `peer`.
    pub fn ratchet_file(&self, peer: &str) -> Result<PathBuf, DaemonError> {
        Ok(self.ratchets().join(safe_name(peer)?))
    }

    /// Cached reply file for `name`.
    pub fn profile_file(&self, name: &str) -> Result<PathBuf, DaemonError> {
        Ok(self.profiles().join(safe_name(name)?))
    }
}

/// Validate a registry name for use as a path component.
///
/// Names are chosen in the registry, i.e. by strangers; nothing resembling
/// path syntax gets near the filesystem.
pub fn safe_name(name: &str) -> Result<&str, DaemonError> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if ok { Ok(name) } else { Err(DaemonError::BadName(name.to_string())) }
}

/// Format a timestamp for a conversation directory (whole seconds).
pub fn conversation_stamp(unix_nanos: i64) -> String {
    timestamp(unix_nanos).to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a timestamp for a message file name (nanoseconds).
pub fn message_stamp(unix_nanos: i64) -> String {
    timestamp(unix_nanos).to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn timestamp(unix_nanos: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_nanos(unix_nanos)
}

/// The participant suffix shared by both sides of a conversation.
pub fn participant_suffix(participants: &[String]) -> String {
    let mut sorted: Vec<&str> = participants.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join("-")
}

/// Directory name for a conversation started at `unix_nanos`.
pub fn conversation_dir_name(unix_nanos: i64, participants: &[String]) -> String {
    format!("{}-{}", conversation_stamp(unix_nanos), participant_suffix(participants))
}

/// File name for a message stamped `unix_nanos` from `sender`.
pub fn message_file_name(unix_nanos: i64, sender: &str) -> String {
    format!("{}-{}", message_stamp(unix_nanos), sender)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversation_name_sorts_participants() {
        let participants =
            vec!["bob".to_string(), "alice".to_string(), "carol".to_string()];
        // 2009-11-10T23:00:00Z
        let nanos = 1_257_894_000_000_000_000;
        assert_eq!(
            conversation_dir_name(nanos, &participants),
            "2009-11-10T23:00:00Z-alice-bob-carol"
        );
    }

    #[test]
    fn suffix_is_order_independent() {
        let a = vec!["bob".to_string(), "alice".to_string()];
        let b = vec!["alice".to_string(), "bob".to_string()];
        assert_eq!(participant_suffix(&a), participant_suffix(&b));
    }

    #[test]
    fn message_name_has_nanos() {
        let name = message_file_name(1_257_894_000_000_000_001, "alice");
        assert_eq!(name, "2009-11-10T23:00:00.000000001Z-alice");
    }

    #[test]
    fn hostile_names_rejected() {
        assert!(safe_name("alice").is_ok());
        assert!(safe_name("alice.v2-test_x").is_ok());
        assert!(safe_name("").is_err());
        assert!(safe_name("..").is_err());
        assert!(safe_name(".hidden").is_err());
        assert!(safe_name("a/b").is_err());
        assert!(safe_name("a\\b").is_err());
        assert!(safe_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn init_fs_creates_the_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().to_path_buf());
        layout.init_fs().unwrap();
        assert!(layout.outbox().is_dir());
        assert!(layout.conversations().is_dir());
        assert!(layout.ratchets().is_dir());
        assert!(layout.profiles().is_dir());
        assert!(layout.tmp().is_dir());
    }
}
