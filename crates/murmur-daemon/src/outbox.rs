//! Authoring conversations into the outbox.
//!
//! UIs (and tests) create a conversation by dropping a directory into the
//! outbox: a metadata file naming the participants and subject, plus one
//! file per message. The engine picks the directory up from the watcher.
//! Creation stages in `tmp/` and renames, so the watcher never observes a
//! half-written conversation.

use std::path::PathBuf;

use murmur_proto::ConversationMetadata;

use crate::{
    DaemonError,
    paths::{Layout, METADATA_FILE, conversation_dir_name},
};

/// Create a conversation directory in the outbox.
///
/// `participants` must include the local user. Message files are named
/// `msg-<n>`; the engine renames them by date and sender once sent.
pub fn spawn_conversation(
    layout: &Layout,
    now_nanos: i64,
    subject: &str,
    participants: &[String],
    messages: &[Vec<u8>],
) -> Result<PathBuf, DaemonError> {
    let staging = tempfile::tempdir_in(layout.tmp())?;

    let metadata = ConversationMetadata {
        participants: participants.to_vec(),
        subject: subject.to_string(),
    };
    std::fs::write(staging.path().join(METADATA_FILE), metadata.to_bytes()?)?;
    for (idx, contents) in messages.iter().enumerate() {
        std::fs::write(staging.path().join(format!("msg-{idx}")), contents)?;
    }

    let dest = layout.outbox().join(conversation_dir_name(now_nanos, participants));
    std::fs::rename(staging.keep(), &dest)?;
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawned_conversation_has_metadata_and_messages() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::new(dir.path().to_path_buf());
        layout.init_fs().unwrap();

        let participants = vec!["user".to_string(), "peer-b".to_string(), "peer-a".to_string()];
        let dest = spawn_conversation(
            &layout,
            1_257_894_000_000_000_000,
            "test subject",
            &participants,
            &[b"message1".to_vec(), b"message2".to_vec()],
        )
        .unwrap();

        assert_eq!(
            dest.file_name().unwrap().to_str().unwrap(),
            "2009-11-10T23:00:00Z-peer-a-peer-b-user"
        );
        let metadata = ConversationMetadata::from_bytes(
            &std::fs::read(dest.join(METADATA_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(metadata.subject, "test subject");
        assert_eq!(std::fs::read_dir(&dest).unwrap().count(), 3);
        // Staging cleaned up.
        assert_eq!(std::fs::read_dir(layout.tmp()).unwrap().count(), 0);
    }
}
