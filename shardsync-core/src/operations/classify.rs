use crate::types::{FileContent, FileMetaData};
use serde::Serialize;

/// How one file differs between the local directory, the last synced
/// baseline and the authority's index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Unchanged,
    LocallyModified,
    RemotelyModified,
    Conflicting,
    NewLocal,
    NewRemote,
    DeletedLocal,
    DeletedRemote,
}

impl FileState {
    pub fn needs_upload(&self) -> bool {
        matches!(
            self,
            FileState::NewLocal | FileState::LocallyModified | FileState::DeletedLocal
        )
    }

    pub fn needs_download(&self) -> bool {
        matches!(
            self,
            FileState::NewRemote
                | FileState::RemotelyModified
                | FileState::DeletedRemote
                | FileState::Conflicting
        )
    }
}

/// Classify a file.
///
/// `local` is the content currently on disk (`None` when the file is absent),
/// `base` the entry recorded in the local index after the previous sync and
/// `remote` the authority's entry.
pub fn classify(
    local: Option<&FileContent>,
    base: Option<&FileMetaData>,
    remote: Option<&FileMetaData>,
) -> FileState {
    let local_changed = match (local, base) {
        (Some(content), Some(base)) => *content != base.content,
        (Some(_), None) => true,
        (None, Some(base)) => !base.is_tombstone(),
        (None, None) => false,
    };

    let Some(remote) = remote else {
        return if local.is_some() {
            FileState::NewLocal
        } else {
            FileState::Unchanged
        };
    };

    let base_version = base.map_or(0, |base| base.version);
    let remote_changed = remote.version > base_version;

    match (local_changed, remote_changed) {
        (false, false) => FileState::Unchanged,
        (true, false) => match local {
            Some(_) if base.is_none_or(FileMetaData::is_tombstone) => FileState::NewLocal,
            Some(_) => FileState::LocallyModified,
            None => FileState::DeletedLocal,
        },
        (false, true) => {
            if remote.is_tombstone() {
                FileState::DeletedRemote
            } else if local.is_none() {
                FileState::NewRemote
            } else {
                FileState::RemotelyModified
            }
        }
        // a tombstone never seen by this client does not claim its local file
        (true, true)
            if local.is_some()
                && remote.is_tombstone()
                && base.is_none_or(FileMetaData::is_tombstone) =>
        {
            FileState::NewLocal
        }
        (true, true) => {
            let converged = match local {
                Some(content) => *content == remote.content,
                None => remote.is_tombstone(),
            };
            if converged {
                FileState::Unchanged
            } else {
                FileState::Conflicting
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::compute_hash;

    fn blocks(parts: &[&str]) -> FileContent {
        FileContent::Blocks(parts.iter().map(|p| compute_hash(p.as_bytes())).collect())
    }

    fn meta(version: i64, content: FileContent) -> FileMetaData {
        FileMetaData::new("f.txt", version, content)
    }

    #[test]
    fn test_new_files() {
        assert_eq!(classify(Some(&blocks(&["a"])), None, None), FileState::NewLocal);
        assert_eq!(
            classify(None, None, Some(&meta(1, blocks(&["a"])))),
            FileState::NewRemote
        );
        assert_eq!(classify(None, None, None), FileState::Unchanged);
    }

    #[test]
    fn test_unchanged_when_all_agree() {
        let base = meta(2, blocks(&["a", "b"]));
        assert_eq!(
            classify(Some(&blocks(&["a", "b"])), Some(&base), Some(&base)),
            FileState::Unchanged
        );
    }

    #[test]
    fn test_one_sided_changes() {
        let base = meta(2, blocks(&["a"]));
        let newer = meta(3, blocks(&["b"]));

        assert_eq!(
            classify(Some(&blocks(&["c"])), Some(&base), Some(&base)),
            FileState::LocallyModified
        );
        assert_eq!(
            classify(Some(&blocks(&["a"])), Some(&base), Some(&newer)),
            FileState::RemotelyModified
        );
        assert_eq!(classify(None, Some(&base), Some(&base)), FileState::DeletedLocal);
        assert_eq!(
            classify(Some(&blocks(&["a"])), Some(&base), Some(&meta(3, FileContent::Deleted))),
            FileState::DeletedRemote
        );
    }

    #[test]
    fn test_recreate_after_tombstone_is_new_local() {
        let base = meta(4, FileContent::Deleted);
        assert_eq!(
            classify(Some(&blocks(&["z"])), Some(&base), Some(&base)),
            FileState::NewLocal
        );
        // absent file with a tombstone baseline stays quiet
        assert_eq!(classify(None, Some(&base), Some(&base)), FileState::Unchanged);
    }

    #[test]
    fn test_conflicts() {
        let base = meta(1, blocks(&["a"]));
        let remote = meta(2, blocks(&["b"]));

        assert_eq!(
            classify(Some(&blocks(&["c"])), Some(&base), Some(&remote)),
            FileState::Conflicting
        );
        assert_eq!(classify(None, Some(&base), Some(&remote)), FileState::Conflicting);
        // a local file nobody has synced yet against an existing remote file
        assert_eq!(
            classify(Some(&blocks(&["c"])), None, Some(&remote)),
            FileState::Conflicting
        );

        // a tombstone this client never synced leaves its local file new
        let tombstone = meta(3, FileContent::Deleted);
        assert_eq!(
            classify(Some(&blocks(&["c"])), None, Some(&tombstone)),
            FileState::NewLocal
        );
        assert_eq!(
            classify(Some(&blocks(&["c"])), Some(&meta(2, FileContent::Deleted)), Some(&tombstone)),
            FileState::NewLocal
        );
    }

    #[test]
    fn test_identical_concurrent_edits_converge() {
        let base = meta(1, blocks(&["a"]));
        let remote = meta(2, blocks(&["b"]));
        assert_eq!(
            classify(Some(&blocks(&["b"])), Some(&base), Some(&remote)),
            FileState::Unchanged
        );
        let deleted = meta(2, FileContent::Deleted);
        assert_eq!(classify(None, Some(&base), Some(&deleted)), FileState::Unchanged);
    }
}
