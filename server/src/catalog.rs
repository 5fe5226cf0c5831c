use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{FileRecord, GroupRecord};
use crate::error::TransferError;

/// Records whose retention age is over.
#[derive(Debug, Default)]
pub struct Expired {
    pub files: Vec<FileRecord>,
    pub groups: Vec<String>,
}

/// In-memory index of files and groups.
///
/// Each map sits behind its own lock. Locks are only held for map operations,
/// never across I/O.
#[derive(Default)]
pub struct Catalog {
    files: RwLock<HashMap<String, FileRecord>>,
    groups: RwLock<HashMap<String, GroupRecord>>,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers member files and then the group referencing them, so a visible
    /// group never points at a file that was not yet registered.
    pub fn register_group(
        &self,
        group_id: &str,
        members: Vec<FileRecord>,
    ) -> Result<GroupRecord, TransferError> {
        let Some(created_at) = members.iter().map(|f| f.uploaded_at).min() else {
            return Err(TransferError::Validation("group has no files".to_owned()));
        };
        let group = GroupRecord {
            group_id: group_id.to_owned(),
            member_file_ids: members.iter().map(|f| f.file_id.clone()).collect(),
            created_at,
        };

        {
            let mut files = write(&self.files);
            for member in members {
                files.insert(member.file_id.clone(), member);
            }
        }
        write(&self.groups).insert(group.group_id.clone(), group.clone());

        Ok(group)
    }

    pub fn get_group(&self, group_id: &str) -> Result<GroupRecord, TransferError> {
        read(&self.groups)
            .get(group_id)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(format!("group {group_id}")))
    }

    pub fn get_file(&self, file_id: &str) -> Result<FileRecord, TransferError> {
        read(&self.files)
            .get(file_id)
            .cloned()
            .ok_or_else(|| TransferError::NotFound(format!("file {file_id}")))
    }

    /// Members of a group that still resolve, in upload order.
    ///
    /// Members removed by a concurrent sweep are skipped.
    pub fn group_members(&self, group: &GroupRecord) -> Vec<FileRecord> {
        let files = read(&self.files);
        group
            .member_file_ids
            .iter()
            .filter_map(|id| files.get(id).cloned())
            .collect()
    }

    /// Group that lists the file as a member, if any.
    pub fn group_of(&self, file_id: &str) -> Option<String> {
        read(&self.groups)
            .values()
            .find(|g| g.member_file_ids.iter().any(|id| id == file_id))
            .map(|g| g.group_id.clone())
    }

    pub fn delete_file(&self, file_id: &str) -> Option<FileRecord> {
        write(&self.files).remove(file_id)
    }

    pub fn delete_group(&self, group_id: &str) -> Option<GroupRecord> {
        write(&self.groups).remove(group_id)
    }

    /// Files and groups older than `max_age` at `now`. Does not mutate anything.
    pub fn list_expired(&self, now: DateTime<Utc>, max_age: Duration) -> Expired {
        let files = read(&self.files)
            .values()
            .filter(|f| is_expired(f.uploaded_at, now, max_age))
            .cloned()
            .collect();
        let groups = read(&self.groups)
            .values()
            .filter(|g| is_expired(g.created_at, now, max_age))
            .map(|g| g.group_id.clone())
            .collect();
        Expired { files, groups }
    }

    /// Storage paths of every registered file.
    pub fn storage_paths(&self) -> HashSet<PathBuf> {
        read(&self.files)
            .values()
            .map(|f| f.storage_path.clone())
            .collect()
    }

    pub fn files_count(&self) -> usize {
        read(&self.files).len()
    }

    pub fn groups_count(&self) -> usize {
        read(&self.groups).len()
    }
}

fn is_expired(at: DateTime<Utc>, now: DateTime<Utc>, max_age: Duration) -> bool {
    // Timestamps in the future have a negative age and never expire
    now.signed_duration_since(at)
        .to_std()
        .is_ok_and(|age| age > max_age)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
