//! Translation state database.
//!
//! One JSON document, keyed by card file name, remembering each file's
//! content hash and whether it was backed up and translated. The hash is
//! what tells a self-inflicted write (our own translation landing on
//! disk) apart from an external edit that needs re-translation.

use crate::backup::{file_key, BackupStore};
use crate::chunk;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("no backup recorded for {0:?}")]
    MissingBackup(String),
    #[error("state database is corrupt: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Persisted per-file record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileState {
    pub content_hash: String,
    pub backed_up: bool,
    pub translated: bool,
    pub updated_at: DateTime<Utc>,
}

pub struct StateStore {
    db_path: PathBuf,
    backups: BackupStore,
    entries: Mutex<BTreeMap<String, FileState>>,
}

impl StateStore {
    /// Opens (or starts) the database at `db_path`. A corrupt database is
    /// renamed aside and replaced with an empty one rather than blocking
    /// every later operation.
    pub fn open(db_path: impl Into<PathBuf>, backups: BackupStore) -> Result<Self, StateError> {
        let db_path = db_path.into();
        let entries = match load_entries(&db_path) {
            Ok(entries) => entries,
            Err(StateError::Corrupt(reason)) => {
                let aside = db_path.with_extension("corrupt");
                warn!(
                    "state database unreadable ({reason}); moving it to {}",
                    aside.display()
                );
                fs::rename(&db_path, &aside)?;
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        Ok(Self {
            db_path,
            backups,
            entries: Mutex::new(entries),
        })
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    /// Records the file's current content and returns the resulting
    /// state. An unknown path or a changed hash drops the translated
    /// flag; a missing backup is taken before the entry is returned, so
    /// the original is archived before anything can overwrite it.
    pub fn note_change(&self, path: &Path) -> Result<FileState, StateError> {
        let key = file_key(path);
        let hash = hash_file(path)?;
        let mut entries = self.lock();

        let mut dirty = false;
        let entry = entries.entry(key).or_insert_with(|| {
            dirty = true;
            FileState {
                content_hash: hash.clone(),
                backed_up: false,
                translated: false,
                updated_at: Utc::now(),
            }
        });
        if entry.content_hash != hash {
            entry.content_hash = hash;
            entry.translated = false;
            entry.updated_at = Utc::now();
            dirty = true;
        }
        if !entry.backed_up {
            self.backups.backup_once(path)?;
            entry.backed_up = true;
            dirty = true;
        }
        let snapshot = entry.clone();

        if dirty {
            self.persist(&entries)?;
        }
        Ok(snapshot)
    }

    pub fn is_translated(&self, path: &Path) -> bool {
        let key = file_key(path);
        self.lock()
            .get(&key)
            .map(|entry| entry.translated)
            .unwrap_or(false)
    }

    /// Marks the file translated, re-hashing it so the write we just made
    /// does not later read as an external modification.
    pub fn mark_translated(&self, path: &Path) -> Result<(), StateError> {
        let key = file_key(path);
        let hash = hash_file(path)?;
        let mut entries = self.lock();
        let entry = entries
            .get_mut(&key)
            .filter(|entry| entry.backed_up)
            .ok_or_else(|| StateError::MissingBackup(key.clone()))?;
        entry.content_hash = hash;
        entry.translated = true;
        entry.updated_at = Utc::now();
        self.persist(&entries)
    }

    /// Puts the archived original back at `path`. The translated flag is
    /// kept (an explicit clear is what re-enables translation); the hash
    /// moves to the restored bytes so the file reads as unchanged.
    pub fn restore_one(&self, path: &Path) -> Result<(), StateError> {
        let key = file_key(path);
        {
            let entries = self.lock();
            let known = entries
                .get(&key)
                .map(|entry| entry.backed_up)
                .unwrap_or(false);
            if !known || !self.backups.has_backup(&key) {
                return Err(StateError::MissingBackup(key));
            }
        }
        self.backups.restore(&key, path)?;

        let hash = hash_file(path)?;
        let mut entries = self.lock();
        if let Some(entry) = entries.get_mut(&key) {
            entry.content_hash = hash;
            entry.updated_at = Utc::now();
        }
        self.persist(&entries)
    }

    /// Restores every backed-up file into `live_dir`. Returns how many
    /// files were put back.
    pub fn restore_all(&self, live_dir: &Path) -> Result<usize, StateError> {
        let keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.backed_up)
            .map(|(key, _)| key.clone())
            .collect();

        let mut restored = 0;
        for key in keys {
            match self.restore_one(&live_dir.join(&key)) {
                Ok(()) => restored += 1,
                Err(err) => warn!("restore of {key:?} failed: {err}"),
            }
        }
        info!("restored {restored} original files");
        Ok(restored)
    }

    /// Drops the translated flag for one file so it becomes eligible
    /// again. The entry, its backup, and the backed-up flag all stay.
    pub fn clear_one(&self, path: &Path) -> Result<bool, StateError> {
        let key = file_key(path);
        let mut entries = self.lock();
        match entries.get_mut(&key) {
            Some(entry) => {
                entry.translated = false;
                entry.updated_at = Utc::now();
                self.persist(&entries)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops the translated flag for every file.
    pub fn clear_all(&self) -> Result<(), StateError> {
        let mut entries = self.lock();
        for entry in entries.values_mut() {
            entry.translated = false;
            entry.updated_at = Utc::now();
        }
        self.persist(&entries)
    }

    pub fn snapshot(&self) -> BTreeMap<String, FileState> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, FileState>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, entries: &BTreeMap<String, FileState>) -> Result<(), StateError> {
        if let Some(parent) = self.db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(entries)
            .map_err(|err| StateError::Corrupt(err.to_string()))?;
        chunk::write_atomic(&self.db_path, &serialized)?;
        Ok(())
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, FileState>, StateError> {
    let raw = match fs::read(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(err) => return Err(err.into()),
    };
    serde_json::from_slice(&raw).map_err(|err| StateError::Corrupt(err.to_string()))
}

fn hash_file(path: &Path) -> io::Result<String> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &Path) -> StateStore {
        StateStore::open(
            dir.join("translation_db.json"),
            BackupStore::new(dir.join("Original")),
        )
        .unwrap()
    }

    #[test]
    fn first_sight_archives_and_records() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let card = dir.path().join("card.png");
        fs::write(&card, b"original").unwrap();

        let state = store.note_change(&card).unwrap();
        assert!(state.backed_up);
        assert!(!state.translated);
        assert!(store.backups().has_backup("card.png"));

        let again = store.note_change(&card).unwrap();
        assert_eq!(again.content_hash, state.content_hash);
    }

    #[test]
    fn external_edit_drops_translated_flag() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let card = dir.path().join("card.png");
        fs::write(&card, b"original").unwrap();
        store.note_change(&card).unwrap();

        fs::write(&card, b"translated output").unwrap();
        store.mark_translated(&card).unwrap();
        let state = store.note_change(&card).unwrap();
        assert!(state.translated);

        fs::write(&card, b"edited by hand").unwrap();
        let state = store.note_change(&card).unwrap();
        assert!(!state.translated);
    }

    #[test]
    fn backup_is_made_once_and_holds_first_bytes() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let card = dir.path().join("card.png");
        fs::write(&card, b"first").unwrap();
        store.note_change(&card).unwrap();

        fs::write(&card, b"second").unwrap();
        store.note_change(&card).unwrap();

        let archived = fs::read(store.backups().archive_dir().join("card.png")).unwrap();
        assert_eq!(archived, b"first");
    }

    #[test]
    fn restore_keeps_translated_flag_and_updates_hash() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let card = dir.path().join("card.png");
        fs::write(&card, b"original").unwrap();
        store.note_change(&card).unwrap();
        fs::write(&card, b"translated").unwrap();
        store.mark_translated(&card).unwrap();

        store.restore_one(&card).unwrap();
        assert_eq!(fs::read(&card).unwrap(), b"original");
        let state = store.note_change(&card).unwrap();
        assert!(state.translated);
    }

    #[test]
    fn mark_without_backup_is_rejected() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let card = dir.path().join("card.png");
        fs::write(&card, b"bytes").unwrap();
        assert!(matches!(
            store.mark_translated(&card),
            Err(StateError::MissingBackup(_))
        ));
    }

    #[test]
    fn clear_resets_only_the_translated_flag() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let card = dir.path().join("card.png");
        fs::write(&card, b"bytes").unwrap();
        store.note_change(&card).unwrap();
        store.mark_translated(&card).unwrap();
        assert!(store.is_translated(&card));

        store.clear_all().unwrap();
        assert!(!store.is_translated(&card));

        let entry = store.snapshot().remove("card.png").unwrap();
        assert!(entry.backed_up);
        assert!(store.backups().has_backup("card.png"));
    }

    #[test]
    fn clear_one_reports_whether_the_entry_existed() {
        let dir = tempdir().unwrap();
        let store = store_in(dir.path());
        let card = dir.path().join("card.png");
        fs::write(&card, b"bytes").unwrap();
        assert!(!store.clear_one(&card).unwrap());

        store.note_change(&card).unwrap();
        store.mark_translated(&card).unwrap();
        assert!(store.clear_one(&card).unwrap());
        assert!(!store.is_translated(&card));
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let card = dir.path().join("card.png");
        fs::write(&card, b"bytes").unwrap();
        {
            let store = store_in(dir.path());
            store.note_change(&card).unwrap();
            fs::write(&card, b"out").unwrap();
            store.mark_translated(&card).unwrap();
        }
        let store = store_in(dir.path());
        assert!(store.is_translated(&card));
    }

    #[test]
    fn corrupt_database_is_moved_aside() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("translation_db.json"), b"{ not json").unwrap();
        let store = store_in(dir.path());
        assert!(store.snapshot().is_empty());
        assert!(dir.path().join("translation_db.corrupt").exists());
    }
}
