//! Pre-translation archive.
//!
//! The first time a card is seen, its untouched bytes are copied into the
//! archive directory under the same file name. The copy is made exactly
//! once per file name; later translations and edits never overwrite it,
//! so the original can always be brought back.

use crate::chunk;
use log::debug;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BackupStore {
    archive_dir: PathBuf,
}

impl BackupStore {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    pub fn has_backup(&self, file_name: &str) -> bool {
        self.archive_dir.join(file_name).is_file()
    }

    /// Archives `source` under its file name unless an archive copy
    /// already exists. Returns whether a new copy was made.
    pub fn backup_once(&self, source: &Path) -> io::Result<bool> {
        let file_name = file_key(source);
        let destination = self.archive_dir.join(&file_name);
        if destination.exists() {
            return Ok(false);
        }
        fs::create_dir_all(&self.archive_dir)?;
        fs::copy(source, &destination)?;
        debug!("archived original of {file_name:?}");
        Ok(true)
    }

    /// Copies the archived original back over `target` atomically.
    pub fn restore(&self, file_name: &str, target: &Path) -> io::Result<()> {
        let bytes = fs::read(self.archive_dir.join(file_name))?;
        chunk::write_atomic(target, &bytes)
    }

    /// File names currently held in the archive, sorted.
    pub fn archived_files(&self) -> io::Result<Vec<String>> {
        if !self.archive_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.archive_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

pub(crate) fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn archives_each_file_exactly_once() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("Original"));
        let card = dir.path().join("card.png");
        fs::write(&card, b"first bytes").unwrap();

        assert!(store.backup_once(&card).unwrap());
        fs::write(&card, b"changed bytes").unwrap();
        assert!(!store.backup_once(&card).unwrap());

        let archived = fs::read(store.archive_dir().join("card.png")).unwrap();
        assert_eq!(archived, b"first bytes");
    }

    #[test]
    fn restores_archived_bytes() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("Original"));
        let card = dir.path().join("card.png");
        fs::write(&card, b"original").unwrap();
        store.backup_once(&card).unwrap();

        fs::write(&card, b"translated").unwrap();
        store.restore("card.png", &card).unwrap();
        assert_eq!(fs::read(&card).unwrap(), b"original");
    }

    #[test]
    fn lists_archive_contents() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path().join("Original"));
        assert!(store.archived_files().unwrap().is_empty());

        for name in ["b.png", "a.png"] {
            let card = dir.path().join(name);
            fs::write(&card, b"x").unwrap();
            store.backup_once(&card).unwrap();
        }
        assert_eq!(store.archived_files().unwrap(), vec!["a.png", "b.png"]);
        assert!(store.has_backup("a.png"));
        assert!(!store.has_backup("c.png"));
    }
}
