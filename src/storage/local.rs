//! Named blob store for files this peer owns locally.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub struct LocalFileStore {
    dir: PathBuf,
    /// Mirrors the directory contents so list/delete don't re-stat the
    /// filesystem while holding the lock.
    index: Mutex<HashSet<String>>,
}

impl LocalFileStore {
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut index = HashSet::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    index.insert(name.to_string());
                }
            }
        }
        Ok(Self { dir, index: Mutex::new(index) })
    }

    fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    pub fn put(&self, filename: &str, data: &[u8]) -> io::Result<()> {
        fs::write(self.path_for(filename), data)?;
        self.index.lock().unwrap().insert(filename.to_string());
        Ok(())
    }

    pub fn get(&self, filename: &str) -> Option<Vec<u8>> {
        if !self.index.lock().unwrap().contains(filename) {
            return None;
        }
        fs::read(self.path_for(filename)).ok()
    }

    pub fn delete(&self, filename: &str) -> bool {
        let mut index = self.index.lock().unwrap();
        if !index.remove(filename) {
            return false;
        }
        let _ = fs::remove_file(self.path_for(filename));
        true
    }

    pub fn list(&self) -> Vec<String> {
        let mut files: Vec<String> = self.index.lock().unwrap().iter().cloned().collect();
        files.sort();
        files
    }

    pub fn contains(&self, filename: &str) -> bool {
        self.index.lock().unwrap().contains(filename)
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }
}
