//! Size-bounded key/value stores for durable snapshots
//!
//! Sizes are measured in UTF-8 bytes of key plus value. A write that would
//! push the store past its quota fails with `QuotaExceeded` and leaves the
//! previous value for that key untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove(&mut self, key: &str);

    fn keys(&self) -> Vec<String>;

    /// Remove every key starting with `prefix`; returns how many were removed
    fn remove_prefixed(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self.keys().into_iter().filter(|k| k.starts_with(prefix)).collect();
        for key in &doomed {
            self.remove(key);
        }
        doomed.len()
    }
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: BTreeMap<String, String>,
    quota: usize,
}

impl MemorySessionStore {
    pub fn new(quota: usize) -> Self {
        Self { entries: BTreeMap::new(), quota }
    }

    pub fn used(&self) -> usize {
        self.entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let replaced = self.entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
        let others = self.used() - replaced;
        let needed = key.len() + value.len();
        if others + needed > self.quota {
            return Err(StorageError::QuotaExceeded {
                needed,
                available: self.quota.saturating_sub(others),
            });
        }
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }

    fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// One JSON file per key in a directory
#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    quota: usize,
}

const FILE_EXT: &str = "json";

/// Keys may hold characters that are not valid in file names
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl FileSessionStore {
    pub fn open(dir: &Path, quota: usize) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        Ok(Self { dir: dir.to_path_buf(), quota })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), FILE_EXT))
    }

    fn entries(&self) -> Vec<(String, u64)> {
        let Ok(read) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        read.flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some(FILE_EXT) {
                    return None;
                }
                let key = decode_key(path.file_stem()?.to_str()?)?;
                let size = entry.metadata().ok()?.len();
                Some((key, size))
            })
            .collect()
    }

    pub fn used(&self) -> usize {
        self.entries().iter().map(|(k, size)| k.len() + *size as usize).sum()
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn set(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let others: usize = self
            .entries()
            .iter()
            .filter(|(k, _)| k != key)
            .map(|(k, size)| k.len() + *size as usize)
            .sum();
        let needed = key.len() + value.len();
        if others + needed > self.quota {
            return Err(StorageError::QuotaExceeded {
                needed,
                available: self.quota.saturating_sub(others),
            });
        }

        // Readers see either the old file or the new one
        let path = self.path_for(key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            fs::remove_file(&tmp).ok();
            return Err(e.into());
        }
        Ok(())
    }

    fn remove(&mut self, key: &str) {
        fs::remove_file(self.path_for(key)).ok();
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().into_iter().map(|(k, _)| k).collect();
        keys.sort();
        keys
    }
}
