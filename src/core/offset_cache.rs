use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

const CACHE_FILE: &str = "phred_offsets.json";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
struct CacheEntry {
    size: u64,
    modified: u64,
    offset: u8,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: BTreeMap<String, CacheEntry>,
}

/// Remembers auto-detected phred offsets per input file.
///
/// An entry only matches while the file keeps the size and modification time
/// it had when the offset was stored. Cache problems are logged and otherwise
/// ignored.
#[derive(Clone, Debug)]
pub struct OffsetCache {
    path: PathBuf,
}

impl OffsetCache {
    pub fn open_default() -> Option<Self> {
        let dirs = ProjectDirs::from("io", "kira", "kira-readstats")?;
        Some(Self::at(dirs.cache_dir().join(CACHE_FILE)))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lookup(&self, input: &Path) -> Option<u8> {
        let (key, size, modified) = fingerprint(input).ok()?;
        let cache = self.load().ok()?;
        let entry = cache.entries.get(&key)?;
        if entry.size == size && entry.modified == modified {
            log::debug!("offset cache hit for {}: {}", key, entry.offset);
            Some(entry.offset)
        } else {
            None
        }
    }

    pub fn store(&self, input: &Path, offset: u8) {
        if let Err(e) = self.try_store(input, offset) {
            log::warn!(
                "failed to update offset cache {}: {}",
                self.path.display(),
                e
            );
        }
    }

    fn try_store(&self, input: &Path, offset: u8) -> io::Result<()> {
        let (key, size, modified) = fingerprint(input)?;
        let mut cache = self.load().unwrap_or_default();
        cache.entries.insert(
            key,
            CacheEntry {
                size,
                modified,
                offset,
            },
        );
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_vec_pretty(&cache).map_err(io::Error::other)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<CacheFile> {
        let bytes = fs::read(&self.path)?;
        serde_json::from_slice(&bytes).map_err(io::Error::other)
    }
}

fn fingerprint(input: &Path) -> io::Result<(String, u64, u64)> {
    let canonical = fs::canonicalize(input)?;
    let meta = fs::metadata(&canonical)?;
    let modified = meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    Ok((canonical.to_string_lossy().into_owned(), meta.len(), modified))
}
