use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{CacheEntry, CacheError, Fingerprint, Result, ResultCache};
use crate::domain::TestResult;
use crate::obs::emit_cache_corruption;

/// Filesystem-backed result cache with git-style 2-char sharding.
///
/// Layout: `<root>/entries/<first 2 hex chars>/<remaining hex chars>.json`
///
/// Writes go to a temp file in the shard directory and are renamed into
/// place, so readers never observe a half-written entry. Concurrent writers
/// resolve last-writer-wins on `stored_at`.
///
/// Writers in one process are serialized and stamped with strictly
/// increasing times. Across processes the check-then-rename is not atomic:
/// an older entry renamed in after ours is detected by re-reading and
/// rewritten once, but a third interleaving writer can still win.
pub struct FsResultCache {
    entries_dir: PathBuf,
    /// Last `stored_at` handed out; held for the whole write.
    last_stamp: Mutex<DateTime<Utc>>,
}

impl FsResultCache {
    /// Create a cache rooted at `root`. Creates `root/entries/` if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let entries_dir = root.as_ref().join("entries");
        fs::create_dir_all(&entries_dir)?;
        Ok(Self {
            entries_dir,
            last_stamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
        })
    }

    fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        let hex = fingerprint.to_hex();
        self.entries_dir
            .join(&hex[..2])
            .join(format!("{}.json", &hex[2..]))
    }

    fn read_entry(&self, path: &Path, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::Io(e)),
        };

        let entry: CacheEntry = serde_json::from_slice(&bytes).map_err(|e| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        if entry.fingerprint != fingerprint.to_hex() {
            return Err(CacheError::Corrupt {
                path: path.to_path_buf(),
                reason: format!("entry holds fingerprint {}", entry.fingerprint),
            });
        }
        Ok(Some(entry))
    }

    fn holds_newer(&self, path: &Path, fingerprint: &Fingerprint, entry: &CacheEntry) -> bool {
        matches!(
            self.read_entry(path, fingerprint),
            Ok(Some(existing)) if existing.stored_at > entry.stored_at
        )
    }

    fn write_entry(&self, path: &Path, entry: &CacheEntry) -> Result<()> {
        let shard_dir = path.parent().ok_or_else(|| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: "entry path has no parent".to_string(),
        })?;
        fs::create_dir_all(shard_dir)?;

        let json = serde_json::to_vec_pretty(entry)?;
        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}

/// Next write stamp: the wall clock, bumped past the previous stamp when the
/// clock stalls or steps back.
fn next_stamp(last: &mut DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let stamp = now.max(*last + Duration::microseconds(1));
    *last = stamp;
    stamp
}

impl ResultCache for FsResultCache {
    fn lookup(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let path = self.entry_path(fingerprint);
        match self.read_entry(&path, fingerprint) {
            Ok(entry) => entry,
            Err(e) => {
                emit_cache_corruption(&path.display().to_string(), &e);
                if matches!(e, CacheError::Corrupt { .. }) {
                    let _ = fs::remove_file(&path);
                }
                None
            }
        }
    }

    fn store(&self, fingerprint: &Fingerprint, result: &TestResult) -> Result<bool> {
        if !result.passed {
            return Ok(false);
        }

        let path = self.entry_path(fingerprint);
        let mut last = self.last_stamp.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = CacheEntry {
            fingerprint: fingerprint.to_hex(),
            result: result.clone(),
            stored_at: next_stamp(&mut last, Utc::now()),
        };

        // An unreadable existing entry is simply overwritten.
        if self.holds_newer(&path, fingerprint, &entry) {
            debug!(fingerprint = %fingerprint, "newer entry already stored, skipping write");
            return Ok(false);
        }
        self.write_entry(&path, &entry)?;

        // Another process may have renamed an older entry over ours.
        if let Ok(Some(current)) = self.read_entry(&path, fingerprint) {
            if current.stored_at < entry.stored_at {
                debug!(fingerprint = %fingerprint, "older entry replaced ours, rewriting");
                self.write_entry(&path, &entry)?;
            }
        }
        Ok(true)
    }

    fn clear(&self) -> Result<()> {
        if self.entries_dir.exists() {
            fs::remove_dir_all(&self.entries_dir)?;
        }
        fs::create_dir_all(&self.entries_dir)?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let mut count = 0;
        for shard in fs::read_dir(&self.entries_dir)? {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for file in fs::read_dir(shard.path())? {
                if file?.path().extension().is_some_and(|ext| ext == "json") {
                    count += 1;
                }
            }
        }
        Ok(count)
    }
}
