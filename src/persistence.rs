// File: src/persistence.rs
use crate::error::{Result, TrainerError};
use crate::learning::ErrorProfile;
use fs4::FileExt;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// One reader/writer lock per user record. Writers exclude readers, so an
/// inspection never sees a profile halfway through a merge.
///
/// With a lock directory the in-process lock is backed by an advisory lock on
/// `<user>.lock`, which other processes opening the same store also honour.
/// Both waits share one deadline.
#[derive(Debug)]
pub struct UserLocks {
    timeout: Duration,
    lock_dir: Option<PathBuf>,
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

const FILE_LOCK_POLL: Duration = Duration::from_millis(10);

impl UserLocks {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            lock_dir: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_lock_dir(timeout: Duration, dir: impl Into<PathBuf>) -> Self {
        Self {
            lock_dir: Some(dir.into()),
            ..Self::new(timeout)
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock_for(&self, user_id: &str) -> Arc<RwLock<()>> {
        self.locks
            .lock()
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    // Clones are only handed out under the map mutex, so a count of one
    // means no caller is waiting on or holding this lock.
    fn release(&self, user_id: &str, lock: Arc<RwLock<()>>) {
        drop(lock);
        let mut locks = self.locks.lock();
        if locks.get(user_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(user_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().len()
    }

    fn timed_out(&self, user_id: &str) -> TrainerError {
        TrainerError::LockTimeout {
            user_id: user_id.to_string(),
            waited: self.timeout,
        }
    }

    fn with_write<R>(&self, user_id: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let deadline = Instant::now() + self.timeout;
        let lock = self.lock_for(user_id);
        let out = match lock.try_write_for(self.timeout) {
            Some(_guard) => self.with_file_lock(user_id, true, deadline, f),
            None => Err(self.timed_out(user_id)),
        };
        self.release(user_id, lock);
        out
    }

    fn with_read<R>(&self, user_id: &str, f: impl FnOnce() -> Result<R>) -> Result<R> {
        let deadline = Instant::now() + self.timeout;
        let lock = self.lock_for(user_id);
        let out = match lock.try_read_for(self.timeout) {
            Some(_guard) => self.with_file_lock(user_id, false, deadline, f),
            None => Err(self.timed_out(user_id)),
        };
        self.release(user_id, lock);
        out
    }

    fn with_file_lock<R>(
        &self,
        user_id: &str,
        exclusive: bool,
        deadline: Instant,
        f: impl FnOnce() -> Result<R>,
    ) -> Result<R> {
        let Some(dir) = &self.lock_dir else {
            return f();
        };
        if !exclusive && !dir.is_dir() {
            // Nothing stored yet, so there is nothing a writer could tear.
            return f();
        }
        fs::create_dir_all(dir).map_err(|e| TrainerError::io("creating profile dir", e))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(dir.join(format!("{user_id}.lock")))
            .map_err(|e| TrainerError::io("opening profile lock", e))?;

        loop {
            let attempt = if exclusive {
                FileExt::try_lock_exclusive(&file)
            } else {
                FileExt::try_lock_shared(&file)
            };
            match attempt {
                Ok(()) => break,
                Err(e) if e.kind() != ErrorKind::WouldBlock => {
                    return Err(TrainerError::io("locking profile", e));
                }
                Err(_) if Instant::now() >= deadline => return Err(self.timed_out(user_id)),
                Err(_) => thread::sleep(FILE_LOCK_POLL),
            }
        }

        let out = f();
        // Closing the handle releases it as well.
        if let Err(e) = FileExt::unlock(&file) {
            debug!(user_id, error = %e, "profile lock left to be released on close");
        }
        out
    }
}

/// Stable user identifiers double as record names, so they are kept to a
/// filename-safe alphabet.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    let valid = !user_id.is_empty()
        && !user_id.starts_with('.')
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(TrainerError::invalid_input(format!(
            "user id '{user_id}' must be non-empty [A-Za-z0-9_.-] and not start with '.'"
        )))
    }
}

/// Durable home of per-user error profiles.
///
/// Implementors supply unlocked record access; the provided methods wrap it
/// in the per-user lock. The read-modify-write in [`ProfileStore::update`]
/// runs entirely under the exclusive lock.
pub trait ProfileStore: Send + Sync {
    fn locks(&self) -> &UserLocks;

    /// `Ok(None)` when the user has no record yet.
    fn read_record(&self, user_id: &str) -> Result<Option<ErrorProfile>>;

    /// Must replace the record atomically: readers see the old or the new
    /// profile, never a mix.
    fn write_record(&self, user_id: &str, profile: &ErrorProfile) -> Result<()>;

    /// Moves an unreadable record out of the way, keeping it for inspection.
    fn quarantine_record(&self, user_id: &str) -> Result<()>;

    fn load(&self, user_id: &str) -> Result<ErrorProfile> {
        validate_user_id(user_id)?;
        self.locks()
            .with_read(user_id, || Ok(self.read_record(user_id)?.unwrap_or_default()))
    }

    fn save(&self, user_id: &str, profile: &ErrorProfile) -> Result<()> {
        validate_user_id(user_id)?;
        self.locks()
            .with_write(user_id, || self.write_record(user_id, profile))
    }

    /// Like `load`, but an unreadable record is backed up and replaced by an
    /// empty profile instead of failing.
    fn load_or_recover(&self, user_id: &str) -> Result<ErrorProfile> {
        validate_user_id(user_id)?;
        self.locks().with_write(user_id, || self.read_or_recover(user_id))
    }

    /// Locked read-modify-write of one user's profile. The profile is saved
    /// after `f` returns, whatever `f` did to it.
    fn update<R>(&self, user_id: &str, f: impl FnOnce(&mut ErrorProfile) -> R) -> Result<R>
    where
        Self: Sized,
    {
        validate_user_id(user_id)?;
        self.locks().with_write(user_id, || {
            let mut profile = self.read_or_recover(user_id)?;
            let out = f(&mut profile);
            self.write_record(user_id, &profile)?;
            info!(user_id, words = profile.weak_words.len(), "profile updated");
            Ok(out)
        })
    }

    /// Read-only access under the shared lock.
    fn inspect<R>(&self, user_id: &str, f: impl FnOnce(&ErrorProfile) -> R) -> Result<R>
    where
        Self: Sized,
    {
        validate_user_id(user_id)?;
        self.locks().with_read(user_id, || {
            let profile = self.read_record(user_id)?.unwrap_or_default();
            Ok(f(&profile))
        })
    }

    #[doc(hidden)]
    fn read_or_recover(&self, user_id: &str) -> Result<ErrorProfile> {
        match self.read_record(user_id) {
            Ok(profile) => Ok(profile.unwrap_or_default()),
            Err(err @ TrainerError::ProfileCorruption { .. }) => {
                warn!(user_id, error = %err, "backing up unreadable profile and starting fresh");
                self.quarantine_record(user_id)?;
                Ok(ErrorProfile::new())
            }
            Err(err) => Err(err),
        }
    }
}

// Bytes rather than text: a record that is not even UTF-8 is corrupt, not an
// I/O failure.
fn parse_profile(user_id: &str, path: &Path, raw: &[u8]) -> Result<ErrorProfile> {
    let mut profile: ErrorProfile =
        serde_json::from_slice(raw).map_err(|source| TrainerError::ProfileCorruption {
            user_id: user_id.to_string(),
            path: path.to_path_buf(),
            source,
        })?;
    profile.normalize();
    Ok(profile)
}

fn backup_suffix() -> String {
    format!("corrupt-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ"))
}

/// One pretty-printed JSON document per user under a directory, next to a
/// `<user>.lock` file that serializes access across processes.
#[derive(Debug)]
pub struct FileProfileStore {
    dir: PathBuf,
    locks: UserLocks,
}

impl FileProfileStore {
    pub fn new(dir: impl Into<PathBuf>, lock_timeout: Duration) -> Self {
        let dir = dir.into();
        Self {
            locks: UserLocks::with_lock_dir(lock_timeout, dir.clone()),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.dir.join(format!("{user_id}.json"))
    }
}

impl ProfileStore for FileProfileStore {
    fn locks(&self) -> &UserLocks {
        &self.locks
    }

    fn read_record(&self, user_id: &str) -> Result<Option<ErrorProfile>> {
        let path = self.path_for(user_id);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrainerError::io("reading profile", e)),
        };
        parse_profile(user_id, &path, &raw).map(Some)
    }

    fn write_record(&self, user_id: &str, profile: &ErrorProfile) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| TrainerError::io("creating profile dir", e))?;

        let temp_file = NamedTempFile::new_in(&self.dir)
            .map_err(|e| TrainerError::io("creating temp profile", e))?;
        {
            let mut writer = BufWriter::new(&temp_file);
            serde_json::to_writer_pretty(&mut writer, profile)
                .map_err(|e| TrainerError::json("serializing profile", e))?;
            writer
                .flush()
                .map_err(|e| TrainerError::io("writing temp profile", e))?;
        }
        temp_file
            .as_file()
            .sync_all()
            .map_err(|e| TrainerError::io("syncing temp profile", e))?;

        let path = self.path_for(user_id);
        temp_file
            .persist(&path)
            .map_err(|e| TrainerError::io("replacing profile", e.error))?;
        debug!(user_id, path = %path.display(), "profile written");
        Ok(())
    }

    fn quarantine_record(&self, user_id: &str) -> Result<()> {
        let path = self.path_for(user_id);
        let backup = self
            .dir
            .join(format!("{user_id}.json.{}", backup_suffix()));
        fs::rename(&path, &backup).map_err(|e| TrainerError::io("backing up corrupt profile", e))?;
        warn!(user_id, backup = %backup.display(), "corrupt profile moved aside");
        Ok(())
    }
}

/// Keeps serialized documents in memory. Useful for tests and for embedding
/// the engine where durability is handled elsewhere.
#[derive(Debug)]
pub struct MemoryProfileStore {
    locks: UserLocks,
    records: Mutex<HashMap<String, String>>,
    quarantined: Mutex<Vec<(String, String)>>,
}

impl MemoryProfileStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            locks: UserLocks::new(lock_timeout),
            records: Mutex::new(HashMap::new()),
            quarantined: Mutex::new(Vec::new()),
        }
    }

    /// The stored document, byte for byte.
    pub fn raw(&self, user_id: &str) -> Option<String> {
        self.records.lock().get(user_id).cloned()
    }

    pub fn insert_raw(&self, user_id: &str, raw: impl Into<String>) {
        self.records.lock().insert(user_id.to_string(), raw.into());
    }

    pub fn quarantined(&self) -> Vec<(String, String)> {
        self.quarantined.lock().clone()
    }
}

impl Default for MemoryProfileStore {
    fn default() -> Self {
        Self::new(Duration::from_millis(crate::config::TrainerConfig::DEFAULT_LOCK_TIMEOUT_MS))
    }
}

impl ProfileStore for MemoryProfileStore {
    fn locks(&self) -> &UserLocks {
        &self.locks
    }

    fn read_record(&self, user_id: &str) -> Result<Option<ErrorProfile>> {
        match self.raw(user_id) {
            Some(raw) => parse_profile(user_id, Path::new(user_id), raw.as_bytes()).map(Some),
            None => Ok(None),
        }
    }

    fn write_record(&self, user_id: &str, profile: &ErrorProfile) -> Result<()> {
        let raw = serde_json::to_string_pretty(profile)
            .map_err(|e| TrainerError::json("serializing profile", e))?;
        self.insert_raw(user_id, raw);
        Ok(())
    }

    fn quarantine_record(&self, user_id: &str) -> Result<()> {
        if let Some(raw) = self.records.lock().remove(user_id) {
            self.quarantined
                .lock()
                .push((format!("{user_id}.{}", backup_suffix()), raw));
        }
        Ok(())
    }
}
