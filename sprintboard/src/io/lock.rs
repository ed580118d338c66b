//! Board lock primitive.
//!
//! [`DirLock`] relies on one atomic operation: `mkdir` fails if the directory
//! already exists. The directory's modification time is the staleness clock;
//! a lock older than `stale_after` may be taken over by another acquirer.
//! There is no heartbeat, so holds must stay short (one read-modify-write).
//!
//! Callers go through the [`BoardLock`] trait so a networked lock service can
//! replace the directory lock without touching them.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::error::BoardError;
use crate::io::config::LockConfig;

const OWNER_FILE: &str = "owner";

/// Proof of a successful acquisition; hand it back to `release`.
#[derive(Debug, PartialEq, Eq)]
pub struct LockToken {
    nonce: String,
}

impl LockToken {
    fn generate() -> Self {
        Self {
            nonce: format!("{}-{:08x}", std::process::id(), rand::random::<u32>()),
        }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }
}

/// Mutual exclusion over the board document.
pub trait BoardLock {
    /// Acquire the lock, failing with `BoardError::LockTimeout` once the
    /// retry budget is spent.
    fn acquire(&self) -> Result<LockToken>;

    /// Release a held lock. Never fails; releasing a lock the caller does not
    /// hold is a no-op that logs a warning.
    fn release(&self, token: LockToken);

    /// Acquire and wrap the token in a guard that releases on drop.
    fn guard(&self) -> Result<LockGuard<'_, Self>>
    where
        Self: Sized,
    {
        let token = self.acquire()?;
        Ok(LockGuard {
            lock: self,
            token: Some(token),
        })
    }
}

/// Releases the lock on every exit path, including `?` and panics.
pub struct LockGuard<'a, L: BoardLock> {
    lock: &'a L,
    token: Option<LockToken>,
}

impl<L: BoardLock> Drop for LockGuard<'_, L> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.release(token);
        }
    }
}

/// Retry policy shared by lock implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl From<&LockConfig> for RetryPolicy {
    fn from(cfg: &LockConfig) -> Self {
        Self {
            attempts: cfg.attempts,
            interval: Duration::from_millis(cfg.retry_interval_ms),
        }
    }
}

impl RetryPolicy {
    fn timeout(&self, started: Instant) -> anyhow::Error {
        BoardError::LockTimeout {
            attempts: self.attempts,
            waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
        .into()
    }
}

/// Directory-based lock for a single machine.
#[derive(Debug, Clone)]
pub struct DirLock {
    path: PathBuf,
    retry: RetryPolicy,
    stale_after: Duration,
}

impl DirLock {
    pub fn new(path: impl Into<PathBuf>, retry: RetryPolicy, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            retry,
            stale_after,
        }
    }

    pub fn from_config(path: impl Into<PathBuf>, cfg: &LockConfig) -> Self {
        Self::new(
            path,
            RetryPolicy::from(cfg),
            Duration::from_secs(cfg.stale_after_secs),
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the lock directory exists and is older than `stale_after`.
    pub fn is_stale(&self) -> Result<bool> {
        let modified = match fs::metadata(&self.path) {
            Ok(meta) => meta.modified().context("read lock mtime")?,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => {
                return Err(err).with_context(|| format!("stat lock {}", self.path.display()));
            }
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        Ok(age > self.stale_after)
    }

    fn read_owner(&self) -> Option<String> {
        fs::read_to_string(self.path.join(OWNER_FILE))
            .ok()
            .and_then(|contents| contents.lines().next().map(str::to_string))
    }

    fn write_owner(&self, token: &LockToken) -> Result<()> {
        let body = format!(
            "{}\npid={}\nacquired_at={}\n",
            token.nonce,
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        fs::write(self.path.join(OWNER_FILE), body)
            .with_context(|| format!("write lock owner {}", self.path.display()))
    }

    /// Move a stale lock aside and delete it. Renaming first means only one
    /// of several concurrent takers removes it.
    fn take_over(&self) -> Result<()> {
        warn!(
            lock = %self.path.display(),
            owner = ?self.read_owner(),
            stale_after_secs = self.stale_after.as_secs(),
            "taking over stale board lock"
        );
        let tombstone = self.path.with_extension(format!(
            "stale.{}.{:08x}",
            std::process::id(),
            rand::random::<u32>()
        ));
        match fs::rename(&self.path, &tombstone) {
            Ok(()) => fs::remove_dir_all(&tombstone)
                .with_context(|| format!("remove stale lock {}", tombstone.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("move stale lock {}", self.path.display())),
        }
    }
}

impl BoardLock for DirLock {
    #[instrument(skip_all, fields(lock = %self.path.display()))]
    fn acquire(&self) -> Result<LockToken> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create lock parent {}", parent.display()))?;
        }
        let started = Instant::now();
        for attempt in 1..=self.retry.attempts {
            match fs::create_dir(&self.path) {
                Ok(()) => {
                    let token = LockToken::generate();
                    if let Err(err) = self.write_owner(&token) {
                        let _ = fs::remove_dir_all(&self.path);
                        return Err(err);
                    }
                    debug!(attempt, nonce = %token.nonce, "board lock acquired");
                    return Ok(token);
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if self.is_stale()? {
                        self.take_over()?;
                        continue;
                    }
                    debug!(attempt, "board lock busy");
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("create lock {}", self.path.display()));
                }
            }
            if attempt < self.retry.attempts {
                thread::sleep(self.retry.interval);
            }
        }
        warn!(attempts = self.retry.attempts, "board lock acquisition timed out");
        Err(self.retry.timeout(started))
    }

    fn release(&self, token: LockToken) {
        match self.read_owner() {
            Some(owner) if owner == token.nonce => {
                if let Err(err) = fs::remove_dir_all(&self.path) {
                    warn!(lock = %self.path.display(), err = %err, "failed to remove board lock");
                } else {
                    debug!(nonce = %token.nonce, "board lock released");
                }
            }
            Some(owner) => warn!(
                lock = %self.path.display(),
                nonce = %token.nonce,
                owner = %owner,
                "release of board lock held by someone else ignored"
            ),
            None => warn!(
                lock = %self.path.display(),
                nonce = %token.nonce,
                "release of board lock that is not held ignored"
            ),
        }
    }
}

/// In-process lock for embedding and tests.
#[derive(Debug)]
pub struct MemoryLock {
    holder: Mutex<Option<String>>,
    retry: RetryPolicy,
}

impl MemoryLock {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            holder: Mutex::new(None),
            retry,
        }
    }

    pub fn is_held(&self) -> bool {
        self.holder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}

impl Default for MemoryLock {
    fn default() -> Self {
        Self::new(RetryPolicy {
            attempts: 10,
            interval: Duration::from_millis(5),
        })
    }
}

impl BoardLock for MemoryLock {
    fn acquire(&self) -> Result<LockToken> {
        let started = Instant::now();
        for attempt in 1..=self.retry.attempts {
            {
                let mut holder = self
                    .holder
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if holder.is_none() {
                    let token = LockToken::generate();
                    *holder = Some(token.nonce.clone());
                    return Ok(token);
                }
            }
            if attempt < self.retry.attempts {
                thread::sleep(self.retry.interval);
            }
        }
        Err(self.retry.timeout(started))
    }

    fn release(&self, token: LockToken) {
        let mut holder = self
            .holder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if holder.as_deref() == Some(token.nonce.as_str()) {
            *holder = None;
        } else {
            warn!(nonce = %token.nonce, "release of memory lock that is not held ignored");
        }
    }
}
