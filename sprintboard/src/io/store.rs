//! Board store: the persisted shared document behind the board lock.
//!
//! Storage is injectable ([`BoardBackend`]) so tests can run isolated
//! in-memory boards and a networked store can slot in later. Every mutation is
//! one [`BoardStore::transact`]: acquire, read the whole document, modify,
//! validate, write, release.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::invariants::validate_invariants;
use crate::core::types::Board;
use crate::error::BoardError;
use crate::io::backlog::BacklogSource;
use crate::io::lock::{BoardLock, LockGuard};
use crate::io::write_atomic;

/// Where the board document lives.
pub trait BoardBackend {
    /// Load the document, or `None` if it was never written.
    fn load(&self) -> Result<Option<Board>>;
    /// Replace the document in one atomic step.
    fn save(&self, board: &Board) -> Result<()>;
}

/// JSON document on disk, replaced via temp file + rename.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BoardBackend for FileBackend {
    fn load(&self) -> Result<Option<Board>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("read board {}", self.path.display()));
            }
        };
        let board: Board = serde_json::from_str(&contents)
            .with_context(|| format!("parse board {}", self.path.display()))?;
        Ok(Some(board))
    }

    fn save(&self, board: &Board) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(board).context("serialize board")?;
        buf.push('\n');
        write_atomic(&self.path, &buf)
    }
}

/// In-memory document for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    doc: Mutex<Option<Board>>,
}

impl MemoryBackend {
    pub fn with_board(board: Board) -> Self {
        Self {
            doc: Mutex::new(Some(board)),
        }
    }
}

impl BoardBackend for MemoryBackend {
    fn load(&self) -> Result<Option<Board>> {
        Ok(self
            .doc
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone())
    }

    fn save(&self, board: &Board) -> Result<()> {
        *self
            .doc
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(board.clone());
        Ok(())
    }
}

/// Lock-guarded access to the board document.
pub struct BoardStore<B, L> {
    backend: B,
    lock: L,
    backlog: Box<dyn BacklogSource + Send + Sync>,
}

impl<B: BoardBackend, L: BoardLock> BoardStore<B, L> {
    pub fn new(backend: B, lock: L, backlog: Box<dyn BacklogSource + Send + Sync>) -> Self {
        Self {
            backend,
            lock,
            backlog,
        }
    }

    pub fn lock(&self) -> &L {
        &self.lock
    }

    /// Read the current board without locking.
    ///
    /// A missing document is bootstrapped from the backlog with every story
    /// `ready-for-dev`; it is persisted by the next `write`.
    pub fn read(&self) -> Result<Board> {
        if let Some(board) = self.backend.load()? {
            return Ok(board);
        }
        let keys = self.backlog.story_keys().context("import backlog")?;
        info!(stories = keys.len(), "bootstrapping board from backlog");
        Ok(Board::from_story_keys(keys))
    }

    /// Persist the board. The guard is proof the caller holds the lock.
    pub fn write(&self, _guard: &LockGuard<'_, L>, board: &Board) -> Result<()> {
        let errors = validate_invariants(board);
        if !errors.is_empty() {
            return Err(BoardError::Invariant(errors).into());
        }
        self.backend.save(board)
    }

    /// Persist the board as read, bootstrapping it from the backlog if it
    /// does not exist yet.
    pub fn initialize(&self) -> Result<Board> {
        let guard = self.lock.guard()?;
        let board = self.read()?;
        self.write(&guard, &board)?;
        Ok(board)
    }

    /// Run one read-modify-write under the lock.
    ///
    /// Nothing is written if `f` fails; the lock is released on every path.
    #[instrument(skip_all)]
    pub fn transact<T>(&self, f: impl FnOnce(&mut Board) -> Result<T>) -> Result<T> {
        let guard = self.lock.guard()?;
        let mut board = self.read()?;
        let before = board.clone();
        let out = f(&mut board)?;
        if board != before {
            self.write(&guard, &board)?;
            debug!("board written");
        }
        Ok(out)
    }
}
