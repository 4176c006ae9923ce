//! Storage locations.
//!
//! A `Location` names where a store lives: a directory on disk, or one of two
//! kinds of in-memory area. Locations are the key of every connection cache,
//! so directory locations are always held in canonical form.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{QuadraError, QuadraResult};

static NEXT_UNIQUE_MEM: AtomicU64 = AtomicU64::new(1);

/// An abstract identifier for a storage area.
///
/// # Example
///
/// ```rust
/// use quadra_common::types::Location;
///
/// let shared = Location::mem_named("graph");
/// assert_eq!(shared, Location::mem_named("graph"));
///
/// // Every unique in-memory location is distinct.
/// assert_ne!(Location::mem(), Location::mem());
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum Location {
    /// A directory on disk, canonicalized.
    Directory(PathBuf),
    /// A shared in-memory area, identified by name.
    Memory(String),
    /// A unique in-memory area. Never shared, never cached.
    MemoryUnique(u64),
}

impl Location {
    /// Returns the location of a directory, creating it if absent.
    pub fn create(path: impl AsRef<Path>) -> QuadraResult<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|e| QuadraError::io_path(path, e))?;
        Self::existing(path)
    }

    /// Returns the location of an existing directory.
    ///
    /// Fails with `NoSuchLocation` if the directory does not exist.
    pub fn existing(path: impl AsRef<Path>) -> QuadraResult<Self> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(QuadraError::no_such_location(path.display()));
        }
        let canonical = path
            .canonicalize()
            .map_err(|e| QuadraError::io_path(path, e))?;
        Ok(Self::Directory(canonical))
    }

    /// Returns a fresh, unique in-memory location.
    #[must_use]
    pub fn mem() -> Self {
        Self::MemoryUnique(NEXT_UNIQUE_MEM.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns a named in-memory location, shared by everyone using the name.
    #[must_use]
    pub fn mem_named(name: impl Into<String>) -> Self {
        Self::Memory(name.into())
    }

    /// Returns true for in-memory locations.
    #[must_use]
    pub fn is_mem(&self) -> bool {
        !matches!(self, Self::Directory(_))
    }

    /// Returns true for unique in-memory locations.
    #[must_use]
    pub fn is_mem_unique(&self) -> bool {
        matches!(self, Self::MemoryUnique(_))
    }

    /// Returns the directory path, if this is an on-disk location.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Directory(path) => Some(path),
            _ => None,
        }
    }

    /// Returns true if the storage area exists. In-memory areas always exist.
    #[must_use]
    pub fn exists(&self) -> bool {
        match self {
            Self::Directory(path) => path.is_dir(),
            _ => true,
        }
    }

    /// Returns the path of a file inside this location.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<PathBuf> {
        self.path().map(|dir| dir.join(name))
    }

    /// Returns true if the named file exists inside this location.
    #[must_use]
    pub fn has_file(&self, name: &str) -> bool {
        self.file(name).is_some_and(|p| p.exists())
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Location({self})")
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directory(path) => write!(f, "{}", path.display()),
            Self::Memory(name) => write!(f, "mem:{name}"),
            Self::MemoryUnique(id) => write!(f, "mem:#{id}"),
        }
    }
}
