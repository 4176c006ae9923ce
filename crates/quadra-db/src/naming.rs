//! Generation directory naming, discovery and recovery cleanup.
//!
//! A container directory holds numbered generations `Data-0001`,
//! `Data-0002`, ... of which the highest is the active one. Compaction leaves
//! two kinds of debris when interrupted: `Data-NNNN-tmp` staging directories
//! and paths listed in the work-in-progress marker file. Both are removed by
//! [`clean_incomplete_state`] before a container is first opened.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use quadra_common::constants::{
    FIRST_GENERATION, GENERATION_BASE, GENERATION_INDEX_WIDTH, GENERATION_SEP, INCOMPLETE_WIP,
    STAGING_SUFFIX,
};
use quadra_common::error::{QuadraError, QuadraResult};
use tracing::{error, info, warn};

/// How [`scan_generations`] treats entries that look like, but are not,
/// generation directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Any such entry is an error.
    Strict,
    /// Such entries are skipped.
    Lenient,
}

/// A generation directory found in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    /// Generation index.
    pub index: u64,
    /// Directory path.
    pub path: PathBuf,
}

/// What [`clean_incomplete_state`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Staging directories removed.
    pub staging_removed: Vec<PathBuf>,
    /// Paths from the work-in-progress marker that were removed.
    pub pending_removed: Vec<PathBuf>,
    /// Paths that could not be removed and need manual clean-up.
    pub failed: Vec<PathBuf>,
}

impl CleanupReport {
    /// Returns true if nothing needed cleaning.
    pub fn is_clean(&self) -> bool {
        self.staging_removed.is_empty() && self.pending_removed.is_empty() && self.failed.is_empty()
    }
}

// =============================================================================
// Names
// =============================================================================

/// Returns the directory name of generation `index`, zero-padded to four
/// digits.
pub fn generation_name(index: u64) -> String {
    format!(
        "{GENERATION_BASE}{GENERATION_SEP}{index:0width$}",
        width = GENERATION_INDEX_WIDTH
    )
}

/// Returns the name of the first generation of a new container.
pub fn initial_generation_name() -> String {
    generation_name(FIRST_GENERATION)
}

/// Returns the digit run of a `Data-<digits>` name.
fn generation_digits(name: &str) -> Option<&str> {
    let digits = name
        .strip_prefix(GENERATION_BASE)?
        .strip_prefix(GENERATION_SEP)?;
    (!digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())).then_some(digits)
}

/// Parses the index of a `Data-<digits>` name.
///
/// Returns `Ok(None)` for names of any other form and `Internal` when the
/// number does not fit.
pub fn parse_generation(name: &str) -> QuadraResult<Option<u64>> {
    let Some(digits) = generation_digits(name) else {
        return Ok(None);
    };
    digits
        .parse::<u64>()
        .map(Some)
        .map_err(|_| QuadraError::internal(format!("generation index out of range in '{name}'")))
}

/// Returns the name following `current`, keeping its digit width.
///
/// `Data-0009` becomes `Data-0010`, `Data-9999` becomes `Data-10000`.
pub fn next_generation_name(current: &str) -> QuadraResult<String> {
    let digits = generation_digits(current).ok_or_else(|| {
        QuadraError::invalid_argument(format!("not a generation name: '{current}'"))
    })?;
    let index = parse_generation(current)?.unwrap_or_default();
    let next = index
        .checked_add(1)
        .ok_or_else(|| QuadraError::internal(format!("no generation after '{current}'")))?;
    Ok(format!(
        "{GENERATION_BASE}{GENERATION_SEP}{next:0width$}",
        width = digits.len()
    ))
}

/// Returns the staging directory used while building `target`.
pub fn staging_path(target: &Path) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

fn is_staging_name(name: &str) -> bool {
    name.strip_suffix(STAGING_SUFFIX)
        .and_then(generation_digits)
        .is_some()
}

// =============================================================================
// Discovery
// =============================================================================

/// Lists the generation directories of `container`, lowest index first.
pub fn scan_generations(container: &Path, mode: ScanMode) -> QuadraResult<Vec<Generation>> {
    let entries = fs::read_dir(container).map_err(|e| {
        warn!(container = %container.display(), "cannot inspect container directory");
        QuadraError::io_path(container, e)
    })?;

    let mut generations = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| QuadraError::io_path(container, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(GENERATION_BASE) {
            continue;
        }
        let path = entry.path();

        let index = match parse_generation(&name) {
            Ok(Some(index)) => index,
            Ok(None) => match mode {
                ScanMode::Strict => {
                    return Err(QuadraError::inconsistent_state(format!(
                        "unexpected entry in container: {}",
                        path.display()
                    )))
                }
                ScanMode::Lenient => continue,
            },
            Err(e) => match mode {
                ScanMode::Strict => return Err(e),
                ScanMode::Lenient => continue,
            },
        };

        // Follows symbolic links.
        if !path.is_dir() {
            match mode {
                ScanMode::Strict => {
                    return Err(QuadraError::inconsistent_state(format!(
                        "not a directory: {}",
                        path.display()
                    )))
                }
                ScanMode::Lenient => continue,
            }
        }
        generations.push(Generation { index, path });
    }

    generations.sort_by(|a, b| a.index.cmp(&b.index).then_with(|| a.path.cmp(&b.path)));
    Ok(generations)
}

/// Returns the active generation directory of `container`, if any.
pub fn find_storage_location(container: &Path) -> QuadraResult<Option<PathBuf>> {
    if !container.exists() {
        return Ok(None);
    }
    Ok(scan_generations(container, ScanMode::Strict)?
        .pop()
        .map(|g| g.path))
}

// =============================================================================
// Recovery
// =============================================================================

/// Removes what interrupted compactions left behind in `container`.
///
/// Staging directories are deleted, then every path listed in the
/// work-in-progress marker, then the marker itself. A listed path that
/// cannot be removed is logged and reported; it does not stop the cleanup.
pub fn clean_incomplete_state(container: &Path) -> QuadraResult<CleanupReport> {
    let mut report = CleanupReport::default();

    let entries = fs::read_dir(container).map_err(|e| QuadraError::io_path(container, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| QuadraError::io_path(container, e))?;
        if !is_staging_name(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let path = entry.path();
        info!(path = %path.display(), "removing incomplete compaction directory");
        remove_path(&path).map_err(|e| QuadraError::io_path(&path, e))?;
        report.staging_removed.push(path);
    }

    let marker = container.join(INCOMPLETE_WIP);
    for path in read_marker(&marker)? {
        if !path.exists() {
            continue;
        }
        info!(path = %path.display(), "removing incomplete work-in-progress");
        match remove_path(&path) {
            Ok(()) => report.pending_removed.push(path),
            Err(e) => {
                error!(path = %path.display(), error = %e, "cannot delete, manual clean-up required");
                report.failed.push(path);
            }
        }
    }
    match fs::remove_file(&marker) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(QuadraError::io_path(&marker, e)),
    }

    Ok(report)
}

/// Lists the paths recorded in the work-in-progress marker of `container`.
pub fn pending_deletions(container: &Path) -> QuadraResult<Vec<PathBuf>> {
    read_marker(&container.join(INCOMPLETE_WIP))
}

/// Records `path` for deletion on the next open of `container`.
pub fn record_pending_deletion(container: &Path, path: &Path) -> QuadraResult<()> {
    let marker = container.join(INCOMPLETE_WIP);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&marker)
        .map_err(|e| QuadraError::io_path(&marker, e))?;
    writeln!(file, "{}", path.display())
        .and_then(|_| file.sync_data())
        .map_err(|e| QuadraError::io_path(&marker, e))
}

/// Drops `path` from the work-in-progress marker of `container`.
///
/// The marker is deleted once it lists nothing.
pub fn forget_pending_deletion(container: &Path, path: &Path) -> QuadraResult<()> {
    let marker = container.join(INCOMPLETE_WIP);
    let remaining: Vec<PathBuf> = read_marker(&marker)?
        .into_iter()
        .filter(|p| p != path)
        .collect();

    let result = if remaining.is_empty() {
        match fs::remove_file(&marker) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    } else {
        let text: String = remaining
            .iter()
            .map(|p| format!("{}\n", p.display()))
            .collect();
        fs::write(&marker, text)
    };
    result.map_err(|e| QuadraError::io_path(&marker, e))
}

fn read_marker(marker: &Path) -> QuadraResult<Vec<PathBuf>> {
    let text = match fs::read_to_string(marker) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(QuadraError::io_path(marker, e)),
    };
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect())
}

/// Deletes a file or a directory tree.
pub(crate) fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
