use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::StrataError;

/// File name used to record that a build step has run.
pub const STAMP_FILE: &str = "strata-stamp";

fn default_excludes() -> Vec<Regex> {
    let patterns = [
        format!("{}$", regex::escape(STAMP_FILE)),
        r"\.strata-patches$".to_string(),
        r"(?:^|/)(?:CVS|_darcs|\.svn)$".to_string(),
    ];
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("default exclusion pattern compiles"))
        .collect()
}

fn io_error(path: &Path, err: impl fmt::Display) -> StrataError {
    StrataError::Io {
        message: err.to_string(),
        path: path.display().to_string(),
    }
}

/// Finds the latest modification time within a source tree.
///
/// Hidden entries (leading `.`) are pruned, as are stamp files, patch
/// directories, and common VCS bookkeeping directories. Additional
/// exclusion patterns are matched against the full path.
///
/// # Examples
/// ```no_run
/// use regex::Regex;
/// use strata_cfg::timestamps::TreeScan;
///
/// let (path, mtime) = TreeScan::new("src")
///     .exclude(Regex::new(r"\.o$")?)
///     .latest()?;
/// println!("newest: {} ({:?})", path.display(), mtime);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct TreeScan {
    root: PathBuf,
    exclude: Vec<Regex>,
}

impl TreeScan {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        TreeScan {
            root: root.into(),
            exclude: default_excludes(),
        }
    }

    /// Adds an exclusion pattern, matched against the full entry path.
    pub fn exclude(mut self, pattern: Regex) -> Self {
        self.exclude.push(pattern);
        self
    }

    /// Excludes a literal path prefix.
    pub fn exclude_path(self, path: &str) -> Self {
        let pattern = Regex::new(&format!("^{}", regex::escape(path)))
            .expect("escaped path pattern compiles");
        self.exclude(pattern)
    }

    /// Walks the tree and returns the most recently modified regular file
    /// with its mtime. Returns an empty path and `UNIX_EPOCH` when the
    /// tree holds no eligible files.
    pub fn latest(&self) -> Result<(PathBuf, SystemTime), StrataError> {
        debug!(root = %self.root.display(), "scanning tree for newest file");

        let mut newest = SystemTime::UNIX_EPOCH;
        let mut newest_file = PathBuf::new();

        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| self.keep(entry));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                io_error(&path, &e)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let modified = entry
                .metadata()
                .map_err(|e| io_error(entry.path(), &e))?
                .modified()
                .map_err(|e| io_error(entry.path(), &e))?;
            if newest < modified {
                newest = modified;
                newest_file = entry.path().to_path_buf();
            }
        }

        debug!(newest = %newest_file.display(), "newest file found");
        Ok((newest_file, newest))
    }

    fn keep(&self, entry: &walkdir::DirEntry) -> bool {
        if entry.depth() == 0 {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        let path = entry.path().to_string_lossy();
        for pattern in &self.exclude {
            if pattern.is_match(&path) {
                debug!(path = %path, pattern = %pattern, "excluding from scan");
                return false;
            }
        }
        true
    }
}

/// Reads a stamp file's mtime; a missing stamp reads as `UNIX_EPOCH`.
pub fn stamp_time(path: impl AsRef<Path>) -> SystemTime {
    fs::metadata(path.as_ref())
        .and_then(|m| m.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Creates or refreshes a stamp file, creating parent directories as
/// needed. Fails when the parent exists but is not a directory.
///
/// On filesystems with one-second mtime granularity this sleeps for one
/// second afterwards, so that a subsequent scan cannot observe the stamp
/// and a newer source file at the same timestamp.
pub fn touch_stamp(path: impl AsRef<Path>) -> Result<(), StrataError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "touching stamp");

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if dir.exists() && !dir.is_dir() {
            return Err(io_error(dir, "exists and is not a directory"));
        }
        if !dir.exists() {
            fs::create_dir_all(dir).map_err(|e| io_error(dir, &e))?;
        }
    }

    let file = fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)
        .map_err(|e| io_error(path, &e))?;
    file.set_modified(SystemTime::now())
        .map_err(|e| io_error(path, &e))?;

    if !hires_modification_time() {
        thread::sleep(Duration::from_secs(1));
    }
    Ok(())
}

/// Whether file mtimes on this system carry subsecond precision, probed
/// once per process with a throwaway file.
fn hires_modification_time() -> bool {
    static HIRES: Lazy<bool> = Lazy::new(|| {
        let probe = std::env::temp_dir().join(format!("strata-hires-{}", std::process::id()));
        let hires = fs::write(&probe, b"probe")
            .and_then(|_| fs::metadata(&probe))
            .and_then(|m| m.modified())
            .map(|t| {
                t.duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.subsec_nanos() != 0)
                    .unwrap_or(true)
            })
            .unwrap_or(true);
        let _ = fs::remove_file(&probe);
        hires
    });
    *HIRES
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_with_mtime(dir: &Path, name: &str, age: Duration) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, name).unwrap();
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
        path
    }

    #[test]
    fn newest_regular_file_wins() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(dir.path(), "old.txt", Duration::from_secs(100));
        let newest = write_with_mtime(dir.path(), "new.txt", Duration::from_secs(5));

        let (path, mtime) = TreeScan::new(dir.path()).latest().unwrap();
        assert_eq!(path, newest);
        assert!(mtime > SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn hidden_entries_are_pruned() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(dir.path(), ".hidden", Duration::from_secs(1));
        write_with_mtime(dir.path(), ".git/objects/blob", Duration::from_secs(1));
        let seen = write_with_mtime(dir.path(), "seen.txt", Duration::from_secs(50));

        let (path, _) = TreeScan::new(dir.path()).latest().unwrap();
        assert_eq!(path, seen);
    }

    #[test]
    fn exclusion_patterns_are_respected() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(dir.path(), "build/output.o", Duration::from_secs(1));
        let kept = write_with_mtime(dir.path(), "main.c", Duration::from_secs(50));

        let scan = TreeScan::new(dir.path()).exclude(Regex::new(r"(?:^|/)build$").unwrap());
        let (path, _) = scan.latest().unwrap();
        assert_eq!(path, kept);
    }

    #[test]
    fn stamp_files_are_excluded_by_default() {
        let dir = tempfile::tempdir().unwrap();
        write_with_mtime(dir.path(), STAMP_FILE, Duration::from_secs(1));
        let kept = write_with_mtime(dir.path(), "source.rs", Duration::from_secs(50));

        let (path, _) = TreeScan::new(dir.path()).latest().unwrap();
        assert_eq!(path, kept);
    }

    #[test]
    fn empty_tree_reads_as_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let (path, mtime) = TreeScan::new(dir.path()).latest().unwrap();
        assert_eq!(path, PathBuf::new());
        assert_eq!(mtime, SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn missing_stamp_reads_as_epoch() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            stamp_time(dir.path().join("no-such-stamp")),
            SystemTime::UNIX_EPOCH
        );
    }

    #[test]
    fn touch_stamp_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = dir.path().join("nested/deeper").join(STAMP_FILE);

        touch_stamp(&stamp).unwrap();
        assert!(stamp.is_file());
        assert!(stamp_time(&stamp) > SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn touch_stamp_refreshes_an_existing_stamp() {
        let dir = tempfile::tempdir().unwrap();
        let stamp = write_with_mtime(dir.path(), STAMP_FILE, Duration::from_secs(100));
        let before = stamp_time(&stamp);

        touch_stamp(&stamp).unwrap();
        assert!(stamp_time(&stamp) > before);
    }

    #[test]
    fn touch_stamp_rejects_file_as_parent() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let err = touch_stamp(blocker.join(STAMP_FILE)).unwrap_err();
        assert!(matches!(err, StrataError::Io { .. }));
    }
}
