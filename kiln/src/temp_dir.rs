//! Scoped temporary directories that are removed when the scope ends, including when the process
//! is interrupted.

use std::{
    io,
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::debug;

static LIVE: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());

fn live() -> MutexGuard<'static, Vec<PathBuf>> {
    LIVE.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A temporary directory that is deleted on drop. While alive its path is registered so that the
/// interrupt handler can remove it too.
#[derive(Debug)]
pub struct TempDir {
    inner: tempfile::TempDir,
}

impl TempDir {
    pub fn new(prefix: &str) -> io::Result<Self> {
        let inner = tempfile::Builder::new().prefix(prefix).tempdir()?;
        debug!("created temporary directory {}", inner.path().display());
        live().push(inner.path().to_owned());
        Ok(Self { inner })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let path = self.inner.path();
        live().retain(|live| live != path);
        debug!("removing temporary directory {}", path.display());
        // `tempfile::TempDir` removes the directory when `inner` is dropped right after this.
    }
}

/// Removes the given directories, returning how many were removed.
fn remove_dirs(paths: Vec<PathBuf>) -> usize {
    paths
        .iter()
        .filter(|path| std::fs::remove_dir_all(path).is_ok())
        .count()
}

/// Removes every live temporary directory.
fn remove_live() -> usize {
    remove_dirs(std::mem::take(&mut *live()))
}

/// Exit status used when the process is interrupted, following the shell convention of 128 + SIGINT.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Installs a SIGINT/SIGTERM handler that removes all live temporary directories before exiting.
pub fn install_interrupt_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        let removed = remove_live();
        debug!("interrupted, removed {removed} temporary directories");
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
}
