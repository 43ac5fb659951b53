use std::{
    fmt, io,
    path::{Path, PathBuf},
};

use log::debug;

use crate::{
    process::{self, Runner},
    temp_dir::TempDir,
};

pub const ARCHIVE_FILE_NAME: &str = "input.tgz";

/// A gzipped tarball of a source directory. The archive lives in its own temporary directory which
/// is removed when this value is dropped.
#[derive(Debug)]
pub struct Archive {
    /// Owns the directory holding `path`.
    _dir: TempDir,
    path: PathBuf,
}

impl Archive {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }
}

#[derive(Debug)]
pub enum ArchiveError {
    MissingSource(PathBuf),
    TempDir(io::Error),
    Packaging(process::Error),
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::MissingSource(path) => {
                write!(f, "source directory {} does not exist", path.display())
            }
            ArchiveError::TempDir(error) => {
                write!(f, "failed to create a temporary directory: {error}")
            }
            ArchiveError::Packaging(error) => write!(f, "failed to package source: {error}"),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::MissingSource(_) => None,
            ArchiveError::TempDir(error) => Some(error),
            ArchiveError::Packaging(error) => Some(error),
        }
    }
}

/// Packs the contents of `source_dir` into a fresh archive. Entries are relative to `source_dir`
/// itself, so extracting the archive reproduces the layout of `source_dir` at the extraction root.
pub fn pack(runner: &dyn Runner, source_dir: &Path) -> Result<Archive, ArchiveError> {
    if !source_dir.is_dir() {
        return Err(ArchiveError::MissingSource(source_dir.to_owned()));
    }

    let dir = TempDir::new("kiln-").map_err(ArchiveError::TempDir)?;
    let path = dir.path().join(ARCHIVE_FILE_NAME);

    // On failure `dir` is dropped here, taking any partially written archive with it.
    runner
        .output(process::command!("tar", "-czf", path, "-C", source_dir, "."))
        .map_err(ArchiveError::Packaging)?;
    debug!("packed {} into {}", source_dir.display(), path.display());

    Ok(Archive { _dir: dir, path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{
        testing::{FailingRunner, RecordingRunner},
        SystemRunner,
    };

    fn list(archive: &Path) -> Vec<String> {
        let output = SystemRunner
            .output(process::command!("tar", "-tzf", archive))
            .unwrap();
        let mut entries: Vec<String> = output
            .stdout_str()
            .unwrap()
            .lines()
            .map(|line| line.trim_start_matches("./").to_owned())
            .filter(|line| !line.is_empty())
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn archive_is_rooted_at_source_contents() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(source.path().join("src")).unwrap();
        std::fs::write(source.path().join("src/main.c"), "int main() {}").unwrap();

        let archive = pack(&SystemRunner, source.path()).unwrap();
        assert_eq!(archive.path().file_name().unwrap(), ARCHIVE_FILE_NAME);
        assert!(archive.size().unwrap() > 0);
        assert_eq!(list(archive.path()), ["a.txt", "src/", "src/main.c"]);
    }

    #[test]
    fn extraction_reproduces_source() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), "hello").unwrap();
        std::fs::create_dir_all(source.path().join("nested/deeper")).unwrap();
        std::fs::write(source.path().join("nested/deeper/b.bin"), [0u8, 1, 2, 255]).unwrap();

        let archive = pack(&SystemRunner, source.path()).unwrap();

        let target = tempfile::tempdir().unwrap();
        SystemRunner
            .output(process::command!(
                "tar",
                "-xzf",
                archive.path(),
                "-C",
                target.path()
            ))
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(target.path().join("a.txt")).unwrap(),
            "hello"
        );
        assert_eq!(
            std::fs::read(target.path().join("nested/deeper/b.bin")).unwrap(),
            [0u8, 1, 2, 255]
        );
    }

    #[test]
    fn archive_dir_is_removed_on_drop() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("a.txt"), "a").unwrap();

        let archive = pack(&SystemRunner, source.path()).unwrap();
        let dir = archive.path().parent().unwrap().to_owned();
        assert!(dir.is_dir());
        drop(archive);
        assert!(!dir.exists());
    }

    #[test]
    fn invokes_tar_scoped_to_source() {
        let source = tempfile::tempdir().unwrap();
        let runner = RecordingRunner::default();

        let archive = pack(&runner, source.path()).unwrap();

        let source = source.path().to_string_lossy().into_owned();
        let target = archive.path().to_string_lossy().into_owned();
        assert_eq!(
            runner.argvs(),
            [vec!["tar", "-czf", target.as_str(), "-C", source.as_str(), "."]]
        );
    }

    #[test]
    fn packaging_failure_aborts() {
        let source = tempfile::tempdir().unwrap();
        let error = pack(&FailingRunner("tar: disk full"), source.path()).unwrap_err();
        assert!(matches!(error, ArchiveError::Packaging(_)));
        assert!(error.to_string().contains("tar: disk full"));
    }

    #[test]
    fn missing_source_fails_before_packaging() {
        let runner = RecordingRunner::default();
        let error = pack(&runner, Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(error, ArchiveError::MissingSource(_)));
        assert!(runner.argvs().is_empty());
    }
}
