//! Per-invocation staging of the helper executable
//!
//! Each invocation gets its own randomly named directory holding one
//! owner-only executable copy of the payload. The returned guard removes
//! the file and the directory when it goes out of scope, on every path.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::StagingError;
use crate::payload::HelperPayload;

/// File name used when the caller does not supply a display name
pub const DEFAULT_EXECUTABLE_NAME: &str = "enclave-helper";

const STAGING_PREFIX: &str = "enclave-broker-";

#[cfg(unix)]
const EXECUTABLE_MODE: u32 = 0o700;

/// A staged copy of the helper, deleted on drop
#[derive(Debug)]
pub struct StagedExecutable {
    dir: Option<TempDir>,
    path: PathBuf,
}

impl StagedExecutable {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }
}

impl Drop for StagedExecutable {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove staged helper");
            }
        }

        if let Some(dir) = self.dir.take() {
            let dir_path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!(dir = %dir_path.display(), "Removed staging directory"),
                Err(e) => {
                    warn!(dir = %dir_path.display(), error = %e, "Failed to remove staging directory")
                }
            }
        }
    }
}

/// Materialize `payload` as `file_name` inside a fresh directory under `root`
/// (or the OS temp dir).
pub fn stage(
    payload: &HelperPayload,
    file_name: &str,
    root: Option<&Path>,
) -> Result<StagedExecutable, StagingError> {
    if payload.is_empty() {
        return Err(StagingError::MissingPayload);
    }

    let mut builder = tempfile::Builder::new();
    builder.prefix(STAGING_PREFIX);
    let dir = match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
    .map_err(StagingError::CreateDir)?;

    // Guard exists before anything is written so partial artifacts are removed
    let staged = StagedExecutable {
        path: dir.path().join(file_name),
        dir: Some(dir),
    };

    // tempfile leaves the directory mode to the umask
    #[cfg(unix)]
    if let Some(dir) = staged.dir() {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(EXECUTABLE_MODE)).map_err(
            |source| StagingError::SetPermissions {
                path: dir.to_path_buf(),
                source,
            },
        )?;
    }

    write_executable(&staged.path, payload.as_bytes())?;

    debug!(
        path = %staged.path.display(),
        bytes = payload.len(),
        "Staged helper executable"
    );
    Ok(staged)
}

fn write_executable(path: &Path, bytes: &[u8]) -> Result<(), StagingError> {
    let write_err = |source| StagingError::WriteFile {
        path: path.to_path_buf(),
        source,
    };

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(EXECUTABLE_MODE);
    }

    let mut file = options.open(path).map_err(write_err)?;
    file.write_all(bytes).map_err(write_err)?;
    file.flush().map_err(write_err)?;
    // The write handle must be closed before the file can be executed
    drop(file);

    // Creation mode is filtered by the umask; set it explicitly
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE_MODE)).map_err(
            |source| StagingError::SetPermissions {
                path: path.to_path_buf(),
                source,
            },
        )?;
    }

    Ok(())
}

/// Check that a caller-supplied display name is a plain file name
pub fn validate_file_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("display name must not be empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("display name {:?} is not a file name", name));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(format!(
            "display name {:?} must not contain path separators or NUL",
            name
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> usize {
        fs::read_dir(dir).unwrap().count()
    }

    #[test]
    fn test_stage_writes_payload_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let payload = HelperPayload::from_bytes(b"#!/bin/sh\nexit 0\n".to_vec());

        let staged = stage(&payload, DEFAULT_EXECUTABLE_NAME, Some(root.path())).unwrap();
        let path = staged.path().to_path_buf();
        let dir = staged.dir().unwrap().to_path_buf();

        assert!(dir.starts_with(root.path()));
        assert_eq!(path.file_name().unwrap(), DEFAULT_EXECUTABLE_NAME);
        assert_eq!(fs::read(&path).unwrap(), payload.as_bytes());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
            let dir_mode = fs::metadata(&dir).unwrap().permissions().mode();
            assert_eq!(dir_mode & 0o077, 0);
        }

        drop(staged);
        assert!(!path.exists());
        assert!(!dir.exists());
        assert_eq!(entries(root.path()), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_staging_dir_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        // Open the root up so the staging dir cannot inherit a private mode
        fs::set_permissions(root.path(), fs::Permissions::from_mode(0o755)).unwrap();
        let payload = HelperPayload::from_bytes(vec![0u8; 16]);

        let staged = stage(&payload, "helper", Some(root.path())).unwrap();
        let dir = staged.dir().unwrap();
        let mode = fs::metadata(dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_stage_paths_are_unique() {
        let root = TempDir::new().unwrap();
        let payload = HelperPayload::from_bytes(vec![0u8; 16]);

        let a = stage(&payload, "helper", Some(root.path())).unwrap();
        let b = stage(&payload, "helper", Some(root.path())).unwrap();
        assert_ne!(a.path(), b.path());
        assert_eq!(entries(root.path()), 2);

        drop(a);
        assert!(b.path().exists());
        drop(b);
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn test_empty_payload_leaves_nothing_behind() {
        let root = TempDir::new().unwrap();
        let err = stage(&HelperPayload::from_bytes(Vec::new()), "helper", Some(root.path()))
            .unwrap_err();
        assert!(matches!(err, StagingError::MissingPayload));
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn test_missing_root_is_create_dir_error() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("does-not-exist");
        let payload = HelperPayload::from_bytes(vec![1u8]);

        let err = stage(&payload, "helper", Some(&missing)).unwrap_err();
        assert!(matches!(err, StagingError::CreateDir(_)));
    }

    #[test]
    fn test_write_failure_removes_directory() {
        let root = TempDir::new().unwrap();
        let payload = HelperPayload::from_bytes(vec![1u8]);

        // A file name inside a non-existent subdirectory cannot be created
        let err = stage(&payload, "nested/helper", Some(root.path())).unwrap_err();
        assert!(matches!(err, StagingError::WriteFile { .. }));
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn test_drop_tolerates_already_removed_file() {
        let root = TempDir::new().unwrap();
        let payload = HelperPayload::from_bytes(vec![1u8]);

        let staged = stage(&payload, "helper", Some(root.path())).unwrap();
        fs::remove_file(staged.path()).unwrap();
        drop(staged);
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn test_validate_file_name() {
        assert!(validate_file_name("My App").is_ok());
        assert!(validate_file_name("enclave-helper").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name(".").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("../evil").is_err());
        assert!(validate_file_name("a\\b").is_err());
        assert!(validate_file_name("a\0b").is_err());
    }
}
