use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{MigrateError, Result};

/// Lock file guarding a config against concurrent runs: `<config>.lock`.
pub fn lock_path_for(config: &Path) -> PathBuf {
    let mut name = config.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// Acquire an exclusive lock on a file, returning the locked File handle.
/// The lock is released when the File is dropped.
pub fn acquire_lock(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;

    file.try_lock_exclusive()
        .map_err(|_| MigrateError::Locked(path.display().to_string()))?;

    Ok(file)
}

/// Release lock explicitly (normally handled by Drop).
pub fn release_lock(file: File) -> Result<()> {
    file.unlock()?;
    Ok(())
}
