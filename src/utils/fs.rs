//! Atomic file writes for the small YAML and text files confab owns.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Writes `contents` to `path` through a temporary sibling and a rename.
///
/// Readers never observe a half-written file.  The parent directory is
/// created when missing.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|err| {
            Error::io(format!("failed to create {}", parent.display()), err)
        })?;
    }

    let tmp_path = temp_path(path)?;
    let mut tmp_file = File::create(&tmp_path)
        .map_err(|err| Error::io(format!("failed to create {}", tmp_path.display()), err))?;
    tmp_file
        .write_all(contents)
        .and_then(|()| tmp_file.sync_all())
        .map_err(|err| Error::io(format!("failed to write {}", tmp_path.display()), err))?;
    drop(tmp_file);

    fs::rename(&tmp_path, path).map_err(|err| {
        let _ = fs::remove_file(&tmp_path);
        Error::io(format!("failed to replace {}", path.display()), err)
    })
}

fn temp_path(path: &Path) -> Result<PathBuf> {
    let file_name = path.file_name().ok_or_else(|| {
        Error::validation(
            format!("{} has no file name", path.display()),
            Some("path".to_string()),
        )
    })?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    Ok(path.with_file_name(tmp_name))
}
