//! Atomic file persistence primitives.
//!
//! The store never writes the target path directly: every write lands in a
//! sibling temporary file, is fsync'd, and is then renamed onto the target.
//! `rename(2)` is atomic on the same filesystem, so a reader never observes
//! a partially written store (spec §4.1, "Guarantees").

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use plan_contracts::error::{EngineError, EngineResult};

/// Write `contents` to `path` via temp-file + atomic rename.
///
/// On unix, the final file is created with mode `0600` (spec §6,
/// "Persisted state").
pub fn atomic_write(path: &Path, contents: &[u8]) -> EngineResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| EngineError::PersistFailed {
        reason: format!("failed to create directory '{}': {e}", dir.display()),
    })?;

    let tmp_path = dir.join(format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("plan-state"),
        std::process::id()
    ));

    let mut file = File::create(&tmp_path).map_err(|e| EngineError::PersistFailed {
        reason: format!("failed to create temp file '{}': {e}", tmp_path.display()),
    })?;

    file.write_all(contents).map_err(|e| EngineError::PersistFailed {
        reason: format!("failed to write temp file '{}': {e}", tmp_path.display()),
    })?;

    file.sync_all().map_err(|e| EngineError::PersistFailed {
        reason: format!("failed to fsync temp file '{}': {e}", tmp_path.display()),
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = fs::Permissions::from_mode(0o600);
        let _ = fs::set_permissions(&tmp_path, perms);
    }

    fs::rename(&tmp_path, path).map_err(|e| EngineError::PersistFailed {
        reason: format!(
            "failed to rename '{}' onto '{}': {e}",
            tmp_path.display(),
            path.display()
        ),
    })?;

    Ok(())
}

/// Read `path`'s contents. Returns `Ok(None)` if the file does not exist;
/// any other IO error is treated as fatal (spec §4.1, "On load").
pub fn read_if_exists(path: &Path) -> EngineResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::PersistFailed {
            reason: format!("failed to read state file '{}': {e}", path.display()),
        }),
    }
}
