//! Helper executable discovery

use std::path::{Path, PathBuf};

use crate::{PtyProxyError, Result};

/// Resolve the helper command to an executable path
///
/// Search order:
/// 1. A command containing a path separator is used as given, if it exists
/// 2. The directory of the current executable
/// 3. The PATH environment variable
pub fn find_helper(command: &str) -> Result<PathBuf> {
    if command.is_empty() {
        return Err(PtyProxyError::HelperNotFound("empty command".into()));
    }

    let as_path = Path::new(command);
    if as_path.components().count() > 1 || as_path.is_absolute() {
        if as_path.is_file() {
            return Ok(as_path.to_path_buf());
        }
        return Err(PtyProxyError::HelperNotFound(command.to_string()));
    }

    if let Ok(current_exe) = std::env::current_exe() {
        if let Some(parent) = current_exe.parent() {
            let sibling = parent.join(command);
            if sibling.is_file() {
                tracing::debug!("Found helper next to executable: {:?}", sibling);
                return Ok(sibling);
            }
        }
    }

    which::which(command).map_err(|e| {
        PtyProxyError::HelperNotFound(format!("{} ({}); check that it is in your PATH", command, e))
    })
}
