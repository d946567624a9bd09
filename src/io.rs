use std::fmt::Display;
use std::fs;
use std::io::Write;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use console::Style;

use crate::error::CleanError;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    as_elapsed(Instant::now().duration_since(s))
}

pub fn as_elapsed(d: Duration) -> impl Display {
    let f = format!("(+{}ms)", d.as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Writes `data` to `path` through a temporary file in the same directory,
/// so readers never observe a half-written file.
///
/// A replaced file keeps its permissions, a new one gets `0644` on unix.
pub fn write_atomic(path: &Utf8Path, data: &[u8]) -> std::io::Result<()> {
    let dir = path.parent().unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    match fs::metadata(path) {
        Ok(metadata) => temp.as_file().set_permissions(metadata.permissions())?,
        #[cfg(unix)]
        Err(_) => {
            use std::os::unix::fs::PermissionsExt;
            temp.as_file().set_permissions(fs::Permissions::from_mode(0o644))?;
        }
        #[cfg(not(unix))]
        Err(_) => {}
    }

    temp.write_all(data)?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(())
}

/// Removes everything matched by the clean `patterns`, resolved against
/// `root`. Missing targets are ignored.
pub fn clean<S: AsRef<str>>(root: &Utf8Path, patterns: &[S]) -> Result<Vec<Utf8PathBuf>, CleanError> {
    let s = Instant::now();
    let mut removed = Vec::new();

    for pattern in patterns {
        let pattern = pattern.as_ref();
        let anchored = format!(
            "{}/{}",
            glob::Pattern::escape(root.as_str()).trim_end_matches('/'),
            pattern
        );

        let paths = glob::glob(&anchored).map_err(|e| CleanError {
            path: pattern.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
        })?;

        for path in paths.flatten() {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };

            match result {
                Ok(()) => removed.extend(Utf8PathBuf::from_path_buf(path).ok()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(CleanError {
                        path: path.display().to_string(),
                        source,
                    });
                }
            }
        }
    }

    tracing::info!("Cleaned {} path(s) {}", removed.len(), as_overhead(s));

    Ok(removed)
}
