//! Marker files
//!
//! A marker holds the integer result code of one step. Steps publish theirs
//! atomically (temp file + rename) and later steps poll for it, so a reader
//! either sees no file or the whole value.

use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{EntrypointError, Result};

/// What to do after looking at the previous step's marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// No dependency, or the previous step succeeded
    Proceed,
    /// The previous step failed with this code; do not run
    SkipWithCode(i32),
}

/// How to poll for a marker that has not appeared yet.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    /// Delay before the second look
    pub initial_interval: Duration,
    /// Upper bound for the doubling backoff
    pub max_interval: Duration,
    /// Give up at this instant; `None` waits indefinitely
    pub deadline: Option<Instant>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(2),
            deadline: None,
        }
    }
}

/// Decide whether the wrapped command runs, based on the previous marker.
///
/// Blocks until the marker exists. `abort` lets the wrapper's own signal
/// handling interrupt the wait.
pub fn gate(
    previous_marker: Option<&Path>,
    settings: &PollSettings,
    abort: Option<&AtomicBool>,
) -> Result<GateDecision> {
    let path = match previous_marker {
        Some(path) if !path.as_os_str().is_empty() => path,
        _ => return Ok(GateDecision::Proceed),
    };

    let code = wait_for_marker(path, settings, abort)?;
    if code == 0 {
        info!(path = %path.display(), "previous step succeeded");
        Ok(GateDecision::Proceed)
    } else {
        info!(path = %path.display(), code, "previous step failed, skipping command");
        Ok(GateDecision::SkipWithCode(code))
    }
}

/// Poll until `path` holds a complete marker and return its code.
pub fn wait_for_marker(
    path: &Path,
    settings: &PollSettings,
    abort: Option<&AtomicBool>,
) -> Result<i32> {
    let mut interval = settings.initial_interval;
    let mut announced = false;

    loop {
        if let Some(code) = read_marker(path)? {
            return Ok(code);
        }
        if abort.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            return Err(EntrypointError::Interrupted);
        }

        let mut sleep_for = interval;
        if let Some(deadline) = settings.deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(EntrypointError::MarkerTimeout {
                    path: path.to_path_buf(),
                });
            }
            sleep_for = sleep_for.min(deadline - now);
        }

        if !announced {
            info!(path = %path.display(), "waiting for previous marker");
            announced = true;
        } else {
            debug!(
                path = %path.display(),
                interval_ms = sleep_for.as_millis() as u64,
                "marker not present yet"
            );
        }
        thread::sleep(sleep_for);
        interval = (interval * 2).min(settings.max_interval);
    }
}

/// Read a marker. `Ok(None)` means it is not there yet; an empty file counts
/// as not there, since complete markers are never empty.
pub fn read_marker(path: &Path) -> Result<Option<i32>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(EntrypointError::MarkerRead {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<i32>()
        .map(Some)
        .map_err(|_| EntrypointError::MarkerRead {
            path: path.to_path_buf(),
            reason: format!("\"{}\" is not a result code", trimmed),
        })
}

/// Publish `code` to the marker at `path`.
pub fn write_marker(path: &Path, code: i32) -> Result<()> {
    write_atomic(path, code.to_string().as_bytes()).map_err(|source| EntrypointError::MarkerWrite {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `path` with `contents` in one rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fast_poll() -> PollSettings {
        PollSettings {
            initial_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(50),
            deadline: None,
        }
    }

    #[test]
    fn test_no_previous_marker_proceeds() {
        assert_eq!(gate(None, &fast_poll(), None).unwrap(), GateDecision::Proceed);
        assert_eq!(
            gate(Some(Path::new("")), &fast_poll(), None).unwrap(),
            GateDecision::Proceed
        );
    }

    #[test]
    fn test_zero_marker_proceeds() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prev");
        write_marker(&path, 0).unwrap();
        assert_eq!(
            gate(Some(&path), &fast_poll(), None).unwrap(),
            GateDecision::Proceed
        );
    }

    #[test]
    fn test_failed_marker_skips_with_code() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prev");
        write_marker(&path, 17).unwrap();
        assert_eq!(
            gate(Some(&path), &fast_poll(), None).unwrap(),
            GateDecision::SkipWithCode(17)
        );
    }

    #[test]
    fn test_marker_with_trailing_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prev");
        fs::write(&path, "3\n").unwrap();
        assert_eq!(read_marker(&path).unwrap(), Some(3));
    }

    #[test]
    fn test_unparsable_marker_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prev");
        fs::write(&path, "done").unwrap();
        let err = gate(Some(&path), &fast_poll(), None).unwrap_err();
        assert!(matches!(err, EntrypointError::MarkerRead { .. }));
    }

    #[test]
    fn test_waits_for_marker_to_appear() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prev");
        let writer_path = path.clone();
        let writer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(150));
            write_marker(&writer_path, 0).unwrap();
        });

        let started = Instant::now();
        assert_eq!(
            gate(Some(&path), &fast_poll(), None).unwrap(),
            GateDecision::Proceed
        );
        assert!(started.elapsed() >= Duration::from_millis(150));
        writer.join().unwrap();
    }

    #[test]
    fn test_empty_marker_is_not_present() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prev");
        fs::write(&path, "").unwrap();
        assert_eq!(read_marker(&path).unwrap(), None);

        let settings = PollSettings {
            deadline: Some(Instant::now() + Duration::from_millis(80)),
            ..fast_poll()
        };
        let err = wait_for_marker(&path, &settings, None).unwrap_err();
        assert!(matches!(err, EntrypointError::MarkerTimeout { .. }));
        assert!(err.to_string().contains("gave up waiting"));
    }

    #[test]
    fn test_abort_interrupts_wait() {
        let dir = TempDir::new().unwrap();
        let abort = AtomicBool::new(true);
        let err = gate(Some(&dir.path().join("never")), &fast_poll(), Some(&abort)).unwrap_err();
        assert!(matches!(err, EntrypointError::Interrupted));
    }

    #[test]
    fn test_write_marker_replaces_previous_value() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker");
        write_marker(&path, 1).unwrap();
        write_marker(&path, 124).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "124");
        // no temp files left behind
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_reader_never_sees_partial_marker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker");
        let reader_path = path.clone();
        let reader = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            loop {
                if let Ok(content) = fs::read_to_string(&reader_path) {
                    // the file only ever becomes visible whole
                    assert_eq!(content, "130");
                    return;
                }
                assert!(Instant::now() < deadline, "marker never appeared");
                thread::yield_now();
            }
        });
        write_marker(&path, 130).unwrap();
        reader.join().unwrap();
    }
}
