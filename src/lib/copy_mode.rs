//! Copy mode
//!
//! Installs the running binary somewhere else, typically a volume shared with
//! a later container, and does nothing more.

use std::env;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::info;

use crate::error::{EntrypointError, Result};

/// Copy the currently executing binary to `copy_dst`.
pub fn run_copy_mode(copy_dst: &Path) -> Result<()> {
    let source = env::current_exe().map_err(|source| EntrypointError::CopyMode {
        path: copy_dst.to_path_buf(),
        source,
    })?;
    copy_binary(&source, copy_dst)?;
    info!(from = %source.display(), to = %copy_dst.display(), "installed entrypoint binary");
    Ok(())
}

/// Copy `source` to `destination` as an executable, replacing it atomically.
pub fn copy_binary(source: &Path, destination: &Path) -> Result<()> {
    install(source, destination).map_err(|source| EntrypointError::CopyMode {
        path: destination.to_path_buf(),
        source,
    })
}

fn install(source: &Path, destination: &Path) -> io::Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut input = File::open(source)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    make_executable(tmp.path())?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}
