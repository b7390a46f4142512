//! Checkpoint persistence across engine restarts.
//!
//! Losing the checkpoint file is safe: the engine simply re-pulls from
//! the beginning and the idempotent apply path absorbs the repeats. A
//! torn file is what must never happen, so saves go through a
//! write-then-rename.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use replidoc_protocol::Checkpoint;

use crate::error::EngineResult;

/// Loads a persisted checkpoint.
///
/// Returns `None` when the file does not exist or is empty.
pub fn load_checkpoint(path: &Path) -> EngineResult<Option<Checkpoint>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(&bytes)?))
}

/// Saves a checkpoint atomically:
///
/// 1. write to `<path>.tmp` and sync it
/// 2. rename the temp file over `path`
pub fn save_checkpoint(path: &Path, checkpoint: &Checkpoint) -> EngineResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp_path = temp_path_for(path);
    let bytes = serde_json::to_vec_pretty(checkpoint)?;
    let mut file = File::create(&temp_path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)?;
    Ok(())
}

/// Appends `.tmp` without clobbering an existing extension.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
