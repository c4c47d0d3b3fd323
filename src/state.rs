//! Daemon state directory.
//!
//! Holds the process-identity marker (single-instance lock), the stop
//! sentinel consumed by a running daemon, the progress mirror, and the
//! advisory scan cache. Exactly one daemon instance may advance the scan
//! cursor; concurrent advancement is not made safe by anything else in
//! the design, so a present marker refuses startup.

use crate::error::BridgeError;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const PID_FILE: &str = "burnlinkd.pid";
const STOP_FILE: &str = "stop";
const MIRROR_FILE: &str = "progress.json";
const CACHE_FILE: &str = "burn_cache.json";

pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn mirror_path(&self) -> PathBuf {
        self.root.join(MIRROR_FILE)
    }

    pub fn cache_path(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    fn pid_path(&self) -> PathBuf {
        self.root.join(PID_FILE)
    }

    fn stop_path(&self) -> PathBuf {
        self.root.join(STOP_FILE)
    }

    /// Acquire the single-instance lock by creating the pid marker.
    /// Fails when a marker already exists; a stale marker after a crash
    /// must be removed by the operator (the error names the path).
    pub fn acquire_lock(&self) -> Result<InstanceLock, BridgeError> {
        let path = self.pid_path();
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    BridgeError::InstanceLocked(path.display().to_string())
                }
                _ => BridgeError::Io(e),
            })?;
        writeln!(file, "{}", std::process::id())?;
        info!("Acquired instance lock at {}", path.display());

        // A fresh start clears any stale stop request
        let _ = std::fs::remove_file(self.stop_path());
        Ok(InstanceLock { path })
    }

    /// Request a running daemon to stop at its next safe cancellation
    /// point. Returns whether a daemon appears to be running.
    pub fn request_stop(&self) -> Result<bool, BridgeError> {
        let running = self.pid_path().exists();
        std::fs::write(self.stop_path(), b"stop\n")?;
        Ok(running)
    }

    /// Polled by the daemon between passes and between scan chunks,
    /// both points where progress was just durably advanced.
    pub fn stop_requested(&self) -> bool {
        self.stop_path().exists()
    }

    pub fn clear_stop(&self) {
        let _ = std::fs::remove_file(self.stop_path());
    }

    /// Pid recorded in the marker, if one is present.
    pub fn running_pid(&self) -> Option<u32> {
        let content = std::fs::read_to_string(self.pid_path()).ok()?;
        content.trim().parse().ok()
    }
}

/// Held for the daemon's lifetime; drops the pid marker on exit.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove pid marker {}: {}", self.path.display(), e);
        }
    }
}

/// Tail the newest rotated log file in a directory, for the `logs`
/// subcommand.
pub fn tail_log(dir: &Path, base: &str, lines: usize) -> Result<String, BridgeError> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(base) {
            let modified = entry.metadata()?.modified()?;
            if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
                newest = Some((modified, entry.path()));
            }
        }
    }
    let Some((_, path)) = newest else {
        return Ok(String::new());
    };
    let content = std::fs::read_to_string(path)?;
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].join("\n"))
}
