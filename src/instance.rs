//! Single-instance lock
//!
//! Two workers sharing one bot token make the chat platform answer 409
//! Conflict. Before starting, the worker creates a lock file named after the
//! token's last six characters and writes its PID into it. A lock whose PID
//! no longer exists (checked through `/proc`) is treated as stale and
//! replaced.

use anyhow::Result;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub fn lock_path(dir: &Path, token: &str) -> PathBuf {
        let chars: Vec<char> = token.trim().chars().collect();
        let suffix: String = if chars.is_empty() {
            "no_token".to_string()
        } else {
            chars[chars.len().saturating_sub(6)..].iter().collect()
        };
        dir.join(format!("ktw_poller.{}.lock", suffix))
    }

    /// Ok(None) when another live process holds the lock.
    pub fn acquire(dir: &Path, token: &str) -> Result<Option<Self>> {
        let path = Self::lock_path(dir, token);
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{}", std::process::id())?;
                    file.sync_all()?;
                    info!("Instance lock acquired: {}", path.display());
                    return Ok(Some(Self { path }));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => match read_holder(&path) {
                    Some(pid) if pid_alive(pid) => {
                        warn!("Instance lock {} held by pid {}", path.display(), pid);
                        return Ok(None);
                    }
                    holder => {
                        warn!("Removing stale instance lock {} (pid {:?})", path.display(), holder);
                        if let Err(e) = fs::remove_file(&path) {
                            if e.kind() != ErrorKind::NotFound {
                                return Err(e.into());
                            }
                        }
                    }
                },
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn pid_alive(pid: u32) -> bool {
    pid == std::process::id() || Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_path_uses_token_suffix() {
        let dir = Path::new("/tmp");
        assert_eq!(
            InstanceLock::lock_path(dir, "12345:ABCDEFxyz123"),
            PathBuf::from("/tmp/ktw_poller.xyz123.lock")
        );
        assert_eq!(InstanceLock::lock_path(dir, "abc"), PathBuf::from("/tmp/ktw_poller.abc.lock"));
        assert_eq!(InstanceLock::lock_path(dir, ""), PathBuf::from("/tmp/ktw_poller.no_token.lock"));
    }

    #[test]
    fn test_second_acquire_refused_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let first = InstanceLock::acquire(dir.path(), "token-one").unwrap().unwrap();
        assert!(first.path().exists());

        // Held by this (live) process
        assert!(InstanceLock::acquire(dir.path(), "token-one").unwrap().is_none());

        let path = first.path().to_path_buf();
        drop(first);
        assert!(!path.exists());
        assert!(InstanceLock::acquire(dir.path(), "token-one").unwrap().is_some());
    }

    #[test]
    fn test_stale_lock_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = InstanceLock::lock_path(dir.path(), "token-two");
        fs::write(&path, "4000000000\n").unwrap();

        let lock = InstanceLock::acquire(dir.path(), "token-two").unwrap().unwrap();
        let holder = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(holder.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_garbage_lock_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = InstanceLock::lock_path(dir.path(), "token-three");
        fs::write(&path, "not a pid").unwrap();
        assert!(InstanceLock::acquire(dir.path(), "token-three").unwrap().is_some());
    }
}
