// ABOUTME: Per-host lock files that keep separate keel processes off the same host.
// ABOUTME: Created atomically with create_new, hold the holder's LeaseInfo, and break when stale.

use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use super::LeaseInfo;
use crate::types::HostId;

/// Locks older than this are assumed abandoned.
const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

#[derive(Debug)]
pub(super) enum LockError {
    /// Another live process holds the host.
    Held(Option<LeaseInfo>),
    Io(io::Error),
}

impl From<io::Error> for LockError {
    fn from(err: io::Error) -> Self {
        LockError::Io(err)
    }
}

/// A held lock file. Removed when dropped.
#[derive(Debug)]
pub(super) struct LockFile {
    path: PathBuf,
}

impl LockFile {
    pub(super) fn path_for(dir: &Path, host: &HostId) -> PathBuf {
        let name: String = host
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        dir.join(format!("{name}.lock"))
    }

    /// Take the lock for `host` under `dir`, breaking it once if the current
    /// holder is stale.
    pub(super) fn acquire(
        dir: &Path,
        host: &HostId,
        info: &LeaseInfo,
    ) -> Result<Self, LockError> {
        fs::create_dir_all(dir)?;
        let path = Self::path_for(dir, host);

        match Self::create(&path, info) {
            Err(LockError::Held(_)) => {}
            other => return other,
        }

        let existing = read_holder(&path);
        if !is_stale(&path, existing.as_ref()) {
            return Err(LockError::Held(existing));
        }

        match &existing {
            Some(holder) => tracing::warn!(
                %host,
                holder = %holder.holder,
                pid = holder.pid,
                since = %holder.acquired_at,
                "breaking stale host lock"
            ),
            None => tracing::warn!(%host, "breaking unreadable host lock"),
        }
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        match Self::create(&path, info) {
            Err(LockError::Held(_)) => Err(LockError::Held(read_holder(&path))),
            other => other,
        }
    }

    fn create(path: &Path, info: &LeaseInfo) -> Result<Self, LockError> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(LockError::Held(None));
            }
            Err(err) => return Err(err.into()),
        };
        let lock = Self {
            path: path.to_path_buf(),
        };
        let json = serde_json::to_string(info)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        Ok(lock)
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), "failed to remove host lock: {}", err);
        }
    }
}

fn read_holder(path: &Path) -> Option<LeaseInfo> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// A lock is stale when it is old, or when its holder ran on this machine and
/// has exited. Unreadable locks are only stale once old, since the holder may
/// still be writing them.
fn is_stale(path: &Path, holder: Option<&LeaseInfo>) -> bool {
    match holder {
        Some(info) => {
            let age = Utc::now() - info.acquired_at;
            age.to_std().is_ok_and(|age| age >= STALE_AFTER)
                || (info.holder == LeaseInfo::current().holder && !process_alive(info.pid))
        }
        None => fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age >= STALE_AFTER),
    }
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_lock_reports_holder() {
        let dir = TempDir::new().unwrap();
        let host = HostId::new("web-1");
        let info = LeaseInfo::current();

        let lock = LockFile::acquire(dir.path(), &host, &info).unwrap();
        match LockFile::acquire(dir.path(), &host, &info) {
            Err(LockError::Held(Some(holder))) => assert_eq!(holder.pid, std::process::id()),
            other => panic!("expected held lock, got {other:?}"),
        }

        drop(lock);
        assert!(!LockFile::path_for(dir.path(), &host).exists());
        assert!(LockFile::acquire(dir.path(), &host, &info).is_ok());
    }

    #[test]
    fn old_lock_is_broken() {
        let dir = TempDir::new().unwrap();
        let host = HostId::new("web-1");
        let mut old = LeaseInfo::current();
        old.holder = "elsewhere".to_string();
        old.acquired_at = Utc::now() - chrono::Duration::hours(2);
        fs::write(
            LockFile::path_for(dir.path(), &host),
            serde_json::to_string(&old).unwrap(),
        )
        .unwrap();

        assert!(LockFile::acquire(dir.path(), &host, &LeaseInfo::current()).is_ok());
    }

    #[test]
    fn lock_from_exited_local_process_is_broken() {
        let dir = TempDir::new().unwrap();
        let host = HostId::new("web-1");

        let mut child = std::process::Command::new("true").spawn().unwrap();
        let exited = child.id();
        child.wait().unwrap();

        let mut dead = LeaseInfo::current();
        dead.pid = exited;
        fs::write(
            LockFile::path_for(dir.path(), &host),
            serde_json::to_string(&dead).unwrap(),
        )
        .unwrap();

        assert!(LockFile::acquire(dir.path(), &host, &LeaseInfo::current()).is_ok());
    }

    #[test]
    fn fresh_unreadable_lock_is_held() {
        let dir = TempDir::new().unwrap();
        let host = HostId::new("web-1");
        fs::write(LockFile::path_for(dir.path(), &host), "").unwrap();

        assert!(matches!(
            LockFile::acquire(dir.path(), &host, &LeaseInfo::current()),
            Err(LockError::Held(None))
        ));
    }

    #[test]
    fn host_ids_map_to_plain_file_names() {
        let path = LockFile::path_for(Path::new("/state/locks"), &HostId::new("db/primary:22"));
        assert_eq!(path, Path::new("/state/locks/db_primary_22.lock"));
    }
}
