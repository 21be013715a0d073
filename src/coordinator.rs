//! Change coordination across processes
//!
//! Every mutating sequence (add, delete, set-defaults, import, apply) runs
//! while holding an exclusive `flock(2)` on a well-known lock file, so at
//! most one writer is active system-wide. Reads never take the lock.
//!
//! The lock is advisory: it only excludes other cooperating netfence
//! processes. The kernel drops it when the descriptor closes, so a crashed
//! writer never leaves it stuck.
//!
//! # Example
//!
//! ```no_run
//! use netfence::coordinator::ChangeCoordinator;
//! use std::time::Duration;
//!
//! let coordinator = ChangeCoordinator::new("/var/lock/netfence.lock")
//!     .with_timeout(Duration::from_secs(10));
//! let answer = coordinator.run(|| Ok(42)).unwrap();
//! assert_eq!(answer, 42);
//! ```

use crate::core::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::debug;

/// Pause between attempts when waiting with a timeout
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Serializes mutating sequences through an exclusive file lock
#[derive(Debug, Clone)]
pub struct ChangeCoordinator {
    path: PathBuf,
    timeout: Option<Duration>,
}

impl ChangeCoordinator {
    /// Coordinator on `path`. Acquisition waits as long as it takes.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: None,
        }
    }

    /// Gives up with `Error::LockTimeout` after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` while holding the lock.
    ///
    /// The lock is released on every exit path. If `f` fails, its error is
    /// returned; if `f` succeeds but the release fails, the release error is.
    ///
    /// # Errors
    ///
    /// `Error::Lock` / `Error::LockTimeout` when the lock cannot be taken (and
    /// `f` never runs), or whatever `f` returns.
    pub fn run<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = self.acquire()?;
        let outcome = f();
        let released = lock.release();

        let value = outcome?;
        released?;
        Ok(value)
    }

    /// Takes the lock and returns a guard holding it.
    ///
    /// # Errors
    ///
    /// `Error::Lock` if the lock file cannot be opened or locked,
    /// `Error::LockTimeout` if a configured wait runs out.
    pub fn acquire(&self) -> Result<ChangeLock> {
        let file = self.open_lock_file()?;
        let started = Instant::now();

        let flock = match self.timeout {
            None => Flock::lock(file, FlockArg::LockExclusive)
                .map_err(|(_, errno)| self.lock_error(format!("flock failed: {errno}")))?,
            Some(timeout) => self.poll(file, started, timeout)?,
        };

        debug!(path = %self.path.display(), waited = ?started.elapsed(), "Acquired change lock");
        Ok(ChangeLock {
            flock: Some(flock),
            path: self.path.clone(),
        })
    }

    fn poll(&self, mut file: File, started: Instant, timeout: Duration) -> Result<Flock<File>> {
        loop {
            match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
                Ok(flock) => return Ok(flock),
                Err((returned, Errno::EWOULDBLOCK | Errno::EINTR)) => {
                    if started.elapsed() >= timeout {
                        return Err(Error::LockTimeout {
                            path: self.path.clone(),
                            waited: started.elapsed(),
                        });
                    }
                    file = returned;
                    std::thread::sleep(POLL_INTERVAL.min(timeout));
                }
                Err((_, errno)) => {
                    return Err(self.lock_error(format!("flock failed: {errno}")));
                }
            }
        }
    }

    fn open_lock_file(&self) -> Result<File> {
        let mut options = OpenOptions::new();
        options.create(true).truncate(false).read(true).write(true);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        options
            .open(&self.path)
            .map_err(|e| self.lock_error(format!("cannot open lock file: {e}")))
    }

    fn lock_error(&self, message: String) -> Error {
        Error::Lock {
            path: self.path.clone(),
            message,
        }
    }
}

/// A held change lock
///
/// Dropping the guard also unlocks; [`ChangeLock::release`] additionally
/// reports a failed unlock.
pub struct ChangeLock {
    flock: Option<Flock<File>>,
    path: PathBuf,
}

impl ChangeLock {
    /// Unlocks and closes the lock file.
    ///
    /// # Errors
    ///
    /// `Error::Lock` if `flock(LOCK_UN)` fails. Closing the descriptor still
    /// drops the lock in that case.
    pub fn release(mut self) -> Result<()> {
        let Some(flock) = self.flock.take() else {
            return Ok(());
        };

        match flock.unlock() {
            Ok(_file) => {
                debug!(path = %self.path.display(), "Released change lock");
                Ok(())
            }
            Err((_flock, errno)) => Err(Error::Lock {
                path: self.path.clone(),
                message: format!("unlock failed: {errno}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::ssh_rule;
    use crate::store::Store;
    use std::sync::mpsc;
    use std::sync::{Arc, Mutex};
    use std::thread;

    #[test]
    fn test_run_returns_closure_value() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = ChangeCoordinator::new(dir.path().join("netfence.lock"));

        assert_eq!(coordinator.run(|| Ok("done")).unwrap(), "done");
        assert!(coordinator.path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_lock_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let coordinator = ChangeCoordinator::new(dir.path().join("netfence.lock"));
        coordinator.run(|| Ok(())).unwrap();

        let mode = std::fs::metadata(coordinator.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_failed_closure_releases_lock() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = ChangeCoordinator::new(dir.path().join("netfence.lock"))
            .with_timeout(Duration::from_millis(200));

        let err = coordinator
            .run::<()>(|| Err(Error::invalid("chain", "unknown chain 'lan'")))
            .unwrap_err();
        assert_eq!(err.field(), Some("chain"));

        coordinator.run(|| Ok(())).unwrap();
    }

    #[test]
    fn test_busy_lock_times_out_without_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("netfence.lock");
        let holder = ChangeCoordinator::new(&path).acquire().unwrap();

        let waiter = ChangeCoordinator::new(&path).with_timeout(Duration::from_millis(100));
        let mut ran = false;
        let err = waiter
            .run(|| {
                ran = true;
                Ok(())
            })
            .unwrap_err();

        assert!(matches!(err, Error::LockTimeout { .. }), "{err:?}");
        assert!(!ran);

        holder.release().unwrap();
        waiter.run(|| Ok(())).unwrap();
    }

    #[test]
    fn test_unopenable_lock_file_is_lock_error() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = ChangeCoordinator::new(dir.path().join("missing/dir/netfence.lock"));

        let err = coordinator.run(|| Ok(())).unwrap_err();
        assert!(err.is_lock_error());
        assert!(matches!(err, Error::Lock { .. }));
    }

    #[test]
    fn test_concurrent_creates_never_overlap() {
        let dir = tempfile::tempdir().unwrap();
        let lock = dir.path().join("netfence.lock");
        let db = dir.path().join("firewall.db");
        Store::open(&db, Duration::from_secs(5)).unwrap();

        let timeline = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, started_rx) = mpsc::channel();

        let first = {
            let (lock, db) = (lock.clone(), db.clone());
            let timeline = Arc::clone(&timeline);
            thread::spawn(move || {
                let mut store = Store::open(&db, Duration::from_secs(5)).unwrap();
                ChangeCoordinator::new(lock)
                    .run(|| {
                        timeline.lock().unwrap().push("first:begin".to_string());
                        started_tx.send(()).unwrap();
                        thread::sleep(Duration::from_millis(150));
                        let id = store.create(&ssh_rule())?;
                        timeline.lock().unwrap().push("first:commit".to_string());
                        Ok(id)
                    })
                    .unwrap()
            })
        };

        started_rx.recv().unwrap();
        let mut store = Store::open(&db, Duration::from_secs(5)).unwrap();
        let second = ChangeCoordinator::new(&lock)
            .run(|| {
                let seen = store.list(false)?.len();
                timeline
                    .lock()
                    .unwrap()
                    .push(format!("second:begin ({seen} stored)"));
                let id = store.create(&ssh_rule())?;
                timeline.lock().unwrap().push("second:commit".to_string());
                Ok(id)
            })
            .unwrap();
        let first = first.join().unwrap();

        assert_eq!(
            *timeline.lock().unwrap(),
            [
                "first:begin",
                "first:commit",
                "second:begin (1 stored)",
                "second:commit"
            ]
        );
        assert!(first < second);
        let ids: Vec<i64> = store.list(false).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, [first, second]);
    }
}
