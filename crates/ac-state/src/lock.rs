use crate::StateError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::time::{Duration, Instant};

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Advisory cross-process lock held for the duration of a read-modify-write
/// cycle. Cooperative only: every writer must go through the same lock file.
#[derive(Debug)]
pub struct FileGuard {
    file: File,
}

impl FileGuard {
    /// Acquire the exclusive lock, retrying until `timeout` elapses.
    pub fn acquire(path: &Path, timeout: Duration) -> Result<Self, StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let deadline = Instant::now() + timeout;
        loop {
            match file.try_lock_exclusive() {
                Ok(()) => return Ok(Self { file }),
                Err(err) if err.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(StateError::LockTimeout {
                            path: path.to_path_buf(),
                        });
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(err) => return Err(StateError::Io(err)),
            }
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fs2::FileExt;
    use std::fs::OpenOptions;

    #[test]
    fn acquire_times_out_while_another_handle_holds_the_lock() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("busy.lock");

        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .expect("open lock file");
        holder.lock_exclusive().expect("hold lock");

        let result = FileGuard::acquire(&path, Duration::from_millis(150));
        assert!(matches!(result, Err(StateError::LockTimeout { .. })));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("free.lock");

        drop(FileGuard::acquire(&path, Duration::from_millis(100)).expect("first acquire"));
        FileGuard::acquire(&path, Duration::from_millis(100)).expect("second acquire");
    }
}
