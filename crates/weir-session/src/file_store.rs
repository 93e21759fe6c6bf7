use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{SessionError, SessionStore};

/// Default `SessionStore`: one file per session under a directory, written
/// via write-to-temp-then-rename for atomicity.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("could not create session directory {:?}: {e}", dir);
        }
        Self { dir }
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }
}

impl SessionStore for FileSessionStore {
    fn read(&self, id: &str) -> Result<Option<Vec<u8>>, SessionError> {
        match fs::read(self.path_for(id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, id: &str, data: &[u8]) -> Result<(), SessionError> {
        let target = self.path_for(id);
        let tmp = target.with_extension("tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn update_timestamp(&self, id: &str) -> Result<(), SessionError> {
        let file = fs::OpenOptions::new().write(true).open(self.path_for(id))?;
        let times = fs::FileTimes::new().set_modified(std::time::SystemTime::now());
        file.set_times(times)?;
        Ok(())
    }

    fn destroy(&self, id: &str) -> Result<(), SessionError> {
        match fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn gc(&self, max_lifetime: Duration) -> Result<usize, SessionError> {
        let now = std::time::SystemTime::now();
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if is_expired(&entry.path(), now, max_lifetime) {
                fs::remove_file(entry.path())?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_expired(path: &Path, now: std::time::SystemTime, max_lifetime: Duration) -> bool {
    let Ok(metadata) = path.metadata() else { return false };
    let Ok(modified) = metadata.modified() else { return false };
    now.duration_since(modified).map(|age| age > max_lifetime).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.write("abc", b"payload").unwrap();
        assert_eq!(store.read("abc").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn destroy_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.destroy("missing").unwrap();
    }

    #[test]
    fn gc_removes_nothing_when_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path());
        store.write("fresh", b"x").unwrap();
        let removed = store.gc(Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
    }
}
