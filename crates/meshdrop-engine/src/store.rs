use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use meshdrop_contracts::jobs::JobError;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::cancel::CancellationToken;

const MAX_STEM_CHARS: usize = 64;

/// Application-private directory holding one artifact file per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactStore {
    dir: PathBuf,
    extension: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    /// Deterministic location for `job_id`: `<sanitized>-<8 hex of sha256(job_id)>.<ext>`.
    pub fn path_for(&self, job_id: &str) -> PathBuf {
        let name = format!(
            "{}-{}.{}",
            sanitize_stem(job_id),
            short_digest(job_id),
            self.extension
        );
        self.dir.join(name)
    }

    /// Writes `bytes` under the job's path. A retry overwrites the same file.
    ///
    /// The final name only ever holds a complete artifact: bytes land in a hidden temp file that
    /// is synced and then renamed into place.
    pub fn persist(
        &self,
        job_id: &str,
        bytes: &[u8],
        cancel: &CancellationToken,
    ) -> Result<PathBuf, JobError> {
        if cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        fs::create_dir_all(&self.dir).map_err(|err| JobError::storage(&self.dir, err))?;
        let target = self.path_for(job_id);
        let temp = self.dir.join(format!(".{}.part", Uuid::new_v4().simple()));

        let written = write_synced(&temp, bytes).map_err(|err| JobError::storage(&temp, err));
        let result = written.and_then(|()| {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            fs::rename(&temp, &target).map_err(|err| JobError::storage(&target, err))
        });
        if let Err(err) = result {
            let _ = fs::remove_file(&temp);
            return Err(err);
        }
        Ok(target)
    }

    pub fn read(&self, job_id: &str) -> Result<Vec<u8>, JobError> {
        let path = self.path_for(job_id);
        fs::read(&path).map_err(|err| JobError::storage(path, err))
    }

    pub fn exists(&self, job_id: &str) -> bool {
        self.path_for(job_id).is_file()
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn sanitize_stem(job_id: &str) -> String {
    let stem: String = job_id
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_STEM_CHARS)
        .collect();
    let stem = stem.trim_matches('_');
    if stem.is_empty() {
        "job".to_string()
    } else {
        stem.to_string()
    }
}

fn short_digest(job_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(job_id.as_bytes());
    hex::encode(&hasher.finalize()[..4])
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(dir: &Path) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(dir)? {
            names.push(entry?.file_name().to_string_lossy().to_string());
        }
        names.sort();
        Ok(names)
    }

    #[test]
    fn persisted_bytes_read_back_identically() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ArtifactStore::new(temp.path().join("models"), "glb");
        let bytes = b"glTF\x02\x00\x00\x00payload".to_vec();

        let path = store.persist("job-42", &bytes, &CancellationToken::new())?;
        assert_eq!(path, store.path_for("job-42"));
        assert_eq!(store.read("job-42")?, bytes);
        assert_eq!(fs::read(&path)?, bytes);
        Ok(())
    }

    #[test]
    fn retried_persist_overwrites_the_same_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ArtifactStore::new(temp.path(), "glb");
        let cancel = CancellationToken::new();

        let first = store.persist("job-42", b"first attempt, longer body", &cancel)?;
        let second = store.persist("job-42", b"second", &cancel)?;
        assert_eq!(first, second);
        assert_eq!(store.read("job-42")?, b"second".to_vec());
        assert_eq!(entries(temp.path())?.len(), 1);
        Ok(())
    }

    #[test]
    fn path_is_sanitized_and_disambiguated() {
        let store = ArtifactStore::new("/data", "glb");
        let slashed = store.path_for("a/b");
        let underscored = store.path_for("a_b");
        assert_ne!(slashed, underscored);

        let name = slashed.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("a_b-"), "{name}");
        assert!(name.ends_with(".glb"));
        assert_eq!(name.len(), "a_b-".len() + 8 + ".glb".len());
        assert_eq!(slashed.parent(), Some(Path::new("/data")));

        let dots = store.path_for("../..");
        assert!(dots.file_name().unwrap().to_string_lossy().starts_with("job-"));
    }

    #[test]
    fn cancelled_persist_leaves_nothing_behind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = ArtifactStore::new(temp.path(), "glb");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = store.persist("job-42", b"bytes", &cancel).unwrap_err();
        assert!(matches!(err, JobError::Cancelled));
        assert!(!store.exists("job-42"));
        assert!(entries(temp.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn failed_persist_leaves_no_final_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        // A regular file where the directory should be makes every write fail.
        let blocker = temp.path().join("models");
        fs::write(&blocker, b"not a directory")?;
        let store = ArtifactStore::new(&blocker, "glb");

        let err = store
            .persist("job-42", b"bytes", &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(err, JobError::Storage { .. }));
        assert!(!store.exists("job-42"));
        assert_eq!(entries(temp.path())?, vec!["models".to_string()]);
        Ok(())
    }

    #[test]
    fn sha256_hex_is_lowercase_hex() {
        let digest = sha256_hex(b"abc");
        assert_eq!(digest.len(), 64);
        assert!(digest.starts_with("ba7816bf"));
    }
}
