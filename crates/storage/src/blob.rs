use std::path::PathBuf;

use snafu::ResultExt;

use super::error::{
    CreateBlobDirectorySnafu, EraseBlobFileSnafu, ReadBlobFileSnafu, ReplaceBlobFileSnafu,
    StorageResult, WriteBlobFileSnafu,
};

/// Durable storage collaborator: one opaque blob, rewritten wholesale.
pub trait DurableBlob: Send + Sync {
    /// Returns the previously persisted blob, or `None` if nothing was saved.
    fn load(&self) -> StorageResult<Option<String>>;

    fn save(&self, blob: &str) -> StorageResult<()>;

    /// Removes the durable record entirely. Idempotent.
    fn erase(&self) -> StorageResult<()>;
}

/// File-backed blob written atomically: temp file first, then rename, so a
/// crash mid-write never leaves a truncated transcript behind.
#[derive(Debug, Clone)]
pub struct JsonFileBlob {
    path: PathBuf,
}

impl JsonFileBlob {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl DurableBlob for JsonFileBlob {
    fn load(&self) -> StorageResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(source).context(ReadBlobFileSnafu {
                stage: "blob-load",
                path: self.path.clone(),
            }),
        }
    }

    fn save(&self, blob: &str) -> StorageResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).context(CreateBlobDirectorySnafu {
                stage: "blob-create-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        std::fs::write(&temp_path, blob).context(WriteBlobFileSnafu {
            stage: "blob-write-temporary",
            path: temp_path.clone(),
        })?;

        std::fs::rename(&temp_path, &self.path).context(ReplaceBlobFileSnafu {
            stage: "blob-rename-temporary",
            from: temp_path,
            to: self.path.clone(),
        })?;

        Ok(())
    }

    fn erase(&self) -> StorageResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(source).context(EraseBlobFileSnafu {
                stage: "blob-erase",
                path: self.path.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn scratch_blob() -> JsonFileBlob {
        let path = std::env::temp_dir()
            .join(format!("quill-blob-test-{}", Uuid::now_v7()))
            .join("transcript.json");
        JsonFileBlob::new(path)
    }

    #[test]
    fn load_returns_none_before_any_save() {
        let blob = scratch_blob();
        assert_eq!(blob.load().expect("load"), None);
    }

    #[test]
    fn save_then_load_round_trips_and_erase_is_idempotent() {
        let blob = scratch_blob();

        blob.save("{\"sessions\":[]}").expect("save");
        assert_eq!(
            blob.load().expect("load").as_deref(),
            Some("{\"sessions\":[]}")
        );

        blob.erase().expect("erase");
        assert_eq!(blob.load().expect("load after erase"), None);
        blob.erase().expect("second erase is a no-op");

        let _ = std::fs::remove_dir_all(blob.path().parent().expect("parent"));
    }

    #[test]
    fn save_replaces_previous_contents_wholesale() {
        let blob = scratch_blob();
        blob.save("first").expect("first save");
        blob.save("second").expect("second save");
        assert_eq!(blob.load().expect("load").as_deref(), Some("second"));

        let _ = std::fs::remove_dir_all(blob.path().parent().expect("parent"));
    }
}
