use std::path::PathBuf;

use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum StorageError {
    #[snafu(display("storage id '{raw}' is not a valid session id"))]
    InvalidId {
        stage: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("failed to create transcript directory at {path:?}"))]
    CreateBlobDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to read transcript blob at {path:?}"))]
    ReadBlobFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to write transcript blob at {path:?}"))]
    WriteBlobFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace transcript blob from {from:?} to {to:?}"))]
    ReplaceBlobFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to erase transcript blob at {path:?}"))]
    EraseBlobFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize the transcript mapping"))]
    SerializeTranscript {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to parse the persisted transcript mapping"))]
    DeserializeTranscript {
        stage: &'static str,
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = Result<T, StorageError>;
