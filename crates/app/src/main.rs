use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use quill::app::ChatApp;
use quill::config::SettingsStore;
use quill_storage::{JsonFileBlob, SessionStore};

pub const TRANSCRIPT_FILE_NAME: &str = "transcript.json";

/// Durable transcript location: the platform data directory, with a local
/// dot-directory fallback.
fn default_transcript_path() -> PathBuf {
    dirs::data_dir()
        .map(|path| path.join("quill"))
        .unwrap_or_else(|| PathBuf::from(".quill"))
        .join(TRANSCRIPT_FILE_NAME)
}

#[tokio::main]
async fn main() {
    // Initialize tracing for development debugging.
    tracing_subscriber::fmt::init();

    let settings_store = SettingsStore::load();

    // History loads first; startup always begins a fresh empty session.
    let blob = JsonFileBlob::new(default_transcript_path());
    let store = Arc::new(Mutex::new(SessionStore::open(Box::new(blob))));

    ChatApp::new(store, &settings_store).run().await;
}
