use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tokio::sync::mpsc;

use super::blob::DurableBlob;
use super::error::{DeserializeTranscriptSnafu, SerializeTranscriptSnafu, StorageResult};
use super::ids::SessionId;
use super::types::{DEFAULT_SESSION_TITLE, MessageRecord, MessageRole, SessionRecord, TITLE_PREFIX_CHARS};

/// Change notification fanned out to store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    SessionCreated(SessionId),
    SessionSelected(Option<SessionId>),
    SessionDeleted(SessionId),
    Cleared,
    /// A session's message list mutated. `grew` is true when the list gained
    /// an entry (as opposed to the last entry being replaced in place).
    MessagesChanged { session_id: SessionId, grew: bool },
    TitleChanged(SessionId),
}

/// Serialized shape of the durable blob.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TranscriptBlob {
    sessions: Vec<SessionRecord>,
}

/// In-memory owner of every conversation plus the explicit current-session
/// pointer. All mutations are serialized by the caller (one lock, one writer);
/// the store itself never spawns work.
///
/// Persistence is write-through: every committed change rewrites the durable
/// blob wholesale while the mapping is non-empty, and erases it once the
/// mapping is empty. Persistence failures are logged and never block the
/// in-memory session.
pub struct SessionStore {
    sessions: Vec<SessionRecord>,
    current: Option<SessionId>,
    blob: Box<dyn DurableBlob>,
    subscribers: Vec<mpsc::UnboundedSender<StoreChange>>,
}

impl SessionStore {
    /// Loads persisted history, then starts a fresh empty session and makes
    /// it current. Startup never resumes into an old transcript.
    pub fn open(blob: Box<dyn DurableBlob>) -> Self {
        let sessions = match Self::load_sessions(blob.as_ref()) {
            Ok(sessions) => sessions,
            Err(error) => {
                tracing::warn!(%error, "failed to load persisted transcript; starting empty");
                Vec::new()
            }
        };

        let mut store = Self {
            sessions,
            current: None,
            blob,
            subscribers: Vec::new(),
        };
        store.create_session();
        store
    }

    fn load_sessions(blob: &dyn DurableBlob) -> StorageResult<Vec<SessionRecord>> {
        let Some(raw) = blob.load()? else {
            return Ok(Vec::new());
        };
        let parsed: TranscriptBlob =
            serde_json::from_str(&raw).context(DeserializeTranscriptSnafu {
                stage: "store-load-parse",
            })?;
        Ok(parsed.sessions)
    }

    /// Registers a change-notification subscriber. Dead receivers are pruned
    /// on the next notification.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<StoreChange> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.push(sender);
        receiver
    }

    pub fn sessions(&self) -> &[SessionRecord] {
        &self.sessions
    }

    pub fn get(&self, session_id: SessionId) -> Option<&SessionRecord> {
        self.sessions.iter().find(|session| session.id == session_id)
    }

    pub fn current(&self) -> Option<SessionId> {
        self.current
    }

    pub fn current_session(&self) -> Option<&SessionRecord> {
        self.current.and_then(|session_id| self.get(session_id))
    }

    /// The transcript the renderer shows: the current session's messages, or
    /// nothing when no session is current.
    pub fn visible_messages(&self) -> &[MessageRecord] {
        self.current_session()
            .map(|session| session.messages.as_slice())
            .unwrap_or(&[])
    }

    /// Creates a new empty session and makes it current. Always succeeds.
    pub fn create_session(&mut self) -> SessionId {
        let session_id = SessionId::new_v7();
        self.sessions
            .push(SessionRecord::new(session_id, unix_now_seconds()));
        self.current = Some(session_id);

        self.notify(StoreChange::SessionCreated(session_id));
        self.notify(StoreChange::SessionSelected(Some(session_id)));
        self.persist_after_change();
        session_id
    }

    /// Makes an existing session current. Unknown ids are a silent no-op.
    pub fn select_session(&mut self, session_id: SessionId) {
        if self.get(session_id).is_none() {
            tracing::debug!(%session_id, "ignoring selection of unknown session");
            return;
        }
        if self.current == Some(session_id) {
            return;
        }

        self.current = Some(session_id);
        self.notify(StoreChange::SessionSelected(Some(session_id)));
    }

    /// Removes a session. Deleting the current session leaves no session
    /// current; writes arriving later for the deleted id are discarded.
    pub fn delete_session(&mut self, session_id: SessionId) {
        let before = self.sessions.len();
        self.sessions.retain(|session| session.id != session_id);
        if self.sessions.len() == before {
            tracing::debug!(%session_id, "ignoring deletion of unknown session");
            return;
        }

        let was_current = self.current == Some(session_id);
        if was_current {
            self.current = None;
        }

        self.notify(StoreChange::SessionDeleted(session_id));
        if was_current {
            self.notify(StoreChange::SessionSelected(None));
        }
        self.persist_after_change();
    }

    /// Removes every session and erases the durable record.
    pub fn clear_all(&mut self) {
        self.sessions.clear();
        self.current = None;

        if let Err(error) = self.blob.erase() {
            tracing::warn!(%error, "failed to erase durable transcript");
        }
        self.notify(StoreChange::Cleared);
        self.notify(StoreChange::SessionSelected(None));
    }

    /// Plain ordered append. Returns false (discarding the write) when the
    /// session no longer exists.
    pub fn append_message(&mut self, session_id: SessionId, message: MessageRecord) -> bool {
        let Some(session) = self.get_mut(session_id) else {
            tracing::warn!(%session_id, "discarding append for deleted session");
            return false;
        };

        session.messages.push(message);
        self.notify(StoreChange::MessagesChanged {
            session_id,
            grew: true,
        });
        self.persist_after_change();
        true
    }

    /// Streams partial updates into the transcript without growing it: if the
    /// session's last message is an assistant message it is replaced, else the
    /// message is appended. Returns false when the session no longer exists.
    pub fn append_or_replace_last_assistant(
        &mut self,
        session_id: SessionId,
        message: MessageRecord,
    ) -> bool {
        let Some(session) = self.get_mut(session_id) else {
            tracing::warn!(%session_id, "discarding stream update for deleted session");
            return false;
        };

        let grew = match session.messages.last_mut() {
            Some(last) if last.role == MessageRole::Assistant => {
                *last = message;
                false
            }
            _ => {
                session.messages.push(message);
                true
            }
        };

        self.notify(StoreChange::MessagesChanged { session_id, grew });
        self.persist_after_change();
        true
    }

    /// On the first completed turn, replaces the placeholder title with a
    /// fixed-length prefix of the first user message.
    pub fn derive_title(&mut self, session_id: SessionId) {
        let Some(session) = self.get_mut(session_id) else {
            return;
        };
        if session.title != DEFAULT_SESSION_TITLE {
            return;
        }
        let Some(first_user) = session.first_user_message() else {
            return;
        };

        // Character prefix, not bytes, so multibyte text cannot split a codepoint.
        let derived: String = first_user.content.chars().take(TITLE_PREFIX_CHARS).collect();
        session.title = derived;
        self.notify(StoreChange::TitleChanged(session_id));
        self.persist_after_change();
    }

    fn get_mut(&mut self, session_id: SessionId) -> Option<&mut SessionRecord> {
        self.sessions
            .iter_mut()
            .find(|session| session.id == session_id)
    }

    fn notify(&mut self, change: StoreChange) {
        self.subscribers
            .retain(|subscriber| subscriber.send(change.clone()).is_ok());
    }

    fn persist_after_change(&mut self) {
        let result = if self.sessions.is_empty() {
            self.blob.erase()
        } else {
            self.serialize_sessions()
                .and_then(|raw| self.blob.save(&raw))
        };

        if let Err(error) = result {
            // The live session keeps working without durable backing.
            tracing::warn!(%error, "failed to persist transcript");
        }
    }

    fn serialize_sessions(&self) -> StorageResult<String> {
        let blob = TranscriptBlob {
            sessions: self.sessions.clone(),
        };
        serde_json::to_string(&blob).context(SerializeTranscriptSnafu {
            stage: "store-serialize",
        })
    }
}

fn unix_now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::error::StorageResult;

    /// In-memory stand-in for the durable blob collaborator.
    #[derive(Debug, Clone, Default)]
    struct MemoryBlob {
        contents: Arc<Mutex<Option<String>>>,
    }

    impl DurableBlob for MemoryBlob {
        fn load(&self) -> StorageResult<Option<String>> {
            Ok(self.contents.lock().expect("blob lock").clone())
        }

        fn save(&self, blob: &str) -> StorageResult<()> {
            *self.contents.lock().expect("blob lock") = Some(blob.to_string());
            Ok(())
        }

        fn erase(&self) -> StorageResult<()> {
            *self.contents.lock().expect("blob lock") = None;
            Ok(())
        }
    }

    fn open_store() -> (SessionStore, MemoryBlob) {
        let blob = MemoryBlob::default();
        let store = SessionStore::open(Box::new(blob.clone()));
        (store, blob)
    }

    #[test]
    fn startup_creates_one_fresh_current_session() {
        let (store, _blob) = open_store();
        assert_eq!(store.sessions().len(), 1);
        assert_eq!(store.current(), Some(store.sessions()[0].id));
        assert!(store.visible_messages().is_empty());
        assert_eq!(store.sessions()[0].title, DEFAULT_SESSION_TITLE);
    }

    #[test]
    fn history_survives_restart_and_startup_still_opens_fresh() {
        let blob = MemoryBlob::default();
        let first_id = {
            let mut store = SessionStore::open(Box::new(blob.clone()));
            let session_id = store.current().expect("current");
            store.append_message(session_id, MessageRecord::user("hello"));
            session_id
        };

        let store = SessionStore::open(Box::new(blob));
        assert_eq!(store.sessions().len(), 2);
        assert!(store.get(first_id).is_some(), "history must be retained");
        assert_ne!(store.current(), Some(first_id), "startup opens a new session");
        assert!(store.visible_messages().is_empty());
    }

    #[test]
    fn deleting_current_session_clears_the_visible_transcript() {
        let (mut store, _blob) = open_store();
        let session_id = store.current().expect("current");
        store.append_message(session_id, MessageRecord::user("hi"));

        store.delete_session(session_id);

        assert_eq!(store.current(), None);
        assert!(store.visible_messages().is_empty());
        assert!(store.get(session_id).is_none());
    }

    #[test]
    fn deleting_non_current_session_never_touches_the_current_transcript() {
        let (mut store, _blob) = open_store();
        let other = store.current().expect("current");
        store.append_message(other, MessageRecord::user("old"));

        let current = store.create_session();
        store.append_message(current, MessageRecord::user("new"));

        store.delete_session(other);

        assert_eq!(store.current(), Some(current));
        assert_eq!(store.visible_messages().len(), 1);
        assert_eq!(store.visible_messages()[0].content, "new");
    }

    #[test]
    fn selecting_unknown_session_is_a_silent_noop() {
        let (mut store, _blob) = open_store();
        let current = store.current();
        store.select_session(SessionId::new_v7());
        assert_eq!(store.current(), current);
    }

    #[test]
    fn clear_all_erases_durable_storage_and_restart_starts_fresh() {
        let blob = MemoryBlob::default();
        let mut store = SessionStore::open(Box::new(blob.clone()));
        let session_id = store.current().expect("current");
        store.append_message(session_id, MessageRecord::user("hello"));
        assert!(blob.load().expect("load").is_some());

        store.clear_all();
        assert_eq!(store.current(), None);
        assert!(store.sessions().is_empty());
        assert_eq!(blob.load().expect("load"), None, "blob must be erased");

        let reopened = SessionStore::open(Box::new(blob));
        assert_eq!(reopened.sessions().len(), 1);
        assert!(reopened.visible_messages().is_empty());
    }

    #[test]
    fn append_or_replace_never_grows_the_list_after_the_placeholder() {
        let (mut store, _blob) = open_store();
        let session_id = store.current().expect("current");
        store.append_message(session_id, MessageRecord::user("question"));
        store.append_message(session_id, MessageRecord::assistant_placeholder());
        let length_after_placeholder = store.visible_messages().len();

        for step in 1..=10 {
            let mut partial = MessageRecord::assistant_placeholder();
            partial.content = "x".repeat(step);
            store.append_or_replace_last_assistant(session_id, partial);
            assert_eq!(store.visible_messages().len(), length_after_placeholder);
        }

        assert_eq!(
            store.visible_messages().last().expect("last").content,
            "x".repeat(10)
        );
    }

    #[test]
    fn append_or_replace_appends_when_last_message_is_a_user_turn() {
        let (mut store, _blob) = open_store();
        let session_id = store.current().expect("current");
        store.append_message(session_id, MessageRecord::user("question"));

        let mut reply = MessageRecord::assistant_placeholder();
        reply.content = "answer".to_string();
        store.append_or_replace_last_assistant(session_id, reply);

        assert_eq!(store.visible_messages().len(), 2);
    }

    #[test]
    fn writes_against_a_deleted_session_are_discarded() {
        let (mut store, _blob) = open_store();
        let doomed = store.current().expect("current");
        store.delete_session(doomed);

        assert!(!store.append_message(doomed, MessageRecord::user("ghost")));
        assert!(!store.append_or_replace_last_assistant(
            doomed,
            MessageRecord::assistant_placeholder()
        ));
        assert!(store.get(doomed).is_none(), "session must stay deleted");
    }

    #[test]
    fn title_derivation_takes_the_first_twenty_characters() {
        let (mut store, _blob) = open_store();
        let session_id = store.current().expect("current");
        store.append_message(
            session_id,
            MessageRecord::user("How many r's in strawberry?"),
        );

        store.derive_title(session_id);
        assert_eq!(
            store.get(session_id).expect("session").title,
            "How many r's in stra"
        );
    }

    #[test]
    fn title_derivation_never_overwrites_a_custom_title() {
        let (mut store, _blob) = open_store();
        let session_id = store.current().expect("current");
        store.append_message(session_id, MessageRecord::user("first question"));
        store.derive_title(session_id);
        let derived = store.get(session_id).expect("session").title.clone();

        store.append_message(session_id, MessageRecord::user("second question"));
        store.derive_title(session_id);
        assert_eq!(store.get(session_id).expect("session").title, derived);
    }

    #[test]
    fn subscribers_observe_growth_and_replacement_distinctly() {
        let (mut store, _blob) = open_store();
        let session_id = store.current().expect("current");
        let mut changes = store.subscribe();

        store.append_message(session_id, MessageRecord::user("q"));
        store.append_message(session_id, MessageRecord::assistant_placeholder());
        store.append_or_replace_last_assistant(session_id, MessageRecord::assistant_placeholder());

        let mut grew_flags = Vec::new();
        while let Ok(change) = changes.try_recv() {
            if let StoreChange::MessagesChanged { grew, .. } = change {
                grew_flags.push(grew);
            }
        }
        assert_eq!(grew_flags, vec![true, true, false]);
    }

    #[test]
    fn empty_store_after_delete_erases_the_blob() {
        let blob = MemoryBlob::default();
        let mut store = SessionStore::open(Box::new(blob.clone()));
        let session_id = store.current().expect("current");
        store.append_message(session_id, MessageRecord::user("hello"));
        assert!(blob.load().expect("load").is_some());

        store.delete_session(session_id);
        assert_eq!(blob.load().expect("load"), None);
    }
}
