use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use quill_llm::{
    ContentChannel, LlmProvider, ProviderMessage, ProviderStreamHandle, ProviderWorker,
    StreamCancelHandle, StreamEvent, StreamEventMapped, StreamEventPayload, StreamRequest,
};
use quill_storage::{MessageRecord, MessageRole, SessionId, SessionStore, TokenUsage};
use tokio::sync::mpsc;

use super::accumulator::apply_stream_event;
use super::message::{
    ConversationId, Message, Role, StreamSessionId, StreamState, StreamTarget, StreamTransition,
};
use crate::config::ProviderSettings;

/// Token bursts are folded into a single store mutation roughly this often.
pub const STREAM_DEBOUNCE_MS: u64 = 50;

/// Inbox message for the controller's single event loop.
#[derive(Debug)]
pub enum ControllerEvent {
    Stream(StreamEventMapped),
    /// The provider event channel closed. Reaching the controller while the
    /// target is still live means the worker died without a terminal event.
    StreamClosed(quill_llm::StreamTarget),
}

/// Elapsed-time tracking for the thinking liveness display. The value is
/// latched when the stream leaves its live phase so "thought for N seconds"
/// stays stable afterwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThinkingTimer {
    started_at: Option<Instant>,
    latched: Option<Duration>,
}

impl ThinkingTimer {
    /// Arms the timer on the first thinking delta of a turn.
    pub fn start_once(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Instant::now());
        }
    }

    pub fn is_running(&self) -> bool {
        self.started_at.is_some() && self.latched.is_none()
    }

    pub fn finalize(&mut self) {
        if let Some(started_at) = self.started_at
            && self.latched.is_none()
        {
            self.latched = Some(started_at.elapsed());
        }
    }

    /// Live elapsed time while running, the latched value afterwards.
    pub fn elapsed(&self) -> Option<Duration> {
        self.latched
            .or_else(|| self.started_at.map(|started_at| started_at.elapsed()))
    }
}

/// Controller-level stream bookkeeping kept outside the domain model.
struct ActiveStream {
    target: StreamTarget,
    cancel: Option<StreamCancelHandle>,
    draft: Message,
    dirty: bool,
}

/// Orchestrates one submission at a time: transcript mutation, provider
/// stream lifecycle, cancellation, and terminal bookkeeping. All store
/// mutations run under the store lock; stream events arrive through the
/// owner's single select loop and are applied synchronously here.
pub struct ChatController {
    store: Arc<Mutex<SessionStore>>,
    settings: Arc<ArcSwap<ProviderSettings>>,
    provider: Option<Arc<dyn LlmProvider>>,
    event_tx: mpsc::UnboundedSender<ControllerEvent>,
    stream_state: StreamState,
    active_stream: Option<ActiveStream>,
    next_stream_session_id: u64,
    flush_deadline: Option<tokio::time::Instant>,
    thinking: ThinkingTimer,
}

impl ChatController {
    pub fn new(
        store: Arc<Mutex<SessionStore>>,
        settings: Arc<ArcSwap<ProviderSettings>>,
        provider: Option<Arc<dyn LlmProvider>>,
        event_tx: mpsc::UnboundedSender<ControllerEvent>,
    ) -> Self {
        Self {
            store,
            settings,
            provider,
            event_tx,
            stream_state: StreamState::Idle,
            active_stream: None,
            next_stream_session_id: 1,
            flush_deadline: None,
            thinking: ThinkingTimer::default(),
        }
    }

    pub fn stream_state(&self) -> &StreamState {
        &self.stream_state
    }

    pub fn is_streaming(&self) -> bool {
        self.active_stream.is_some()
    }

    pub fn active_target(&self) -> Option<StreamTarget> {
        self.active_stream.as_ref().map(|active| active.target)
    }

    pub fn thinking_in_progress(&self) -> bool {
        self.thinking.is_running()
    }

    /// "Thought for N seconds" source: live while thinking, latched after.
    pub fn thought_for(&self) -> Option<Duration> {
        self.thinking.elapsed()
    }

    /// Submits a prompt against the current session, lazily creating one.
    ///
    /// Empty input or a missing credential refuses silently: no state change,
    /// no transcript mutation. A submit while a stream is active cancels the
    /// active stream first (last-submission-wins).
    pub async fn submit(&mut self, content: &str) {
        let content = content.trim();
        if content.is_empty() {
            tracing::debug!("ignoring empty submission");
            return;
        }

        let settings = self.settings.load_full();
        if settings.api_token.trim().is_empty() {
            tracing::warn!("submission refused: no API token configured");
            return;
        }
        let Some(provider) = self.provider.clone() else {
            tracing::warn!("submission refused: provider unavailable");
            return;
        };

        if self.active_stream.is_some() {
            self.cancel_active_stream();
        }

        let session_id = {
            let mut store = self.store.lock().expect("session store lock");
            match store.current() {
                Some(session_id) => session_id,
                None => store.create_session(),
            }
        };

        let target = StreamTarget::new(
            ConversationId::new(session_id.as_uuid()),
            StreamSessionId::new(self.next_stream_session_id),
        );
        // Reserve the next id immediately so follow-up submissions never
        // reuse a target.
        self.next_stream_session_id = self.next_stream_session_id.saturating_add(1);

        match self.stream_state.apply(StreamTransition::Submit(target)) {
            Ok(next_state) => self.stream_state = next_state,
            Err(rejection) => {
                tracing::warn!(?rejection, "submit rejected by stream state");
                return;
            }
        }

        // Optimistic append: the user turn and the response slot commit
        // locally and are never rolled back.
        let request_messages = {
            let mut store = self.store.lock().expect("session store lock");
            store.append_message(session_id, MessageRecord::user(content));
            store.append_message(session_id, MessageRecord::assistant_placeholder());
            store
                .get(session_id)
                .map(|session| build_provider_messages(&session.messages))
                .unwrap_or_default()
        };

        self.thinking = ThinkingTimer::default();

        let request = build_stream_request(&settings, chat_target_to_provider(target), request_messages);

        if !settings.stream {
            self.run_non_streaming(provider, request, target, session_id).await;
            return;
        }

        match provider.stream_chat(request) {
            Ok(handle) => self.start_stream(target, handle),
            Err(error) => {
                tracing::error!(target = ?target, error = %error, "failed to open provider stream");
                self.apply_transition(StreamTransition::Fail {
                    target,
                    message: error.to_string(),
                });
                self.thinking.finalize();
            }
        }
    }

    fn start_stream(&mut self, target: StreamTarget, handle: ProviderStreamHandle) {
        self.active_stream = Some(ActiveStream {
            target,
            cancel: Some(handle.cancel),
            draft: Message::assistant_draft(),
            dirty: false,
        });
        self.flush_deadline = None;
        self.spawn_stream_pipeline(handle.stream, handle.worker);
        self.apply_transition(StreamTransition::Opened(target));
    }

    fn spawn_stream_pipeline(
        &mut self,
        mut stream: quill_llm::ProviderEventStream,
        worker: ProviderWorker,
    ) {
        tokio::spawn(worker);

        let events = self.event_tx.clone();
        tokio::spawn(async move {
            let target = stream.target();
            while let Some(event) = stream.recv().await {
                if events.send(ControllerEvent::Stream(event)).is_err() {
                    return;
                }
            }
            let _ = events.send(ControllerEvent::StreamClosed(target));
        });
    }

    async fn run_non_streaming(
        &mut self,
        provider: Arc<dyn LlmProvider>,
        request: StreamRequest,
        target: StreamTarget,
        session_id: SessionId,
    ) {
        self.apply_transition(StreamTransition::Opened(target));

        match provider.complete(request).await {
            Ok(reply) => {
                let record = MessageRecord {
                    role: MessageRole::Assistant,
                    content: reply.content,
                    thinking: reply.thinking,
                    usage: reply.usage.map(usage_to_record),
                };
                let mut store = self.store.lock().expect("session store lock");
                if store.append_or_replace_last_assistant(session_id, record) {
                    store.derive_title(session_id);
                }
                drop(store);
                self.apply_transition(StreamTransition::Complete(target));
            }
            Err(error) => {
                tracing::error!(target = ?target, error = %error, "completion request failed");
                self.apply_transition(StreamTransition::Fail {
                    target,
                    message: error.to_string(),
                });
            }
        }
        self.thinking.finalize();
    }

    /// Applies one inbox event. Events whose target no longer matches the
    /// in-flight stream are discarded, which is what suppresses buffered
    /// chunks after cancellation, session switches, and deletions.
    pub fn handle_event(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Stream(mapped) => {
                let target = provider_target_to_chat(mapped.target);
                if !self.stream_event_is_current(target) {
                    return;
                }
                match mapped.payload {
                    StreamEventPayload::Decoded(decoded) => {
                        self.apply_decoded_event(target, decoded);
                    }
                    StreamEventPayload::TransportFailed(message) => {
                        self.flush_pending();
                        self.finish_stream(target, StreamTransition::Fail { target, message });
                    }
                }
            }
            ControllerEvent::StreamClosed(target) => {
                let target = provider_target_to_chat(target);
                if self.stream_event_is_current(target) {
                    self.flush_pending();
                    self.finish_stream(
                        target,
                        StreamTransition::Fail {
                            target,
                            message: "provider stream ended before a terminal event".to_string(),
                        },
                    );
                }
            }
        }
    }

    fn apply_decoded_event(&mut self, target: StreamTarget, event: StreamEvent) {
        if matches!(
            event,
            StreamEvent::ContentDelta {
                channel: ContentChannel::Thinking,
                ..
            }
        ) {
            self.thinking.start_once();
        }

        match event {
            StreamEvent::Stop => {
                self.flush_pending();
                self.finish_stream(target, StreamTransition::Complete(target));
            }
            StreamEvent::Error { message } => {
                self.flush_pending();
                self.finish_stream(target, StreamTransition::Fail { target, message });
            }
            other => {
                let mut accumulated = false;
                if let Some(active) = self.active_stream.as_mut() {
                    apply_stream_event(&mut active.draft, &other);
                    if !matches!(other, StreamEvent::Malformed) {
                        active.dirty = true;
                        accumulated = true;
                    }
                }
                if accumulated {
                    self.schedule_flush();
                }
            }
        }
    }

    /// Deadline for the pending debounced flush, if one is scheduled. The
    /// owning loop sleeps on this and calls [`Self::flush_pending`].
    pub fn flush_deadline(&self) -> Option<tokio::time::Instant> {
        self.flush_deadline
    }

    /// Writes the accumulated draft into the response slot. Never grows the
    /// transcript: the placeholder is replaced in place.
    pub fn flush_pending(&mut self) {
        self.flush_deadline = None;
        let Some(mut active) = self.active_stream.take() else {
            return;
        };
        Self::flush_draft(&self.store, &mut active);
        self.active_stream = Some(active);
    }

    fn flush_draft(store: &Arc<Mutex<SessionStore>>, active: &mut ActiveStream) {
        if !active.dirty {
            return;
        }
        active.dirty = false;

        let session_id = storage_session_id(active.target.conversation_id);
        let record = message_to_record(&active.draft);
        let mut store = store.lock().expect("session store lock");
        if !store.append_or_replace_last_assistant(session_id, record) {
            tracing::warn!(%session_id, "dropping stream update for deleted session");
        }
    }

    fn schedule_flush(&mut self) {
        if self.flush_deadline.is_none() {
            self.flush_deadline =
                Some(tokio::time::Instant::now() + Duration::from_millis(STREAM_DEBOUNCE_MS));
        }
    }

    fn finish_stream(&mut self, target: StreamTarget, transition: StreamTransition) {
        let Some(active) = self.active_stream.take() else {
            return;
        };
        if active.target != target {
            self.active_stream = Some(active);
            return;
        }

        self.flush_deadline = None;
        self.apply_transition(transition);

        if matches!(self.stream_state, StreamState::Done(_)) {
            let session_id = storage_session_id(target.conversation_id);
            self.store
                .lock()
                .expect("session store lock")
                .derive_title(session_id);
        }

        self.thinking.finalize();
    }

    /// Cancels the in-flight stream, keeping whatever partial content has
    /// already accumulated.
    pub fn cancel_active_stream(&mut self) {
        let Some(mut active) = self.active_stream.take() else {
            return;
        };

        if let Some(cancel) = active.cancel.take() {
            cancel.cancel();
        }
        Self::flush_draft(&self.store, &mut active);
        self.flush_deadline = None;

        self.apply_transition(StreamTransition::Cancel(active.target));
        self.thinking.finalize();
    }

    pub fn new_session(&mut self) -> SessionId {
        self.cancel_active_stream();
        self.store.lock().expect("session store lock").create_session()
    }

    /// Selecting another session cancels active streaming immediately; the
    /// replace-last-assistant rule must never cross session boundaries.
    pub fn select_session(&mut self, session_id: SessionId) {
        self.cancel_active_stream();
        self.store
            .lock()
            .expect("session store lock")
            .select_session(session_id);
    }

    pub fn delete_session(&mut self, session_id: SessionId) {
        let streaming_into_deleted = self
            .active_stream
            .as_ref()
            .is_some_and(|active| storage_session_id(active.target.conversation_id) == session_id);
        if streaming_into_deleted {
            self.cancel_active_stream();
        }
        self.store
            .lock()
            .expect("session store lock")
            .delete_session(session_id);
    }

    pub fn clear_all(&mut self) {
        self.cancel_active_stream();
        self.store.lock().expect("session store lock").clear_all();
    }

    pub fn stop(&mut self) {
        self.cancel_active_stream();
    }

    fn apply_transition(&mut self, transition: StreamTransition) {
        match self.stream_state.apply(transition) {
            Ok(next_state) => self.stream_state = next_state,
            Err(rejection) => {
                tracing::warn!(?rejection, "stream transition rejected");
            }
        }
    }

    fn stream_event_is_current(&self, target: StreamTarget) -> bool {
        self.active_stream
            .as_ref()
            .is_some_and(|active| active.target == target)
            && self.stream_state.accepts_stream_event(target)
    }
}

fn build_provider_messages(messages: &[MessageRecord]) -> Vec<ProviderMessage> {
    messages
        .iter()
        .filter(|message| !message.content.trim().is_empty())
        .map(|message| {
            ProviderMessage::new(
                record_role_to_provider(message.role),
                message.content.clone(),
            )
        })
        .collect()
}

fn build_stream_request(
    settings: &ProviderSettings,
    target: quill_llm::StreamTarget,
    messages: Vec<ProviderMessage>,
) -> StreamRequest {
    let mut request = StreamRequest::new(target, settings.model.clone(), messages)
        .with_thinking_budget(settings.thinking_budget_tokens);
    if !settings.system_prompt.trim().is_empty() {
        request = request.with_preamble(settings.system_prompt.clone());
    }
    if let Some(max_tokens) = settings.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }
    request
}

fn record_role_to_provider(role: MessageRole) -> quill_llm::Role {
    match role {
        MessageRole::User => quill_llm::Role::User,
        MessageRole::Assistant => quill_llm::Role::Assistant,
    }
}

fn message_to_record(message: &Message) -> MessageRecord {
    MessageRecord {
        role: match message.role {
            Role::User => MessageRole::User,
            Role::Assistant => MessageRole::Assistant,
        },
        content: message.content.clone(),
        thinking: message.thinking.clone(),
        usage: message.usage.map(usage_to_record),
    }
}

fn usage_to_record(usage: quill_llm::TokenUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: usage.input_tokens,
        output_tokens: usage.output_tokens,
        total_tokens: usage.total_tokens,
    }
}

/// Preserve numeric identity while translating between domain-specific
/// typed wrappers.
fn chat_target_to_provider(target: StreamTarget) -> quill_llm::StreamTarget {
    quill_llm::StreamTarget::new(
        quill_llm::ConversationId::new(target.conversation_id.0),
        quill_llm::StreamSessionId::new(target.session_id.0),
    )
}

fn provider_target_to_chat(target: quill_llm::StreamTarget) -> StreamTarget {
    StreamTarget::new(
        ConversationId::new(target.conversation_id.0),
        StreamSessionId::new(target.session_id.0),
    )
}

fn storage_session_id(conversation_id: ConversationId) -> SessionId {
    SessionId::new(conversation_id.0)
}
