use std::io::Write;
use std::sync::{Arc, Mutex};

use quill_llm::create_provider;
use quill_storage::{MessageRecord, MessageRole, SessionId, SessionStore, StoreChange};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use crate::chat::transcript::ESTIMATED_TEXT_LINE_HEIGHT;
use crate::chat::{ChatController, ControllerEvent, ScrollCoordinator, StreamState, TranscriptWindow};
use crate::config::SettingsStore;

/// Terminal viewport height in transcript units (~24 text rows).
pub const VIEWPORT_EXTENT: f32 = ESTIMATED_TEXT_LINE_HEIGHT * 24.0;

/// View model pairing the windowed transcript with follow-bottom policy.
/// Subscribed to store changes; never mutates the store.
struct TranscriptView {
    window: TranscriptWindow,
    scroll: ScrollCoordinator,
}

impl TranscriptView {
    fn new() -> Self {
        Self {
            window: TranscriptWindow::default(),
            scroll: ScrollCoordinator::new(VIEWPORT_EXTENT),
        }
    }

    fn sync_growth(&mut self, messages: &[MessageRecord]) {
        self.window.sync_rows(messages);
        self.scroll.handle_content_growth(self.window.total_extent());
    }

    fn reset(&mut self, messages: &[MessageRecord]) {
        self.window.sync_rows(messages);
        self.scroll.reset(self.window.total_extent());
    }
}

/// Interactive shell state: controller plus the rendering bookkeeping for
/// incremental echo of a streaming answer.
struct Shell {
    controller: ChatController,
    store: Arc<Mutex<SessionStore>>,
    view: TranscriptView,
    /// Session whose streaming answer is being echoed incrementally.
    echo_session: Option<SessionId>,
    printed_thinking: usize,
    printed_content: usize,
}

/// Terminal chat client wiring: settings -> provider, store subscription ->
/// view model, one select loop over stdin, stream events, and the flush
/// debounce timer.
pub struct ChatApp {
    shell: Shell,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    store_changes: mpsc::UnboundedReceiver<StoreChange>,
}

impl ChatApp {
    pub fn new(store: Arc<Mutex<SessionStore>>, settings_store: &SettingsStore) -> Self {
        let provider = match settings_store.settings().to_provider_config() {
            Some(config) => match create_provider(config) {
                Ok(provider) => Some(provider),
                Err(error) => {
                    tracing::error!(%error, "failed to initialize provider adapter");
                    None
                }
            },
            None => {
                tracing::warn!("no API token configured; submissions will be refused");
                None
            }
        };

        let (event_tx, events) = mpsc::unbounded_channel();
        let store_changes = store.lock().expect("session store lock").subscribe();
        let controller =
            ChatController::new(store.clone(), settings_store.shared(), provider, event_tx);

        Self {
            shell: Shell {
                controller,
                store,
                view: TranscriptView::new(),
                echo_session: None,
                printed_thinking: 0,
                printed_content: 0,
            },
            events,
            store_changes,
        }
    }

    pub async fn run(self) {
        let ChatApp {
            mut shell,
            mut events,
            mut store_changes,
        } = self;

        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        shell.print_welcome();

        loop {
            shell.drain_store_changes(&mut store_changes);
            let flush_at = shell.controller.flush_deadline();

            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            if !shell.handle_line(text.trim()).await {
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(error) => {
                            tracing::error!(%error, "failed to read stdin");
                            break;
                        }
                    }
                }
                maybe_event = events.recv() => {
                    if let Some(event) = maybe_event {
                        shell.handle_controller_event(event);
                    }
                }
                _ = flush_timer(flush_at) => {
                    shell.controller.flush_pending();
                    shell.echo_stream_progress();
                }
            }
        }

        shell.controller.cancel_active_stream();
    }
}

async fn flush_timer(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl Shell {
    fn print_welcome(&self) {
        println!("quill — type a prompt, or /help for commands.");
    }

    /// Handles one input line. Returns false to quit.
    async fn handle_line(&mut self, line: &str) -> bool {
        match line {
            "" => {}
            "/quit" | "/exit" => {
                self.controller.cancel_active_stream();
                return false;
            }
            "/help" => self.print_help(),
            "/new" => {
                self.controller.new_session();
                println!("started a new chat.");
            }
            "/sessions" => self.print_sessions(),
            "/clear" => {
                self.controller.clear_all();
                self.controller.new_session();
                println!("cleared all sessions.");
            }
            "/stop" => self.controller.stop(),
            "/up" => self.scroll_by(-VIEWPORT_EXTENT / 2.0),
            "/down" => self.scroll_by(VIEWPORT_EXTENT / 2.0),
            "/bottom" => {
                self.view.scroll.request_scroll_to_bottom();
                let _ = self.view.scroll.take_pending_scroll();
                self.render_window();
            }
            _ if line.starts_with("/open ") => self.open_session(&line["/open ".len()..]),
            _ if line.starts_with("/delete ") => self.delete_session(&line["/delete ".len()..]),
            _ if line.starts_with('/') => println!("unknown command: {line}"),
            prompt => {
                self.printed_thinking = 0;
                self.printed_content = 0;
                let state_before = self.controller.stream_state().clone();
                self.controller.submit(prompt).await;
                self.echo_session = self.store.lock().expect("session store lock").current();
                // The non-streaming path settles inside submit; echo and
                // report here so the answer is not silently swallowed. A
                // refused submission leaves the state untouched and prints
                // nothing.
                if !self.controller.is_streaming()
                    && self.controller.stream_state() != &state_before
                {
                    self.echo_stream_progress();
                    self.report_turn_end();
                }
            }
        }
        true
    }

    fn print_help(&self) {
        println!(
            "commands: /new, /sessions, /open <n>, /delete <n>, /clear, /stop, /up, /down, /bottom, /quit"
        );
    }

    fn print_sessions(&self) {
        let store = self.store.lock().expect("session store lock");
        let current = store.current();
        for (index, session) in store.sessions().iter().enumerate() {
            let marker = if current == Some(session.id) { "*" } else { " " };
            println!(
                "{marker} {:>2}  {}  ({} messages)",
                index + 1,
                session.title,
                session.messages.len()
            );
        }
    }

    fn session_at(&self, raw_index: &str) -> Option<SessionId> {
        let index: usize = raw_index.trim().parse().ok()?;
        let store = self.store.lock().expect("session store lock");
        store.sessions().get(index.checked_sub(1)?).map(|session| session.id)
    }

    fn open_session(&mut self, raw_index: &str) {
        match self.session_at(raw_index) {
            Some(session_id) => self.controller.select_session(session_id),
            None => println!("no such session: {raw_index}"),
        }
    }

    fn delete_session(&mut self, raw_index: &str) {
        match self.session_at(raw_index) {
            Some(session_id) => {
                self.controller.delete_session(session_id);
                println!("deleted session {raw_index}.");
            }
            None => println!("no such session: {raw_index}"),
        }
    }

    fn scroll_by(&mut self, delta: f32) {
        let offset = self.view.scroll.scroll_offset() + delta;
        self.view.scroll.handle_user_scroll(offset);
        self.render_window();
    }

    /// Prints the windowed slice of the transcript around the viewport.
    fn render_window(&self) {
        let store = self.store.lock().expect("session store lock");
        let messages = store.visible_messages();
        let range = self
            .view
            .window
            .visible_range(self.view.scroll.scroll_offset(), VIEWPORT_EXTENT);

        println!("--- transcript [{}..{}) of {} ---", range.start, range.end, messages.len());
        for message in messages.get(range).unwrap_or(&[]) {
            let speaker = match message.role {
                MessageRole::User => "you",
                MessageRole::Assistant => "assistant",
            };
            println!("{speaker}: {}", message.content);
        }
    }

    fn handle_controller_event(&mut self, event: ControllerEvent) {
        let was_streaming = self.controller.is_streaming();
        self.controller.handle_event(event);
        self.echo_stream_progress();

        if was_streaming && !self.controller.is_streaming() {
            self.report_turn_end();
        }
    }

    /// Echoes newly flushed thinking/answer text. Append-only by design, so
    /// printing the suffix past the high-water mark is enough.
    fn echo_stream_progress(&mut self) {
        let store = self.store.lock().expect("session store lock");
        if store.current() != self.echo_session {
            return;
        }
        let Some(last) = store.visible_messages().last() else {
            return;
        };
        if last.role != MessageRole::Assistant {
            return;
        }

        if let Some(thinking) = &last.thinking
            && thinking.len() > self.printed_thinking
        {
            print!("{}", &thinking[self.printed_thinking..]);
            self.printed_thinking = thinking.len();
            let _ = std::io::stdout().flush();
        }
        if last.content.len() > self.printed_content {
            if self.printed_content == 0 && self.printed_thinking > 0 {
                println!();
            }
            print!("{}", &last.content[self.printed_content..]);
            self.printed_content = last.content.len();
            let _ = std::io::stdout().flush();
        }
    }

    fn report_turn_end(&mut self) {
        println!();
        match self.controller.stream_state() {
            StreamState::Done(_) => {
                if let Some(thought_for) = self.controller.thought_for() {
                    println!("(thought for {} seconds)", thought_for.as_secs());
                }
            }
            StreamState::Error { message, .. } => println!("error: {message}"),
            StreamState::Cancelled(_) => println!("(cancelled)"),
            StreamState::Idle | StreamState::Submitting(_) | StreamState::Streaming(_) => {}
        }
    }

    /// Applies store notifications to the view model. Growth while following
    /// the tail coalesces into a single scroll-to-end per burst.
    fn drain_store_changes(&mut self, changes: &mut mpsc::UnboundedReceiver<StoreChange>) {
        let mut needs_reset = false;
        let mut grew = false;

        while let Ok(change) = changes.try_recv() {
            match change {
                StoreChange::MessagesChanged { session_id, .. } => {
                    let store = self.store.lock().expect("session store lock");
                    if store.current() == Some(session_id) {
                        grew = true;
                    }
                }
                StoreChange::SessionSelected(_) | StoreChange::Cleared => {
                    needs_reset = true;
                }
                StoreChange::SessionCreated(_)
                | StoreChange::SessionDeleted(_)
                | StoreChange::TitleChanged(_) => {}
            }
        }

        if needs_reset {
            let store = self.store.lock().expect("session store lock");
            self.view.reset(store.visible_messages());
            // A selection fired by submit's lazy session creation must not
            // tear down the echo state of the turn it belongs to.
            if !self.controller.is_streaming() {
                self.echo_session = None;
                self.printed_thinking = 0;
                self.printed_content = 0;
            }
        } else if grew {
            let store = self.store.lock().expect("session store lock");
            self.view.sync_growth(store.visible_messages());
        }

        // Consume the coalesced scroll action; in append-mode echo the
        // terminal already sits at the tail, so following costs nothing.
        let _ = self.view.scroll.take_pending_scroll();
    }
}
