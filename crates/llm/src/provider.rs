use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::decoder::StreamEvent;
use crate::http_adapter::{HTTP_PROVIDER_ID, HttpProviderAdapter};
use crate::wire::TokenUsage;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Worker future owning one HTTP streaming exchange. Spawned by the caller.
pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Provider-side conversation identity. Kept as its own wrapper so provider
/// types stay decoupled from chat-domain and storage-domain ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub Uuid);

impl ConversationId {
    pub const fn new(raw: Uuid) -> Self {
        Self(raw)
    }
}

/// Identifier for one streaming generation session.
///
/// This must change on every submit/retry so stale chunks can be rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamSessionId(pub u64);

impl StreamSessionId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// Stream routing key used for stale-chunk rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamTarget {
    pub conversation_id: ConversationId,
    pub session_id: StreamSessionId,
}

impl StreamTarget {
    pub const fn new(conversation_id: ConversationId, session_id: StreamSessionId) -> Self {
        Self {
            conversation_id,
            session_id,
        }
    }
}

/// Chat speaker role as the upstream request body spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_wire_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One prior turn sent upstream as request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Connection settings for one provider instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider_id: String,
    pub api_token: String,
    pub endpoint: String,
}

impl ProviderConfig {
    pub fn new(
        provider_id: impl Into<String>,
        api_token: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            api_token: api_token.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Everything one submission sends upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub target: StreamTarget,
    pub model_id: String,
    pub messages: Vec<ProviderMessage>,
    pub preamble: Option<String>,
    pub max_tokens: Option<u64>,
    pub thinking_budget_tokens: Option<u64>,
}

impl StreamRequest {
    pub fn new(target: StreamTarget, model_id: impl Into<String>, messages: Vec<ProviderMessage>) -> Self {
        Self {
            target,
            model_id: model_id.into(),
            messages,
            preamble: None,
            max_tokens: None,
            thinking_budget_tokens: None,
        }
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_thinking_budget(mut self, budget_tokens: u64) -> Self {
        self.thinking_budget_tokens = Some(budget_tokens);
        self
    }
}

/// Payload of one provider event after target tagging.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEventPayload {
    /// A decoded wire event, exactly as the decoder produced it.
    Decoded(StreamEvent),
    /// The transport failed before a terminal record arrived.
    TransportFailed(String),
}

/// Provider event routed by stream target.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

/// Fully assembled assistant message from the non-streaming path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssistantReply {
    pub content: String,
    pub thinking: Option<String>,
    pub usage: Option<TokenUsage>,
}

/// Receiving half of one stream's event channel.
pub struct ProviderEventStream {
    target: StreamTarget,
    receiver: mpsc::UnboundedReceiver<StreamEventMapped>,
}

impl ProviderEventStream {
    pub fn target(&self) -> StreamTarget {
        self.target
    }

    pub async fn recv(&mut self) -> Option<StreamEventMapped> {
        self.receiver.recv().await
    }
}

/// One-shot cancellation handle for an in-flight stream worker.
///
/// Dropping the handle without calling `cancel` also aborts the worker,
/// because the worker selects on the closed channel.
pub struct StreamCancelHandle {
    sender: oneshot::Sender<()>,
}

impl StreamCancelHandle {
    pub fn cancel(self) {
        let _ = self.sender.send(());
    }
}

/// Bundle returned by `stream_chat`: the event stream to read, the worker to
/// spawn, and the cancel handle to keep for the stream's lifetime.
pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
    pub cancel: StreamCancelHandle,
}

/// Builds the channel plumbing shared by every provider implementation.
pub fn make_event_stream(
    target: StreamTarget,
) -> (
    mpsc::UnboundedSender<StreamEventMapped>,
    ProviderEventStream,
    StreamCancelHandle,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();

    (
        event_tx,
        ProviderEventStream {
            target,
            receiver: event_rx,
        },
        StreamCancelHandle { sender: cancel_tx },
        cancel_rx,
    )
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("provider '{provider_id}' is missing an API token at `{stage}`"))]
    MissingApiToken {
        stage: &'static str,
        provider_id: String,
    },
    #[snafu(display("failed to build HTTP client at `{stage}`"))]
    BuildHttpClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("transport failure at `{stage}`: {source}"))]
    Transport {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("upstream returned status {status} at `{stage}`: {body}"))]
    UpstreamStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to parse completion payload at `{stage}`"))]
    CompletionParse {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("stream request for {target:?} has no messages at `{stage}`"))]
    EmptyMessageSet {
        stage: &'static str,
        target: StreamTarget,
    },
    #[snafu(display("unknown provider id '{provider_id}' at `{stage}`"))]
    UnknownProvider {
        stage: &'static str,
        provider_id: String,
    },
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Seam between the chat controller and whatever speaks to the model API.
pub trait LlmProvider: Send + Sync {
    fn id(&self) -> &str;

    fn name(&self) -> &str;

    /// Opens a streaming exchange. The returned worker must be spawned; it
    /// guarantees exactly one terminal event per run unless cancelled.
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;

    /// Non-streaming exchange: one request, one fully assembled reply.
    fn complete<'a>(&'a self, request: StreamRequest) -> BoxFuture<'a, ProviderResult<AssistantReply>>;
}

/// Instantiates the provider matching the configured id.
pub fn create_provider(config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    match config.provider_id.as_str() {
        HTTP_PROVIDER_ID => Ok(Arc::new(HttpProviderAdapter::new(config)?)),
        other => UnknownProviderSnafu {
            stage: "create-provider",
            provider_id: other.to_string(),
        }
        .fail(),
    }
}
