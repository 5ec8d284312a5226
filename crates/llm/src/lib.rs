/// Incremental line-oriented decoding of the upstream event stream.
pub mod decoder;
/// Reqwest adapter speaking the proxy wire protocol.
pub mod http_adapter;
/// Provider seam: trait, routing keys, stream handles, errors.
pub mod provider;
/// Serde model of the wire payload records.
pub mod wire;

pub use decoder::{ContentChannel, DATA_LINE_PREFIX, EventDecoder, StreamEvent};
pub use http_adapter::{
    API_TOKEN_HEADER, DEFAULT_THINKING_BUDGET_TOKENS, HTTP_PROVIDER_ID, HttpProviderAdapter,
};
pub use provider::{
    AssistantReply, BoxFuture, ConversationId, LlmProvider, ProviderConfig, ProviderError,
    ProviderEventStream, ProviderMessage, ProviderResult, ProviderStreamHandle, ProviderWorker,
    Role, StreamCancelHandle, StreamEventMapped, StreamEventPayload, StreamRequest,
    StreamSessionId, StreamTarget, create_provider, make_event_stream,
};
pub use wire::{TokenUsage, WireCompletion, WireContentBlock, WireEvent, WireUsage};
