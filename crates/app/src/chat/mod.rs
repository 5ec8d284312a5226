/// Pure reducer folding decoded stream events into a message.
pub mod accumulator;
/// Submission orchestration and the stream lifecycle.
pub mod controller;
/// Domain entities and deterministic stream state boundaries.
pub mod message;
/// Follow-bottom policy for the transcript viewport.
pub mod scroll;
/// Index-keyed windowing with estimated and measured row heights.
pub mod transcript;

pub use accumulator::{accumulate, apply_stream_event};
pub use controller::{ChatController, ControllerEvent, STREAM_DEBOUNCE_MS, ThinkingTimer};
pub use message::{
    ConversationId, Message, Role, StreamSessionId, StreamState, StreamTarget, StreamTransition,
    StreamTransitionRejection, StreamTransitionResult,
};
pub use scroll::{AUTO_FOLLOW_RESUME_THRESHOLD, ScrollCoordinator};
pub use transcript::{TranscriptWindow, WINDOW_OVERDRAW_ROWS};
