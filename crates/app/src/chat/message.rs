use quill_llm::TokenUsage;
use uuid::Uuid;

/// Chat-domain conversation identity. Converted to storage and provider ids
/// at the crate boundaries so each layer keeps its own vocabulary.
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

/// Chat speaker role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

/// One chat turn. `content` is the answer channel; `thinking` is the
/// reasoning channel, present only once a thinking delta has arrived. Both
/// are append-only while a stream is live; the role never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub thinking: Option<String>,
    pub usage: Option<TokenUsage>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            thinking: None,
            usage: None,
        }
    }

    /// Empty assistant draft reserving the response slot before the first
    /// byte arrives.
    pub fn assistant_draft() -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            thinking: None,
            usage: None,
        }
    }
}

/// Stream lifecycle boundary for one submission.
///
/// `Submitting` covers the window between transcript mutation (user turn +
/// placeholder) and the provider stream opening; everything after follows the
/// `Streaming -> terminal -> Idle` shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Submitting(StreamTarget),
    Streaming(StreamTarget),
    Done(StreamTarget),
    Error {
        target: StreamTarget,
        message: String,
    },
    Cancelled(StreamTarget),
}

/// State transition input for the stream lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransition {
    Submit(StreamTarget),
    Opened(StreamTarget),
    Complete(StreamTarget),
    Fail {
        target: StreamTarget,
        message: String,
    },
    Cancel(StreamTarget),
    ResetToIdle,
}

/// Rejection reason for illegal stream transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTransitionRejection {
    AlreadyStreaming {
        active: StreamTarget,
        attempted: StreamTarget,
    },
    NoActiveStream,
    SessionMismatch {
        active: StreamTarget,
        attempted: StreamTarget,
    },
}

pub type StreamTransitionResult = Result<StreamState, StreamTransitionRejection>;

impl StreamState {
    /// Returns the in-flight target while a submission is submitting or
    /// streaming.
    pub fn active_target(&self) -> Option<StreamTarget> {
        match self {
            Self::Submitting(target) | Self::Streaming(target) => Some(*target),
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => None,
        }
    }

    /// Returns true when incoming stream data matches the active session.
    pub fn accepts_stream_event(&self, target: StreamTarget) -> bool {
        matches!(self, Self::Streaming(active) if *active == target)
    }

    /// Applies one transition deterministically.
    ///
    /// A submit is legal from any settled state. Every later transition
    /// (`Opened`/`Complete`/`Fail`/`Cancel`) must match the in-flight target
    /// exactly.
    pub fn apply(&self, transition: StreamTransition) -> StreamTransitionResult {
        match transition {
            StreamTransition::Submit(target) => self.apply_submit(target),
            StreamTransition::Opened(target) => self.apply_opened(target),
            StreamTransition::Complete(target) => self.apply_complete(target),
            StreamTransition::Fail { target, message } => self.apply_fail(target, message),
            StreamTransition::Cancel(target) => self.apply_cancel(target),
            StreamTransition::ResetToIdle => Ok(Self::Idle),
        }
    }

    fn apply_submit(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Submitting(active) | Self::Streaming(active) => {
                Err(StreamTransitionRejection::AlreadyStreaming {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Ok(Self::Submitting(target))
            }
        }
    }

    fn apply_opened(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Submitting(active) if *active == target => Ok(Self::Streaming(target)),
            Self::Submitting(active) | Self::Streaming(active) => {
                Err(StreamTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }

    fn apply_complete(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Streaming(active) if *active == target => Ok(Self::Done(target)),
            Self::Submitting(active) | Self::Streaming(active) => {
                Err(StreamTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }

    fn apply_fail(&self, target: StreamTarget, message: String) -> StreamTransitionResult {
        match self {
            Self::Submitting(active) | Self::Streaming(active) if *active == target => {
                Ok(Self::Error { target, message })
            }
            Self::Submitting(active) | Self::Streaming(active) => {
                Err(StreamTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }

    fn apply_cancel(&self, target: StreamTarget) -> StreamTransitionResult {
        match self {
            Self::Submitting(active) | Self::Streaming(active) if *active == target => {
                Ok(Self::Cancelled(target))
            }
            Self::Submitting(active) | Self::Streaming(active) => {
                Err(StreamTransitionRejection::SessionMismatch {
                    active: *active,
                    attempted: target,
                })
            }
            Self::Idle | Self::Done(_) | Self::Error { .. } | Self::Cancelled(_) => {
                Err(StreamTransitionRejection::NoActiveStream)
            }
        }
    }
}
