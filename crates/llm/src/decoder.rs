use crate::wire::{TokenUsage, WireEvent};

/// Prefix marking lines that carry a payload record. Everything else on the
/// wire (`event: ...` lines, blank separators, keep-alive comments) is noise.
pub const DATA_LINE_PREFIX: &str = "data: ";

/// Which of the two concurrently-streamed content channels a fragment
/// belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentChannel {
    Thinking,
    Text,
}

/// One decoded unit of the incremental response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A fragment of assistant output on one channel.
    ContentDelta {
        channel: ContentChannel,
        fragment: String,
    },
    /// Token accounting for the turn; latest report wins.
    Usage(TokenUsage),
    /// The stream completed normally. No further records follow.
    Stop,
    /// A line failed to parse. Recovered locally; decoding continues.
    Malformed,
    /// The upstream reported a stream failure.
    Error { message: String },
}

/// Incremental line-oriented decoder for the upstream event stream.
///
/// Network reads may split one logical line across chunks or pack several
/// lines into one chunk; partial lines are buffered across `push_chunk`
/// calls and decoded only once complete. After a `Stop` record the decoder
/// latches and ignores everything that follows.
#[derive(Debug, Default)]
pub struct EventDecoder {
    line_buffer: Vec<u8>,
    stopped: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once a stream-end record has been decoded.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feeds one network read's worth of bytes, returning every event decoded
    /// from lines completed by this chunk, in wire order.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.stopped {
            return events;
        }

        self.line_buffer.extend_from_slice(chunk);

        while let Some(newline_at) = self.line_buffer.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.line_buffer.drain(..=newline_at).collect();
            self.decode_line(&line, &mut events);
            if self.stopped {
                // Defensive: drop anything buffered past the stop record.
                self.line_buffer.clear();
                break;
            }
        }

        events
    }

    fn decode_line(&mut self, line: &[u8], events: &mut Vec<StreamEvent>) {
        // Only complete lines reach this point, so lossy conversion can never
        // split a multi-byte character.
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\n', '\r']);

        let Some(payload) = line.strip_prefix(DATA_LINE_PREFIX) else {
            return;
        };

        match serde_json::from_str::<WireEvent>(payload) {
            Ok(record) => self.decode_record(record, events),
            Err(error) => {
                tracing::debug!(%error, "skipping malformed stream record");
                events.push(StreamEvent::Malformed);
            }
        }
    }

    fn decode_record(&mut self, record: WireEvent, events: &mut Vec<StreamEvent>) {
        match record {
            WireEvent::Start { .. } => {}
            WireEvent::Content { content } => {
                // One delta per block, preserving channel interleaving.
                for block in content {
                    let (channel, fragment) = if block.is_thinking() {
                        (ContentChannel::Thinking, block.thinking.unwrap_or_default())
                    } else {
                        (ContentChannel::Text, block.text)
                    };
                    events.push(StreamEvent::ContentDelta { channel, fragment });
                }
            }
            WireEvent::Usage { usage } => {
                events.push(StreamEvent::Usage(TokenUsage::from_wire(&usage)));
            }
            WireEvent::Error { message, .. } => {
                events.push(StreamEvent::Error { message });
            }
            WireEvent::MessageStop | WireEvent::Done => {
                self.stopped = true;
                events.push(StreamEvent::Stop);
            }
        }
    }
}
