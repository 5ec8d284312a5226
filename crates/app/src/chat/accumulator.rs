use quill_llm::{ContentChannel, StreamEvent};

use super::message::Message;

/// Applies one decoded stream event to a draft message in place.
///
/// Strictly append-only: thinking and answer text only ever grow, and no
/// reordering or validation happens here. `Stop` and `Error` carry lifecycle
/// meaning for the controller and leave the draft untouched; `Malformed` is
/// a no-op by contract.
pub fn apply_stream_event(message: &mut Message, event: &StreamEvent) {
    match event {
        StreamEvent::ContentDelta {
            channel: ContentChannel::Thinking,
            fragment,
        } => {
            message
                .thinking
                .get_or_insert_with(String::new)
                .push_str(fragment);
        }
        StreamEvent::ContentDelta {
            channel: ContentChannel::Text,
            fragment,
        } => {
            message.content.push_str(fragment);
        }
        StreamEvent::Usage(usage) => {
            // Latest report wins; the upstream resends cumulative counters.
            message.usage = Some(*usage);
        }
        StreamEvent::Malformed | StreamEvent::Stop | StreamEvent::Error { .. } => {}
    }
}

/// Pure fold variant of [`apply_stream_event`].
pub fn accumulate(mut message: Message, event: &StreamEvent) -> Message {
    apply_stream_event(&mut message, event);
    message
}
