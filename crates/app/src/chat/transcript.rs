use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;
use std::ops::Range;

use quill_storage::{MessageRecord, MessageRole};

pub const DEFAULT_CONTENT_WIDTH: f32 = 680.0;
pub const ESTIMATED_TEXT_LINE_HEIGHT: f32 = 18.0;
pub const ESTIMATED_CHAR_WIDTH: f32 = 7.0;
/// Rows kept rendered on each side of the visible range.
pub const WINDOW_OVERDRAW_ROWS: usize = 4;

#[derive(Debug, Clone, Copy)]
struct RowSlot {
    layout_hash: u64,
    height: f32,
    measured: bool,
}

/// Windowed view over a transcript: rows are keyed by index, sized by a
/// character-count estimate until real layout reports a measurement, and
/// only the visible-plus-margin range is meant to be rendered.
#[derive(Debug, Clone)]
pub struct TranscriptWindow {
    content_width: f32,
    rows: Vec<RowSlot>,
}

impl TranscriptWindow {
    pub fn new(content_width: f32) -> Self {
        Self {
            content_width: content_width.max(1.0),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rebuilds row slots from the message snapshot. Slots whose content is
    /// unchanged keep their measured height; mutated rows fall back to the
    /// estimate until re-measured.
    pub fn sync_rows(&mut self, messages: &[MessageRecord]) {
        let mut rows = Vec::with_capacity(messages.len());
        for (index, message) in messages.iter().enumerate() {
            let next_hash = layout_hash(message);
            let slot = match self.rows.get(index) {
                Some(existing) if existing.layout_hash == next_hash => *existing,
                _ => RowSlot {
                    layout_hash: next_hash,
                    height: estimate_row_height(message, self.content_width),
                    measured: false,
                },
            };
            rows.push(slot);
        }
        self.rows = rows;
    }

    pub fn total_extent(&self) -> f32 {
        self.rows.iter().map(|row| row.height).sum()
    }

    /// Distance from the content top to the top of `index`.
    pub fn offset_of(&self, index: usize) -> f32 {
        self.rows[..index.min(self.rows.len())]
            .iter()
            .map(|row| row.height)
            .sum()
    }

    pub fn row_height(&self, index: usize) -> Option<f32> {
        self.rows.get(index).map(|row| row.height)
    }

    /// The bounded index range to render for the given viewport, padded by
    /// the overdraw margin on both sides.
    pub fn visible_range(&self, scroll_offset: f32, viewport_extent: f32) -> Range<usize> {
        if self.rows.is_empty() {
            return 0..0;
        }

        let viewport_top = scroll_offset.max(0.0);
        let viewport_bottom = viewport_top + viewport_extent.max(0.0);

        let mut first = self.rows.len();
        let mut last = 0;
        let mut cursor = 0.0;
        for (index, row) in self.rows.iter().enumerate() {
            let row_bottom = cursor + row.height;
            if row_bottom > viewport_top && cursor < viewport_bottom {
                first = first.min(index);
                last = index + 1;
            }
            cursor = row_bottom;
            if cursor >= viewport_bottom {
                break;
            }
        }

        if first >= last {
            // Offset past the content end; show the tail.
            let start = self.rows.len().saturating_sub(1);
            return start.saturating_sub(WINDOW_OVERDRAW_ROWS)..self.rows.len();
        }

        first.saturating_sub(WINDOW_OVERDRAW_ROWS)..(last + WINDOW_OVERDRAW_ROWS).min(self.rows.len())
    }

    /// Records a real layout measurement for one row and returns the extent
    /// delta it introduced, so the caller can keep the scroll anchor stable.
    pub fn record_measured(&mut self, index: usize, height: f32) -> f32 {
        let Some(row) = self.rows.get_mut(index) else {
            return 0.0;
        };
        let delta = height - row.height;
        row.height = height;
        row.measured = true;
        delta
    }

    pub fn is_measured(&self, index: usize) -> bool {
        self.rows.get(index).is_some_and(|row| row.measured)
    }
}

impl Default for TranscriptWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CONTENT_WIDTH)
    }
}

fn layout_hash(message: &MessageRecord) -> u64 {
    let mut hasher = DefaultHasher::new();

    let role_tag = match message.role {
        MessageRole::User => 0u8,
        MessageRole::Assistant => 1u8,
    };
    hasher.write_u8(role_tag);
    hasher.write(message.content.as_bytes());
    if let Some(thinking) = &message.thinking {
        hasher.write_u8(1);
        hasher.write(thinking.as_bytes());
    }
    hasher.finish()
}

fn estimate_row_height(message: &MessageRecord, content_width: f32) -> f32 {
    let mut height = estimate_text_height(&message.content, content_width);
    if let Some(thinking) = &message.thinking {
        height += estimate_text_height(thinking, content_width);
    }
    height
}

fn estimate_text_height(content: &str, width: f32) -> f32 {
    if content.is_empty() {
        return ESTIMATED_TEXT_LINE_HEIGHT;
    }

    let chars_per_line = (width / ESTIMATED_CHAR_WIDTH).floor().max(1.0) as usize;

    let mut line_count = 0usize;
    for line in content.lines() {
        let char_count = line.chars().count().max(1);
        line_count += char_count.div_ceil(chars_per_line);
    }

    // Account for the trailing empty line when content ends with a newline.
    if content.ends_with('\n') {
        line_count += 1;
    }

    ESTIMATED_TEXT_LINE_HEIGHT * line_count.max(1) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_messages(count: usize) -> Vec<MessageRecord> {
        (0..count)
            .map(|index| {
                if index % 2 == 0 {
                    MessageRecord::user(format!("message-{index}: windowing fixture payload"))
                } else {
                    let mut reply = MessageRecord::assistant_placeholder();
                    reply.content = format!("reply-{index}: windowing fixture payload");
                    reply
                }
            })
            .collect()
    }

    #[test]
    fn large_history_keeps_row_metrics_deterministic() {
        let mut messages = fixture_messages(2_000);
        let mut window = TranscriptWindow::default();
        window.sync_rows(&messages);

        let heights_before: Vec<f32> = (0..window.len())
            .map(|index| window.row_height(index).expect("height"))
            .collect();
        assert_eq!(heights_before.len(), 2_000);
        assert!(heights_before.iter().all(|height| *height > 0.0));

        // Tail-only mutation must leave every other row's slot untouched.
        messages
            .last_mut()
            .expect("last")
            .content
            .push_str(" [finalized]");
        window.sync_rows(&messages);

        for index in 0..1_999 {
            assert_eq!(
                window.row_height(index).expect("height"),
                heights_before[index]
            );
        }
    }

    #[test]
    fn visible_range_is_bounded_by_the_viewport_plus_margin() {
        let messages = fixture_messages(1_000);
        let mut window = TranscriptWindow::default();
        window.sync_rows(&messages);

        let range = window.visible_range(0.0, 200.0);
        assert!(range.start == 0);
        assert!(
            range.len() <= 200.0 as usize / ESTIMATED_TEXT_LINE_HEIGHT as usize
                + 2 * WINDOW_OVERDRAW_ROWS
                + 2,
            "range {range:?} must stay near the viewport"
        );
        assert!(range.len() < 100, "windowing must not render everything");
    }

    #[test]
    fn visible_range_tracks_the_scroll_offset() {
        let messages = fixture_messages(1_000);
        let mut window = TranscriptWindow::default();
        window.sync_rows(&messages);

        let middle_offset = window.offset_of(500);
        let range = window.visible_range(middle_offset, 200.0);
        assert!(range.contains(&500));
        assert!(range.start >= 500 - WINDOW_OVERDRAW_ROWS - 1);
    }

    #[test]
    fn offset_past_the_end_falls_back_to_the_tail() {
        let messages = fixture_messages(50);
        let mut window = TranscriptWindow::default();
        window.sync_rows(&messages);

        let range = window.visible_range(window.total_extent() + 100.0, 200.0);
        assert_eq!(range.end, 50);
        assert!(!range.is_empty());
    }

    #[test]
    fn estimation_fallback_yields_to_real_measurement() {
        let messages = fixture_messages(10);
        let mut window = TranscriptWindow::default();
        window.sync_rows(&messages);

        assert!(!window.is_measured(3));
        let estimated = window.row_height(3).expect("height");
        let delta = window.record_measured(3, estimated + 42.0);
        assert_eq!(delta, 42.0);
        assert!(window.is_measured(3));
        assert_eq!(window.row_height(3), Some(estimated + 42.0));
    }

    #[test]
    fn unchanged_rows_keep_measurements_across_sync() {
        let messages = fixture_messages(10);
        let mut window = TranscriptWindow::default();
        window.sync_rows(&messages);
        window.record_measured(2, 99.0);

        window.sync_rows(&messages);
        assert!(window.is_measured(2));
        assert_eq!(window.row_height(2), Some(99.0));

        // Mutating the row invalidates its measurement.
        let mut mutated = messages.clone();
        mutated[2].content.push('!');
        window.sync_rows(&mutated);
        assert!(!window.is_measured(2));
    }

    #[test]
    fn thinking_text_contributes_to_the_estimate() {
        let mut with_thinking = MessageRecord::assistant_placeholder();
        with_thinking.content = "short".to_string();
        with_thinking.thinking = Some("a much longer reasoning trace\nacross lines".to_string());

        let mut without = with_thinking.clone();
        without.thinking = None;

        let mut window = TranscriptWindow::default();
        window.sync_rows(std::slice::from_ref(&with_thinking));
        let tall = window.total_extent();
        window.sync_rows(std::slice::from_ref(&without));
        let short = window.total_extent();
        assert!(tall > short);
    }
}
