/// Near-bottom distance used to resume follow mode deterministically.
pub const AUTO_FOLLOW_RESUME_THRESHOLD: f32 = 24.0;

/// Decides whether content growth may move the viewport.
///
/// Offsets measure the distance from the content top to the viewport top, in
/// the same units the transcript window estimates heights in. The coordinator
/// never touches the message list; it only observes extents and user scrolls.
///
/// The pending scroll-to-end action is a single slot: rapid growth bursts
/// coalesce into one action, a newer request supersedes an unconsumed one,
/// and a user scroll away from the tail cancels it.
#[derive(Debug, Clone)]
pub struct ScrollCoordinator {
    scroll_offset: f32,
    viewport_extent: f32,
    content_extent: f32,
    follow_bottom: bool,
    pending_scroll_to_bottom: bool,
}

impl ScrollCoordinator {
    pub fn new(viewport_extent: f32) -> Self {
        Self {
            scroll_offset: 0.0,
            viewport_extent,
            content_extent: 0.0,
            follow_bottom: true,
            pending_scroll_to_bottom: false,
        }
    }

    pub fn scroll_offset(&self) -> f32 {
        self.scroll_offset
    }

    pub fn viewport_extent(&self) -> f32 {
        self.viewport_extent
    }

    pub fn is_following_bottom(&self) -> bool {
        self.follow_bottom
    }

    /// True when the gap between the viewport end and the content end is
    /// within the resume threshold. An underfull viewport is always at
    /// bottom.
    pub fn is_at_bottom(&self) -> bool {
        self.max_offset() - self.scroll_offset <= AUTO_FOLLOW_RESUME_THRESHOLD
    }

    pub fn set_viewport_extent(&mut self, viewport_extent: f32) {
        self.viewport_extent = viewport_extent.max(0.0);
        self.scroll_offset = self.scroll_offset.min(self.max_offset());
    }

    /// A user-initiated scroll. Recomputes follow state: scrolling away from
    /// the tail pauses following (and cancels any pending scroll action);
    /// returning within the threshold resumes it.
    pub fn handle_user_scroll(&mut self, offset: f32) {
        self.scroll_offset = offset.clamp(0.0, self.max_offset());
        self.follow_bottom = self.is_at_bottom();
        if !self.follow_bottom {
            self.pending_scroll_to_bottom = false;
        }
    }

    /// Programmatic content growth. Schedules one coalesced scroll-to-end
    /// only if the view was following the tail immediately prior; growth must
    /// never fight a user who scrolled up to read.
    pub fn handle_content_growth(&mut self, content_extent: f32) {
        let was_following = self.follow_bottom;
        self.content_extent = content_extent.max(0.0);
        if was_following {
            self.pending_scroll_to_bottom = true;
        } else {
            self.scroll_offset = self.scroll_offset.min(self.max_offset());
        }
    }

    /// Re-measurement above the viewport shifts the content under the
    /// reader; compensate so the visual position is preserved.
    pub fn adjust_for_remeasure(&mut self, extent_delta: f32, new_content_extent: f32) {
        self.content_extent = new_content_extent.max(0.0);
        if !self.follow_bottom {
            self.scroll_offset = (self.scroll_offset + extent_delta).clamp(0.0, self.max_offset());
        }
    }

    /// Explicit jump to the tail, e.g. after switching sessions.
    pub fn request_scroll_to_bottom(&mut self) {
        self.follow_bottom = true;
        self.pending_scroll_to_bottom = true;
    }

    pub fn reset(&mut self, content_extent: f32) {
        self.content_extent = content_extent.max(0.0);
        self.scroll_offset = 0.0;
        self.follow_bottom = true;
        self.pending_scroll_to_bottom = true;
    }

    /// Consumes the pending scroll action at the next render opportunity.
    /// Returns the new offset when an action fired.
    pub fn take_pending_scroll(&mut self) -> Option<f32> {
        if !self.pending_scroll_to_bottom {
            return None;
        }
        self.pending_scroll_to_bottom = false;
        self.scroll_offset = self.max_offset();
        Some(self.scroll_offset)
    }

    fn max_offset(&self) -> f32 {
        (self.content_extent - self.viewport_extent).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_while_following_coalesces_into_one_scroll_action() {
        let mut scroll = ScrollCoordinator::new(100.0);
        scroll.handle_content_growth(150.0);
        scroll.handle_content_growth(180.0);
        scroll.handle_content_growth(240.0);

        assert_eq!(scroll.take_pending_scroll(), Some(140.0));
        assert_eq!(scroll.take_pending_scroll(), None, "slot must be drained");
    }

    #[test]
    fn growth_after_scrolling_away_produces_zero_scroll_actions() {
        let mut scroll = ScrollCoordinator::new(100.0);
        scroll.handle_content_growth(500.0);
        let _ = scroll.take_pending_scroll();

        // Reader scrolls well above the tail.
        scroll.handle_user_scroll(100.0);
        assert!(!scroll.is_following_bottom());

        for extent in [600.0, 700.0, 800.0] {
            scroll.handle_content_growth(extent);
            assert_eq!(scroll.take_pending_scroll(), None);
        }
        assert_eq!(scroll.scroll_offset(), 100.0, "view must not move");
    }

    #[test]
    fn user_scroll_away_cancels_a_pending_action() {
        let mut scroll = ScrollCoordinator::new(100.0);
        scroll.handle_content_growth(500.0);
        scroll.handle_user_scroll(0.0);
        assert_eq!(scroll.take_pending_scroll(), None);
    }

    #[test]
    fn returning_near_the_bottom_resumes_follow_mode() {
        let mut scroll = ScrollCoordinator::new(100.0);
        scroll.handle_content_growth(500.0);
        let _ = scroll.take_pending_scroll();

        scroll.handle_user_scroll(50.0);
        assert!(!scroll.is_following_bottom());

        // Back within the resume threshold of the tail.
        scroll.handle_user_scroll(390.0);
        assert!(scroll.is_following_bottom());

        scroll.handle_content_growth(600.0);
        assert_eq!(scroll.take_pending_scroll(), Some(500.0));
    }

    #[test]
    fn underfull_viewport_counts_as_at_bottom() {
        let scroll = ScrollCoordinator::new(100.0);
        assert!(scroll.is_at_bottom());
        assert!(scroll.is_following_bottom());
    }

    #[test]
    fn remeasure_above_viewport_preserves_the_reading_position() {
        let mut scroll = ScrollCoordinator::new(100.0);
        scroll.handle_content_growth(500.0);
        let _ = scroll.take_pending_scroll();
        scroll.handle_user_scroll(200.0);

        // A row above the viewport measured 30 units taller.
        scroll.adjust_for_remeasure(30.0, 530.0);
        assert_eq!(scroll.scroll_offset(), 230.0);
    }

    #[test]
    fn reset_rearms_follow_mode_for_a_fresh_transcript() {
        let mut scroll = ScrollCoordinator::new(100.0);
        scroll.handle_content_growth(500.0);
        let _ = scroll.take_pending_scroll();
        scroll.handle_user_scroll(10.0);

        scroll.reset(300.0);
        assert!(scroll.is_following_bottom());
        assert_eq!(scroll.take_pending_scroll(), Some(200.0));
    }
}
