//! Render-ready view over one log stream plus its follow-the-live-edge
//! scroll policy.
//!
//! Heights and offsets are in rendered lines. The view learns the content
//! height from the renderer through [`FeedView::measure`], since wrapping is
//! only known at draw time.

use crate::LogEntry;

/// Distance from the bottom, in lines, under which the viewer counts as
/// sitting on the live edge.
pub const DEFAULT_FOLLOW_THRESHOLD: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollViewport {
    pub offset: usize,
    pub content_height: usize,
    pub viewport_height: usize,
}

impl ScrollViewport {
    pub fn max_offset(&self) -> usize {
        self.content_height.saturating_sub(self.viewport_height)
    }

    pub fn distance_from_bottom(&self) -> usize {
        self.content_height
            .saturating_sub(self.offset.saturating_add(self.viewport_height))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileOutcome {
    pub added: usize,
    /// The stream shrank, which only happens when a new run replaced it.
    pub reset: bool,
}

#[derive(Debug, Clone)]
pub struct FeedView {
    entries: Vec<LogEntry>,
    total: usize,
    auto_scroll: bool,
    follow_pending: bool,
    viewport: ScrollViewport,
    threshold: usize,
}

impl Default for FeedView {
    fn default() -> Self {
        Self::new(DEFAULT_FOLLOW_THRESHOLD)
    }
}

impl FeedView {
    pub fn new(threshold: usize) -> Self {
        Self {
            entries: Vec::new(),
            total: 0,
            auto_scroll: true,
            follow_pending: false,
            viewport: ScrollViewport::default(),
            threshold,
        }
    }

    /// Rendered entries in server order, `System` lines removed.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Size of the underlying stream, `System` lines included.
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll
    }

    pub fn viewport(&self) -> ScrollViewport {
        self.viewport
    }

    pub fn scroll_offset(&self) -> usize {
        self.viewport.offset
    }

    pub fn reconcile(&mut self, raw: &[LogEntry]) -> ReconcileOutcome {
        self.total = raw.len();
        let next: Vec<LogEntry> = raw.iter().filter(|entry| !entry.is_system()).cloned().collect();
        if next == self.entries {
            return ReconcileOutcome::default();
        }

        let previous = self.entries.len();
        let outcome = if next.len() < previous {
            ReconcileOutcome {
                added: 0,
                reset: true,
            }
        } else {
            ReconcileOutcome {
                added: next.len() - previous,
                reset: false,
            }
        };
        self.entries = next;

        if outcome.reset {
            self.viewport.offset = 0;
            self.auto_scroll = true;
            self.follow_pending = !self.entries.is_empty();
        } else if outcome.added > 0 && self.auto_scroll {
            self.follow_pending = true;
        }
        outcome
    }

    /// Called by the renderer with the freshly wrapped content height. Moves
    /// to the bottom when a reconcile asked to follow; otherwise only clamps.
    pub fn measure(&mut self, content_height: usize, viewport_height: usize) -> usize {
        self.viewport.content_height = content_height;
        self.viewport.viewport_height = viewport_height;
        if self.follow_pending {
            self.viewport.offset = self.viewport.max_offset();
            self.follow_pending = false;
        } else {
            self.viewport.offset = self.viewport.offset.min(self.viewport.max_offset());
        }
        self.viewport.offset
    }

    /// Manual scroll event: adopt the new position and recompute whether the
    /// viewer still follows the live edge.
    pub fn on_scroll(&mut self, viewport: ScrollViewport) {
        self.viewport = viewport;
        self.auto_scroll = viewport.distance_from_bottom() < self.threshold;
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let mut viewport = self.viewport;
        viewport.offset = if delta < 0 {
            viewport.offset.saturating_sub(delta.unsigned_abs())
        } else {
            viewport
                .offset
                .saturating_add(delta.unsigned_abs())
                .min(viewport.max_offset())
        };
        self.on_scroll(viewport);
    }

    pub fn scroll_to_top(&mut self) {
        let mut viewport = self.viewport;
        viewport.offset = 0;
        self.on_scroll(viewport);
    }

    pub fn scroll_to_bottom(&mut self) {
        let mut viewport = self.viewport;
        viewport.offset = viewport.max_offset();
        self.on_scroll(viewport);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SYSTEM_ROLE;

    fn lines(count: usize) -> Vec<LogEntry> {
        (0..count)
            .map(|idx| LogEntry::new(format!("agent-{idx}"), "Citizen", format!("message {idx}")))
            .collect()
    }

    fn settled(count: usize, viewport_height: usize) -> FeedView {
        let mut feed = FeedView::new(2);
        feed.reconcile(&lines(count));
        feed.measure(count, viewport_height);
        feed
    }

    #[test]
    fn system_lines_are_hidden_but_counted() {
        let mut raw = lines(2);
        raw.insert(1, LogEntry::new("System", SYSTEM_ROLE, "--- Iteration 1/3 ---"));
        let mut feed = FeedView::default();
        let outcome = feed.reconcile(&raw);

        assert_eq!(outcome.added, 2);
        assert_eq!(feed.total(), 3);
        let agents: Vec<&str> = feed.entries().iter().map(|e| e.agent.as_str()).collect();
        assert_eq!(agents, vec!["agent-0", "agent-1"]);
    }

    #[test]
    fn follows_new_entries_while_at_live_edge() {
        let mut feed = settled(30, 10);
        assert_eq!(feed.scroll_offset(), 20);

        feed.scroll_by(-1);
        assert!(feed.auto_scroll());

        feed.reconcile(&lines(35));
        let offset = feed.measure(35, 10);
        assert_eq!(offset, 25);
    }

    #[test]
    fn leaves_viewport_alone_after_scrolling_up() {
        let mut feed = settled(30, 10);
        feed.scroll_by(-8);
        assert!(!feed.auto_scroll());
        assert_eq!(feed.scroll_offset(), 12);

        feed.reconcile(&lines(40));
        let offset = feed.measure(40, 10);
        assert_eq!(offset, 12);
    }

    #[test]
    fn returning_to_bottom_resumes_following() {
        let mut feed = settled(30, 10);
        feed.scroll_by(-8);
        feed.scroll_to_bottom();
        assert!(feed.auto_scroll());

        feed.reconcile(&lines(31));
        assert_eq!(feed.measure(31, 10), 21);
    }

    #[test]
    fn identical_resync_is_not_an_addition() {
        let mut feed = settled(5, 10);
        let outcome = feed.reconcile(&lines(5));
        assert_eq!(outcome, ReconcileOutcome::default());
    }

    #[test]
    fn shrinking_stream_resets_feed() {
        let mut feed = settled(30, 10);
        feed.scroll_by(-10);
        let outcome = feed.reconcile(&[]);
        assert!(outcome.reset);
        assert!(feed.entries().is_empty());
        assert!(feed.auto_scroll());
        assert_eq!(feed.measure(0, 10), 0);
    }

    #[test]
    fn independent_feeds_keep_their_own_scroll_state() {
        let mut citizens = settled(30, 10);
        let mut senate = settled(30, 10);
        citizens.scroll_by(-15);

        citizens.reconcile(&lines(32));
        senate.reconcile(&lines(32));
        assert_eq!(citizens.measure(32, 10), 5);
        assert_eq!(senate.measure(32, 10), 22);
    }
}
