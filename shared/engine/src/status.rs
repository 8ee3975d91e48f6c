//! Rolling status feed shown to spectators.

const DISPLAY_WINDOW: f64 = 5.0;

/// Time-windowed message buffer. Entries older than the display window are
/// dropped whenever the feed is rendered.
#[derive(Debug, Default)]
pub struct StatusFeed {
    entries: Vec<(f64, String)>,
}

impl StatusFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, now: f64, message: impl Into<String>) {
        let message = message.into();
        log::info!("status: {message}");
        self.entries.push((now, message));
    }

    /// Replace the whole feed with a single message.
    pub fn set(&mut self, now: f64, message: impl Into<String>) {
        self.entries.clear();
        self.add(now, message);
    }

    pub fn render(&mut self, now: f64) -> String {
        self.entries.retain(|(t, _)| now - *t < DISPLAY_WINDOW);
        let lines: Vec<&str> = self.entries.iter().map(|(_, m)| m.as_str()).collect();
        lines.join("\n")
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All messages currently buffered, newest last, without pruning.
    pub fn messages(&self) -> Vec<String> {
        self.entries.iter().map(|(_, m)| m.clone()).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_prunes_old_entries() {
        let mut feed = StatusFeed::new();
        feed.add(0.0, "first");
        feed.add(3.0, "second");
        assert_eq!(feed.render(4.0), "first\nsecond");
        assert_eq!(feed.render(6.0), "second");
        assert_eq!(feed.len(), 1);
        assert_eq!(feed.render(10.0), "");
        assert!(feed.is_empty());
    }

    #[test]
    fn test_set_replaces_feed() {
        let mut feed = StatusFeed::new();
        feed.add(0.0, "one");
        feed.add(0.0, "two");
        feed.set(1.0, "only");
        assert_eq!(feed.render(1.0), "only");
    }
}
