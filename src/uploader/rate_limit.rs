//! Rolling message window.
//!
//! The remote service allows at most `limit` messages per window. Every file
//! in a group counts as one message, and every attempt counts, retries
//! included.

use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateWindow {
    started_at: Instant,
    sent: usize,
    limit: usize,
    window: Duration,
}

impl RateWindow {
    pub fn new(limit: usize, window: Duration, now: Instant) -> Self {
        Self {
            started_at: now,
            sent: 0,
            limit,
            window,
        }
    }

    pub fn sent_in_window(&self) -> usize {
        self.sent
    }

    /// Account for `messages` about to be sent at `now`.
    ///
    /// Returns how long the caller has to pause first. When the window is
    /// full a new one starts at the end of that pause (or immediately when
    /// the old window has already elapsed).
    pub fn reserve(&mut self, messages: usize, now: Instant) -> Option<Duration> {
        let mut pause = None;

        if self.sent + messages > self.limit {
            let elapsed = now.saturating_duration_since(self.started_at);
            let wait = self.window.saturating_sub(elapsed);

            self.started_at = now + wait;
            self.sent = 0;

            if !wait.is_zero() {
                pause = Some(wait);
            }
        }

        self.sent += messages;
        pause
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(61_000);

    #[test]
    fn test_no_pause_under_limit() {
        let start = Instant::now();
        let mut window = RateWindow::new(20, WINDOW, start);

        for _ in 0..2 {
            assert_eq!(window.reserve(10, start), None);
        }
        assert_eq!(window.sent_in_window(), 20);
    }

    #[test]
    fn test_single_pause_before_twenty_first_message() {
        let start = Instant::now();
        let mut window = RateWindow::new(20, WINDOW, start);

        let pauses: Vec<(usize, Duration)> = (0..25)
            .filter_map(|i| window.reserve(1, start).map(|p| (i, p)))
            .collect();

        assert_eq!(pauses, vec![(20, WINDOW)]);
        assert_eq!(window.sent_in_window(), 5);
    }

    #[test]
    fn test_pause_shrinks_with_elapsed_time() {
        let start = Instant::now();
        let mut window = RateWindow::new(20, WINDOW, start);
        window.reserve(15, start);

        let later = start + Duration::from_millis(40_000);
        assert_eq!(
            window.reserve(10, later),
            Some(Duration::from_millis(21_000))
        );
        assert_eq!(window.sent_in_window(), 10);
    }

    #[test]
    fn test_elapsed_window_resets_without_pause() {
        let start = Instant::now();
        let mut window = RateWindow::new(20, WINDOW, start);
        window.reserve(20, start);

        let later = start + Duration::from_millis(70_000);
        assert_eq!(window.reserve(10, later), None);
        assert_eq!(window.sent_in_window(), 10);

        // The new window began at `later`
        assert_eq!(
            window.reserve(15, later + Duration::from_millis(1_000)),
            Some(Duration::from_millis(60_000))
        );
    }
}
