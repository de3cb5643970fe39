#[derive(Debug, Clone)]
pub struct IntervalTimer {
    interval_ms: u64,
    last_fired_ms: Option<u64>,
}

impl IntervalTimer {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_fired_ms: None,
        }
    }

    /// Due immediately on the first poll, then once per elapsed interval.
    pub fn is_due(&self, now_ms: u64) -> bool {
        match self.last_fired_ms {
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
            None => true,
        }
    }

    pub fn poll(&mut self, now_ms: u64) -> bool {
        if self.is_due(now_ms) {
            self.last_fired_ms = Some(now_ms);
            true
        } else {
            false
        }
    }

    pub fn has_fired(&self) -> bool {
        self.last_fired_ms.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct RecencyWindow {
    window_ms: u64,
    opened_ms: Option<u64>,
}

impl RecencyWindow {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            opened_ms: None,
        }
    }

    /// Re-marking while open extends the window from the new timestamp.
    pub fn mark(&mut self, now_ms: u64) {
        self.opened_ms = Some(now_ms);
    }

    pub fn is_open(&self, now_ms: u64) -> bool {
        match self.opened_ms {
            Some(opened) => now_ms.saturating_sub(opened) < self.window_ms,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_timer_fires_immediately_then_respects_spacing() {
        let mut timer = IntervalTimer::new(2_000);

        assert!(timer.poll(100));
        assert!(!timer.poll(100));
        assert!(!timer.poll(2_099));
        assert!(timer.poll(2_100));
        assert!(!timer.poll(2_101));
    }

    #[test]
    fn interval_timer_is_due_does_not_record() {
        let mut timer = IntervalTimer::new(500);

        assert!(timer.is_due(0));
        assert!(!timer.has_fired());

        assert!(timer.poll(0));
        assert!(timer.has_fired());
        assert!(!timer.is_due(499));
        assert!(timer.is_due(500));
    }

    #[test]
    fn interval_timer_tolerates_clock_regression() {
        let mut timer = IntervalTimer::new(1_000);
        assert!(timer.poll(5_000));

        // saturating elapsed math: an earlier timestamp is not due
        assert!(!timer.poll(4_000));
        assert!(timer.poll(6_000));
    }

    #[test]
    fn recency_window_opens_and_expires() {
        let mut window = RecencyWindow::new(3_000);

        assert!(!window.is_open(0));
        window.mark(1_000);
        assert!(window.is_open(1_000));
        assert!(window.is_open(3_999));
        assert!(!window.is_open(4_000));
    }

    #[test]
    fn recency_window_remark_extends() {
        let mut window = RecencyWindow::new(3_000);

        window.mark(0);
        window.mark(2_500);
        assert!(window.is_open(4_999));
        assert!(!window.is_open(5_500));
    }
}
