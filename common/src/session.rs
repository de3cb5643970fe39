use crate::timer::IntervalTimer;

pub const BROKER_RETRY_INTERVAL_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerSessionState {
    Disconnected,
    BackoffWait,
    Connected,
}

/// Gates broker connect attempts: never while connected, never while the
/// network link is down, and at most one attempt per retry interval.
#[derive(Debug, Clone)]
pub struct BrokerSession {
    connected: bool,
    attempt_gate: IntervalTimer,
}

impl BrokerSession {
    pub fn new() -> Self {
        Self {
            connected: false,
            attempt_gate: IntervalTimer::new(BROKER_RETRY_INTERVAL_MS),
        }
    }

    pub fn note_connected(&mut self) {
        self.connected = true;
    }

    pub fn note_disconnected(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True when a connect attempt should happen this iteration. A true
    /// return counts as the attempt and restarts the retry spacing.
    pub fn should_attempt(&mut self, now_ms: u64, link_associated: bool) -> bool {
        if self.connected || !link_associated {
            return false;
        }
        self.attempt_gate.poll(now_ms)
    }

    pub fn state(&self, now_ms: u64) -> BrokerSessionState {
        if self.connected {
            BrokerSessionState::Connected
        } else if self.attempt_gate.has_fired() && !self.attempt_gate.is_due(now_ms) {
            BrokerSessionState::BackoffWait
        } else {
            BrokerSessionState::Disconnected
        }
    }
}

impl Default for BrokerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_are_spaced_by_retry_interval() {
        let mut session = BrokerSession::new();

        assert!(session.should_attempt(0, true));
        assert!(!session.should_attempt(500, true));
        assert!(!session.should_attempt(1_999, true));
        assert!(session.should_attempt(2_000, true));
    }

    #[test]
    fn no_attempt_without_link() {
        let mut session = BrokerSession::new();

        assert!(!session.should_attempt(0, false));
        assert!(!session.should_attempt(10_000, false));

        // first attempt happens as soon as the link is back
        assert!(session.should_attempt(10_001, true));
    }

    #[test]
    fn no_attempt_while_connected() {
        let mut session = BrokerSession::new();
        assert!(session.should_attempt(0, true));
        session.note_connected();

        assert!(!session.should_attempt(5_000, true));
        assert_eq!(session.state(5_000), BrokerSessionState::Connected);
    }

    #[test]
    fn disconnect_resumes_gated_attempts() {
        let mut session = BrokerSession::new();
        assert!(session.should_attempt(0, true));
        session.note_connected();
        session.note_disconnected();

        // spacing from the last attempt still applies
        assert!(!session.should_attempt(1_000, true));
        assert!(session.should_attempt(2_000, true));
    }

    #[test]
    fn state_reflects_backoff_wait() {
        let mut session = BrokerSession::new();
        assert_eq!(session.state(0), BrokerSessionState::Disconnected);

        assert!(session.should_attempt(0, true));
        assert_eq!(session.state(1_000), BrokerSessionState::BackoffWait);
        assert_eq!(session.state(2_000), BrokerSessionState::Disconnected);
    }
}
