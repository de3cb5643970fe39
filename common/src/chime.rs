use crate::timer::RecencyWindow;

pub const CHIME_HOLD_MS: u64 = 3_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChimeAction {
    RelayOn,
    RelayOff,
    PublishRing,
}

/// Relay state machine. The relay is on exactly while the hold window is
/// open; triggers during an active hold extend it without a second
/// publish.
#[derive(Debug, Clone)]
pub struct ChimeEngine {
    active: bool,
    hold: RecencyWindow,
}

impl ChimeEngine {
    pub fn new() -> Self {
        Self {
            active: false,
            hold: RecencyWindow::new(CHIME_HOLD_MS),
        }
    }

    pub fn trigger(&mut self, now_ms: u64) -> Vec<ChimeAction> {
        self.hold.mark(now_ms);
        if self.active {
            Vec::new()
        } else {
            self.active = true;
            vec![ChimeAction::RelayOn, ChimeAction::PublishRing]
        }
    }

    pub fn tick(&mut self, now_ms: u64) -> Vec<ChimeAction> {
        if self.active && !self.hold.is_open(now_ms) {
            self.active = false;
            vec![ChimeAction::RelayOff]
        } else {
            Vec::new()
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }
}

impl Default for ChimeEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_turns_relay_on_and_publishes_once() {
        let mut chime = ChimeEngine::new();

        let actions = chime.trigger(1_000);
        assert_eq!(actions, vec![ChimeAction::RelayOn, ChimeAction::PublishRing]);
        assert!(chime.is_active());
    }

    #[test]
    fn relay_releases_after_hold_elapses() {
        let mut chime = ChimeEngine::new();
        chime.trigger(1_000);

        assert_eq!(chime.tick(3_999), Vec::new());
        assert!(chime.is_active());

        assert_eq!(chime.tick(4_000), vec![ChimeAction::RelayOff]);
        assert!(!chime.is_active());

        // idempotent once released
        assert_eq!(chime.tick(5_000), Vec::new());
    }

    #[test]
    fn retrigger_extends_hold_without_republishing() {
        let mut chime = ChimeEngine::new();
        chime.trigger(0);

        let actions = chime.trigger(2_000);
        assert_eq!(actions, Vec::new());

        // window now runs from the second trigger
        assert_eq!(chime.tick(4_999), Vec::new());
        assert_eq!(chime.tick(5_000), vec![ChimeAction::RelayOff]);
    }

    #[test]
    fn tick_before_any_trigger_is_a_no_op() {
        let mut chime = ChimeEngine::new();
        assert_eq!(chime.tick(0), Vec::new());
        assert_eq!(chime.tick(10_000), Vec::new());
        assert!(!chime.is_active());
    }

    #[test]
    fn trigger_after_release_rings_again() {
        let mut chime = ChimeEngine::new();
        chime.trigger(0);
        chime.tick(3_000);

        let actions = chime.trigger(10_000);
        assert_eq!(actions, vec![ChimeAction::RelayOn, ChimeAction::PublishRing]);
    }
}
