use std::collections::VecDeque;

use thiserror::Error;

pub const EVENT_QUEUE_CAPACITY: usize = 16;

/// Actions requested from outside the control loop (HTTP handlers). Each
/// is consumed exactly once by the next loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    RemoteRing,
    Reboot,
    FactoryReset,
    StatusViewed,
}

#[derive(Debug, Error)]
#[error("control event queue full ({capacity} events)")]
pub struct QueueFull {
    pub capacity: usize,
}

/// Bounded FIFO between request handlers and the control loop.
#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<ControlEvent>,
    capacity: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: ControlEvent) -> Result<(), QueueFull> {
        if self.events.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        self.events.push_back(event);
        Ok(())
    }

    /// Takes every queued event, oldest first.
    pub fn drain(&mut self) -> Vec<ControlEvent> {
        self.events.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_drain_in_arrival_order() {
        let mut queue = EventQueue::new();
        queue.push(ControlEvent::RemoteRing).unwrap();
        queue.push(ControlEvent::StatusViewed).unwrap();
        queue.push(ControlEvent::Reboot).unwrap();

        assert_eq!(
            queue.drain(),
            vec![
                ControlEvent::RemoteRing,
                ControlEvent::StatusViewed,
                ControlEvent::Reboot,
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_consumes_each_event_once() {
        let mut queue = EventQueue::new();
        queue.push(ControlEvent::FactoryReset).unwrap();

        assert_eq!(queue.drain(), vec![ControlEvent::FactoryReset]);
        assert_eq!(queue.drain(), Vec::new());
    }

    #[test]
    fn push_fails_when_full() {
        let mut queue = EventQueue::with_capacity(2);
        queue.push(ControlEvent::RemoteRing).unwrap();
        queue.push(ControlEvent::RemoteRing).unwrap();

        let err = queue.push(ControlEvent::RemoteRing).unwrap_err();
        assert_eq!(err.capacity, 2);

        // existing events are untouched
        assert_eq!(queue.drain().len(), 2);
    }
}
