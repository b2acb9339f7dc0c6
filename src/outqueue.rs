//! Priority out-queues with anti-flood draining.
//!
//! Three FIFOs per server: immediate (bypasses flood control), high
//! (user-initiated) and low (automatic replies). One drain pass empties
//! the immediate queue, then sends a single high- or low-priority
//! message (high first); the anti-flood timer repeats the pass. With
//! anti-flood disabled every queue drains at once.

use std::collections::VecDeque;

use crate::message::tags::Tag;

/// Send priority classes, highest first.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    /// Sent on the next drain regardless of flood control.
    Immediate,
    /// User-initiated traffic.
    High,
    /// Automatic traffic (CTCP replies, away checks).
    Low,
}

/// One enqueued wire frame.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    /// Frame text before outbound modifiers ran.
    pub initial: String,
    /// Frame text actually sent.
    pub message: String,
    /// Whether a modifier rewrote the frame.
    pub modified: bool,
    /// Tags to re-emit in the outbound signal.
    pub tags: Vec<Tag>,
}

impl QueuedMessage {
    pub fn new(message: &str) -> Self {
        QueuedMessage {
            initial: message.to_string(),
            message: message.to_string(),
            modified: false,
            tags: Vec::new(),
        }
    }
}

/// The three per-server FIFOs.
#[derive(Clone, Debug, Default)]
pub struct OutQueue {
    immediate: VecDeque<QueuedMessage>,
    high: VecDeque<QueuedMessage>,
    low: VecDeque<QueuedMessage>,
}

impl OutQueue {
    pub fn new() -> Self {
        OutQueue::default()
    }

    pub fn push(&mut self, priority: Priority, msg: QueuedMessage) {
        match priority {
            Priority::Immediate => self.immediate.push_back(msg),
            Priority::High => self.high.push_back(msg),
            Priority::Low => self.low.push_back(msg),
        }
    }

    /// Total queued frames across all priorities.
    pub fn len(&self) -> usize {
        self.immediate.len() + self.high.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.immediate.clear();
        self.high.clear();
        self.low.clear();
    }

    /// One drain pass. With `anti_flood` the immediate queue empties
    /// and at most one high- or low-priority frame follows; without it
    /// everything goes.
    pub fn drain(&mut self, anti_flood: bool) -> Vec<QueuedMessage> {
        let mut out: Vec<QueuedMessage> = self.immediate.drain(..).collect();

        if anti_flood {
            if let Some(msg) = self.high.pop_front() {
                out.push(msg);
            } else if let Some(msg) = self.low.pop_front() {
                out.push(msg);
            }
        } else {
            out.extend(self.high.drain(..));
            out.extend(self.low.drain(..));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(queue: &mut OutQueue, priority: Priority, text: &str) {
        queue.push(priority, QueuedMessage::new(text));
    }

    #[test]
    fn test_immediate_drains_fully() {
        let mut queue = OutQueue::new();
        push(&mut queue, Priority::Immediate, "PONG :a");
        push(&mut queue, Priority::Immediate, "PONG :b");
        push(&mut queue, Priority::High, "PRIVMSG #c :1");
        let drained = queue.drain(true);
        let texts: Vec<&str> = drained.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["PONG :a", "PONG :b", "PRIVMSG #c :1"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_one_high_or_low_per_pass() {
        let mut queue = OutQueue::new();
        push(&mut queue, Priority::High, "h1");
        push(&mut queue, Priority::High, "h2");
        push(&mut queue, Priority::Low, "l1");

        assert_eq!(queue.drain(true).len(), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(true)[0].message, "h2");
        // high exhausted, low goes next
        assert_eq!(queue.drain(true)[0].message, "l1");
        assert!(queue.drain(true).is_empty());
    }

    #[test]
    fn test_high_preempts_low() {
        let mut queue = OutQueue::new();
        push(&mut queue, Priority::Low, "l1");
        push(&mut queue, Priority::High, "h1");
        assert_eq!(queue.drain(true)[0].message, "h1");
        assert_eq!(queue.drain(true)[0].message, "l1");
    }

    #[test]
    fn test_no_anti_flood_drains_everything() {
        let mut queue = OutQueue::new();
        push(&mut queue, Priority::Low, "l1");
        push(&mut queue, Priority::High, "h1");
        push(&mut queue, Priority::Immediate, "i1");
        let drained = queue.drain(false);
        let texts: Vec<&str> = drained.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["i1", "h1", "l1"]);
    }

    #[test]
    fn test_fifo_within_class() {
        let mut queue = OutQueue::new();
        for i in 0..5 {
            push(&mut queue, Priority::High, &format!("m{}", i));
        }
        for i in 0..5 {
            assert_eq!(queue.drain(true)[0].message, format!("m{}", i));
        }
    }
}
