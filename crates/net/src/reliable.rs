use std::collections::VecDeque;

use crate::protocol::{Payload, ReliableMessage, sequence_greater_than};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub sequence: u32,
    pub message: ReliableMessage,
    attempts: u32,
    next_send_tick: u32,
}

impl OutgoingMessage {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[derive(Debug, Default)]
pub struct ReliablePoll {
    pub transmit: Option<Payload>,
    pub dropped: Vec<OutgoingMessage>,
}

/// Per-peer FIFO of messages that must arrive, in order.
///
/// Only the head is ever in flight, so a later message can never overtake an
/// earlier one. The head is resent every `resend_ticks` until acknowledged
/// and dropped after `max_attempts` transmissions.
#[derive(Debug)]
pub struct ReliableQueue {
    queue: VecDeque<OutgoingMessage>,
    next_sequence: u32,
    resend_ticks: u32,
    max_attempts: u32,
}

impl ReliableQueue {
    pub fn new(resend_ticks: u32, max_attempts: u32) -> Self {
        Self {
            queue: VecDeque::new(),
            next_sequence: 1,
            resend_ticks: resend_ticks.max(1),
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn push(&mut self, message: ReliableMessage) -> u32 {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        self.queue.push_back(OutgoingMessage {
            sequence,
            message,
            attempts: 0,
            next_send_tick: 0,
        });
        sequence
    }

    pub fn poll(&mut self, tick: u32) -> ReliablePoll {
        let mut result = ReliablePoll::default();

        while let Some(head) = self.queue.front_mut() {
            let due = head.attempts == 0 || !sequence_greater_than(head.next_send_tick, tick);
            if !due {
                break;
            }

            if head.attempts >= self.max_attempts {
                if let Some(dropped) = self.queue.pop_front() {
                    result.dropped.push(dropped);
                }
                continue;
            }

            head.attempts += 1;
            head.next_send_tick = tick.wrapping_add(self.resend_ticks);
            result.transmit = Some(Payload::Reliable {
                sequence: head.sequence,
                message: head.message.clone(),
            });
            break;
        }

        result
    }

    /// Returns true when the ack released the in-flight message.
    pub fn on_ack(&mut self, sequence: u32) -> bool {
        if self.queue.front().is_some_and(|m| m.sequence == sequence && m.attempts > 0) {
            self.queue.pop_front();
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Abandons everything still queued.
    pub fn clear(&mut self) -> usize {
        let abandoned = self.queue.len();
        self.queue.clear();
        abandoned
    }
}

/// Receiving side: delivers each sequence at most once and never goes backwards.
#[derive(Debug, Default)]
pub struct ReliableReceiver {
    last_delivered: Option<u32>,
}

impl ReliableReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the message should be delivered. The sender must be acked either way.
    pub fn accept(&mut self, sequence: u32) -> bool {
        match self.last_delivered {
            Some(last) if !sequence_greater_than(sequence, last) => false,
            _ => {
                self.last_delivered = Some(sequence);
                true
            }
        }
    }
}
