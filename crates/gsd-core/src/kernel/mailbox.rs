//! Mailbox - per-engine FIFO of pending messages.

use std::collections::VecDeque;

use crate::protocol::KernelMessage;

#[derive(Debug, Default)]
pub struct Mailbox {
    queue: VecDeque<KernelMessage>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: KernelMessage) {
        self.queue.push_back(message);
    }

    /// Take every pending message in arrival order, leaving the mailbox empty.
    pub fn drain(&mut self) -> Vec<KernelMessage> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
