use std::collections::VecDeque;

use crate::providers::provider::{Message, Role};

/// Running user/assistant history behind a fixed system preamble.
///
/// Turns are committed as whole pairs, so the history never ends on a
/// dangling user message. Once more than `max_messages` are held the oldest
/// pairs are evicted; the preamble is never evicted.
#[derive(Debug, Clone)]
pub struct Conversation {
    preamble: Option<String>,
    turns: VecDeque<Message>,
    max_messages: usize,
    evicted: usize,
}

impl Conversation {
    pub fn new(preamble: Option<String>, max_messages: usize) -> Self {
        Self {
            preamble: preamble.filter(|p| !p.is_empty()),
            turns: VecDeque::new(),
            // room for at least one full pair
            max_messages: max_messages.max(2),
            evicted: 0,
        }
    }

    /// Messages for the next request: preamble, history, then `pending`.
    pub fn request_messages(&self, pending: &str) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.turns.len() + 2);
        if let Some(preamble) = &self.preamble {
            messages.push(Message::system(preamble));
        }
        messages.extend(self.turns.iter().cloned());
        messages.push(Message::user(pending));
        messages
    }

    /// Record a finished round trip.
    pub fn commit_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push_back(Message::user(user));
        self.turns.push_back(Message::assistant(assistant));
        while self.turns.len() > self.max_messages {
            // pairs keep user/assistant alternation intact
            self.turns.pop_front();
            self.turns.pop_front();
            self.evicted += 2;
        }
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.turns.iter()
    }

    pub fn preamble(&self) -> Option<&str> {
        self.preamble.as_deref()
    }

    /// History length, preamble excluded.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn evicted(&self) -> usize {
        self.evicted
    }

    pub fn last_role(&self) -> Option<Role> {
        self.turns.back().map(|m| m.role)
    }
}
