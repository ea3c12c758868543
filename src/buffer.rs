//! Per-channel conversation buffers

use std::collections::VecDeque;

use crate::markov::MarkovModel;

/// Fixed-capacity window over the most recent characters of a stream
#[derive(Debug, Clone)]
pub struct ContextWindow {
    chars: VecDeque<char>,
    capacity: usize,
}

impl ContextWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chars: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append `text`, dropping the oldest characters past capacity
    pub fn push_str(&mut self, text: &str) {
        for c in text.chars() {
            if self.chars.len() == self.capacity {
                self.chars.pop_front();
            }
            self.chars.push_back(c);
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_string(&self) -> String {
        self.chars.iter().collect()
    }
}

/// Working state for one channel. Never persisted.
#[derive(Debug, Clone)]
pub struct ConversationBuffer {
    /// Messages seen since the last post
    pub message_count: u32,
    /// Post once `message_count` reaches this
    pub post_threshold: u32,
    /// Seed for the next cadence post
    pub reply_context: String,
    /// Author of the message that produced `reply_context`
    pub last_replied_author: String,
    /// Last `order` characters of everything seen
    rolling_stream: ContextWindow,
    /// Learnable text not yet folded into the model
    pending_learn_text: String,
    dirty: bool,
}

impl ConversationBuffer {
    pub fn new(order: usize, post_threshold: u32) -> Self {
        Self {
            message_count: 0,
            post_threshold,
            reply_context: String::new(),
            last_replied_author: String::new(),
            rolling_stream: ContextWindow::new(order),
            pending_learn_text: String::new(),
            dirty: false,
        }
    }

    /// Count a message and slide the rolling stream over it
    pub fn observe(&mut self, text: &str) {
        self.message_count = self.message_count.saturating_add(1);
        self.rolling_stream.push_str(text);
        self.rolling_stream.push_str("\n");
    }

    /// Queue a message for the background learner
    pub fn queue_for_learning(&mut self, text: &str) {
        self.pending_learn_text.push_str(text);
        self.pending_learn_text.push('\n');
        self.dirty = true;
    }

    /// Current rolling stream contents
    pub fn rolling_stream(&self) -> String {
        self.rolling_stream.as_string()
    }

    pub fn pending_learn_text(&self) -> &str {
        &self.pending_learn_text
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Record the rolling stream as the next reply seed
    pub fn capture_reply_context(&mut self, author: &str) {
        self.reply_context = self.rolling_stream.as_string();
        self.last_replied_author = author.to_string();
    }

    pub fn cadence_reached(&self) -> bool {
        self.message_count >= self.post_threshold
    }

    /// Reset cadence after a successful post
    pub fn record_post(&mut self, next_threshold: u32) {
        self.message_count = 0;
        self.post_threshold = next_threshold;
    }

    /// Fold pending text into `model`, keeping the overlap tail.
    ///
    /// Returns whether anything was learned.
    pub fn fold_into(&mut self, model: &mut MarkovModel) -> bool {
        if !self.dirty {
            return false;
        }
        self.pending_learn_text = model.learn(&self.pending_learn_text);
        self.dirty = false;
        true
    }
}
