//! Progressive publication of parsed channels
//!
//! Accumulates channels for one run and decides when a snapshot is handed
//! to the controller: once when the fast-path threshold is first reached,
//! optionally every `flush_every` channels after that, and always at end of
//! stream.

use std::sync::Arc;

use crate::config::Config;
use crate::models::channel::{Channel, ChannelList};

/// When to publish snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishPolicy {
    /// Channel count that triggers the one-time milestone flush (0 = off)
    pub fast_path_threshold: usize,
    /// Intermediate flush interval after the milestone (0 = off)
    pub flush_every: usize,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self {
            fast_path_threshold: 20,
            flush_every: 500,
        }
    }
}

impl PublishPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fast_path_threshold: config.fast_path_threshold,
            flush_every: config.flush_every,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushKind {
    Milestone,
    Batch,
    Final,
}

/// Snapshot handed to the consumer
#[derive(Debug, Clone)]
pub struct Flush {
    pub kind: FlushKind,
    pub channels: ChannelList,
    /// First flush of the run: initial content is ready
    pub initial: bool,
}

/// Append-only accumulator for one parse run
#[derive(Debug)]
pub struct ProgressivePublisher {
    policy: PublishPolicy,
    accumulated: Vec<Channel>,
    milestone_reached: bool,
    last_flush_len: usize,
    flushed_any: bool,
}

impl ProgressivePublisher {
    pub fn new(policy: PublishPolicy) -> Self {
        Self {
            policy,
            accumulated: Vec::new(),
            milestone_reached: false,
            last_flush_len: 0,
            flushed_any: false,
        }
    }

    /// Add a channel; returns a snapshot when the policy says to flush
    pub fn push(&mut self, channel: Channel) -> Option<Flush> {
        self.accumulated.push(channel);
        let len = self.accumulated.len();

        if !self.milestone_reached {
            let threshold = self.policy.fast_path_threshold;
            if threshold > 0 && len >= threshold {
                self.milestone_reached = true;
                return Some(self.snapshot(FlushKind::Milestone));
            }
            return None;
        }

        let every = self.policy.flush_every;
        if every > 0 && len - self.last_flush_len >= every {
            return Some(self.snapshot(FlushKind::Batch));
        }

        None
    }

    /// End of stream: publish the full list
    pub fn finish(self) -> Flush {
        Flush {
            kind: FlushKind::Final,
            initial: !self.flushed_any,
            channels: Arc::from(self.accumulated),
        }
    }

    pub fn len(&self) -> usize {
        self.accumulated.len()
    }

    fn snapshot(&mut self, kind: FlushKind) -> Flush {
        let initial = !self.flushed_any;
        self.flushed_any = true;
        self.last_flush_len = self.accumulated.len();

        Flush {
            kind,
            channels: Arc::from(self.accumulated.as_slice()),
            initial,
        }
    }
}
