//! Bounded in-memory mail store

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::smtp::error::{Result, SmtpError};
use crate::smtp::message::MailMessage;
use crate::store::MailStore;

/// In-memory store holding the most recent messages.
///
/// When full, adding a message evicts the oldest one (FIFO by insertion,
/// reads never reorder). The capacity check, eviction and insertion happen
/// under one lock, so concurrent sessions can never push the store past its
/// capacity.
#[derive(Debug)]
pub struct RollingMailStore {
    messages: Mutex<VecDeque<Arc<MailMessage>>>,
    capacity: usize,
}

impl RollingMailStore {
    pub const DEFAULT_CAPACITY: usize = 100;

    /// Create a store that keeps the last 100 messages
    pub fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::with_capacity(Self::DEFAULT_CAPACITY)),
            capacity: Self::DEFAULT_CAPACITY,
        }
    }

    /// Create a store that keeps the last `capacity` messages.
    ///
    /// A capacity of zero is rejected.
    pub fn with_capacity(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(SmtpError::InvalidOption(
                "rolling mail store capacity must be at least 1".to_owned(),
            ));
        }

        Ok(Self {
            messages: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // The deque is never left half-updated, so a poisoned lock is still usable
    fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<MailMessage>>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RollingMailStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MailStore for RollingMailStore {
    fn add(&self, message: MailMessage) -> Result<()> {
        let mut messages = self.lock();
        if messages.len() >= self.capacity {
            messages.pop_front();
            debug!(capacity = self.capacity, "Evicted oldest message");
        }
        messages.push_back(Arc::new(message));
        Ok(())
    }

    fn messages(&self) -> Result<Vec<Arc<MailMessage>>> {
        Ok(self.lock().iter().cloned().collect())
    }

    fn message(&self, index: usize) -> Result<Arc<MailMessage>> {
        let messages = self.lock();
        messages
            .get(index)
            .cloned()
            .ok_or(SmtpError::IndexOutOfRange {
                index,
                len: messages.len(),
            })
    }

    fn len(&self) -> Result<usize> {
        Ok(self.lock().len())
    }

    fn clear(&self) -> Result<()> {
        self.lock().clear();
        Ok(())
    }
}
