//! # Stream Flow Control
//!
//! Credit-based windows for one direction of one stream.
//!
//! A [`Window`] holds a `capacity` and the bytes `consumed` against it; the
//! usable size is their difference and `consumed <= capacity` always holds.
//! The send side consumes credit as body bytes go out and regains it from
//! peer window updates. The receive side consumes credit as body bytes
//! arrive and releases it once they are handed to the handler; released
//! bytes accumulate in a [`WindowUpdateTracker`] until enough have built up
//! to be worth granting back to the peer.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Largest legal window (2^31 - 1).
pub const MAX_WINDOW_SIZE: u32 = (1u32 << 31) - 1;

/// Default initial window for both directions.
pub const DEFAULT_WINDOW_SIZE: u32 = 65_535;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
    #[error("window exhausted: requested {requested}, available {available}")]
    Exhausted { requested: u32, available: u32 },

    #[error("window overflow: {size} + {increment} exceeds maximum")]
    Overflow { size: u32, increment: u32 },

    #[error("freeing {requested} bytes but only {consumed} consumed")]
    Underflow { requested: u32, consumed: u32 },

    #[error("capacity {capacity} below {consumed} bytes already consumed")]
    CapacityBelowConsumed { capacity: u32, consumed: u32 },
}

/// Flow-control budget for one direction of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    capacity: u32,
    consumed: u32,
}

impl Window {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity: capacity.min(MAX_WINDOW_SIZE),
            consumed: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn consumed(&self) -> u32 {
        self.consumed
    }

    /// Bytes that may still be consumed.
    pub fn size(&self) -> u32 {
        self.capacity - self.consumed
    }

    /// Consume `amount` bytes of credit.
    pub fn reserve(&mut self, amount: u32) -> Result<(), WindowError> {
        if amount > self.size() {
            return Err(WindowError::Exhausted {
                requested: amount,
                available: self.size(),
            });
        }
        self.consumed += amount;
        Ok(())
    }

    /// Return `amount` previously consumed bytes.
    pub fn free(&mut self, amount: u32) -> Result<(), WindowError> {
        if amount > self.consumed {
            return Err(WindowError::Underflow {
                requested: amount,
                consumed: self.consumed,
            });
        }
        self.consumed -= amount;
        Ok(())
    }

    /// Apply a credit grant from the peer.
    ///
    /// Credit first repays consumed bytes; any surplus grows the capacity.
    /// Fails without changing anything if the resulting size would exceed
    /// [`MAX_WINDOW_SIZE`].
    pub fn grant(&mut self, amount: u32) -> Result<(), WindowError> {
        let size = self.size();
        if u64::from(size) + u64::from(amount) > u64::from(MAX_WINDOW_SIZE) {
            return Err(WindowError::Overflow {
                size,
                increment: amount,
            });
        }
        if amount <= self.consumed {
            self.consumed -= amount;
        } else {
            self.capacity += amount - self.consumed;
            self.consumed = 0;
        }
        Ok(())
    }

    /// Replace the capacity. Refused if it would drop below what has
    /// already been consumed or above [`MAX_WINDOW_SIZE`].
    pub fn set_capacity(&mut self, capacity: u32) -> Result<(), WindowError> {
        if capacity > MAX_WINDOW_SIZE {
            return Err(WindowError::Overflow {
                size: self.capacity,
                increment: capacity - self.capacity.min(capacity),
            });
        }
        if capacity < self.consumed {
            return Err(WindowError::CapacityBelowConsumed {
                capacity,
                consumed: self.consumed,
            });
        }
        self.capacity = capacity;
        Ok(())
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

/// Accumulates released receive credit until it is worth a window update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowUpdateTracker {
    pending: u32,
}

impl WindowUpdateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> u32 {
        self.pending
    }

    pub fn record(&mut self, amount: u32) {
        self.pending = self.pending.saturating_add(amount);
    }

    /// True once at least `capacity / divisor` bytes are pending.
    pub fn should_flush(&self, capacity: u32, divisor: u32) -> bool {
        self.pending > 0 && self.pending >= capacity / divisor.max(1)
    }

    /// Take the pending amount, leaving zero behind.
    pub fn take(&mut self) -> u32 {
        std::mem::take(&mut self.pending)
    }
}
