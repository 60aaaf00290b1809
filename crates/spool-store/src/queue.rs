//! Bounded in-memory queue in front of the persistence worker.
//!
//! Producers are never blocked and never told about saturation: `offer`
//! always succeeds from the caller's point of view, and overflow is resolved
//! by the configured [`BackPressureMitigation`].

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use spool_common::{InternalLogger, LogLevel, LogTarget};
use spool_config::{BackPressureConfig, BackPressureMitigation};

type ThresholdCallback = Arc<dyn Fn() + Send + Sync>;
type DropCallback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Queue sizing and overflow behaviour.
pub struct BackPressureStrategy<T> {
    pub capacity: usize,
    pub mitigation: BackPressureMitigation,
    on_threshold_reached: ThresholdCallback,
    on_item_dropped: DropCallback<T>,
}

impl<T> BackPressureStrategy<T> {
    pub fn new(capacity: usize, mitigation: BackPressureMitigation) -> Self {
        Self {
            capacity,
            mitigation,
            on_threshold_reached: Arc::new(|| {}),
            on_item_dropped: Arc::new(|_| {}),
        }
    }

    pub fn from_config(config: &BackPressureConfig) -> Self {
        Self::new(config.capacity, config.mitigation)
    }

    /// Called when the queue is about to become full.
    pub fn with_on_threshold_reached(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_threshold_reached = Arc::new(callback);
        self
    }

    /// Called with every item discarded by the mitigation.
    pub fn with_on_item_dropped(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_item_dropped = Arc::new(callback);
        self
    }

    pub(crate) fn item_dropped_callback(&self) -> DropCallback<T> {
        self.on_item_dropped.clone()
    }
}

impl<T> Clone for BackPressureStrategy<T> {
    fn clone(&self) -> Self {
        Self {
            capacity: self.capacity,
            mitigation: self.mitigation,
            on_threshold_reached: self.on_threshold_reached.clone(),
            on_item_dropped: self.on_item_dropped.clone(),
        }
    }
}

impl<T> std::fmt::Debug for BackPressureStrategy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackPressureStrategy")
            .field("capacity", &self.capacity)
            .field("mitigation", &self.mitigation)
            .finish_non_exhaustive()
    }
}

/// Bounded FIFO with a drop policy instead of a blocking put.
pub struct BackPressuredQueue<T> {
    items: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    strategy: BackPressureStrategy<T>,
    logger: Arc<dyn InternalLogger>,
}

impl<T> BackPressuredQueue<T> {
    pub fn new(strategy: BackPressureStrategy<T>, logger: Arc<dyn InternalLogger>) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(strategy.capacity.min(1024))),
            not_empty: Condvar::new(),
            strategy,
            logger,
        }
    }

    /// Enqueue `item`, applying the mitigation when full. Always returns `true`.
    pub fn offer(&self, item: T) -> bool {
        let capacity = self.strategy.capacity;
        let mut threshold_reached = false;
        let dropped = {
            let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
            let remaining = capacity.saturating_sub(items.len());
            if remaining == 0 {
                match self.strategy.mitigation {
                    BackPressureMitigation::DropOldest => {
                        let oldest = items.pop_front();
                        items.push_back(item);
                        oldest
                    }
                    BackPressureMitigation::IgnoreNewest => Some(item),
                }
            } else {
                threshold_reached = remaining == 1;
                items.push_back(item);
                None
            }
        };
        self.not_empty.notify_one();

        if threshold_reached {
            self.logger.log(
                LogLevel::Warn,
                LogTarget::Maintainer,
                &format!("back-pressure threshold reached, queue capacity is {}", capacity),
            );
            (self.strategy.on_threshold_reached)();
        }
        if let Some(dropped) = dropped {
            self.logger.log(
                LogLevel::Warn,
                LogTarget::Maintainer,
                &format!(
                    "queue is full ({} items), dropped an item ({:?})",
                    capacity, self.strategy.mitigation
                ),
            );
            (self.strategy.on_item_dropped)(&dropped);
        }
        true
    }

    /// Remove the head, waiting up to `timeout` for one to arrive.
    pub fn take_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(item) = items.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _) = self
                .not_empty
                .wait_timeout(items, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            items = guard;
        }
    }

    pub fn poll(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Remove and return everything queued.
    pub fn drain(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.strategy.capacity
    }

    pub fn remaining_capacity(&self) -> usize {
        self.strategy.capacity.saturating_sub(self.len())
    }
}
