//! Work queue shared between the planner and the decode worker.
//!
//! - Mutex-guarded deque with a condition variable for the blocking `take`
//! - Newly visible blocks are pushed to the front (most recent reveal first)
//! - Pending entries can be removed again when a block scrolls out of view
//! - A `Wake` job unblocks the worker on release

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::block::RenderBlock;

/// Unit of work for the decode worker.
#[derive(Debug, Clone)]
pub enum DecodeJob {
    /// Decode a tile at the block's current sample size.
    Block(Arc<RenderBlock>),
    /// Decode the whole image at a coarse sample size.
    Background { in_sample_size: u32 },
    /// Sentinel pushed by `release()` so a blocked `take` returns.
    Wake,
}

impl DecodeJob {
    pub fn is_block(&self, block: &Arc<RenderBlock>) -> bool {
        matches!(self, DecodeJob::Block(b) if Arc::ptr_eq(b, block))
    }

    pub fn is_tile(&self) -> bool {
        matches!(self, DecodeJob::Block(_))
    }

    pub fn is_background(&self) -> bool {
        matches!(self, DecodeJob::Background { .. })
    }
}

/// Double-ended queue whose `take` blocks until an element is available.
pub struct BlockingDeque<T> {
    items: Mutex<VecDeque<T>>,
    available: Condvar,
}

impl<T> BlockingDeque<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn put_first(&self, item: T) {
        self.items.lock().push_front(item);
        self.available.notify_one();
    }

    /// Remove and return the first element, waiting for one if necessary.
    pub fn take(&self) -> T {
        self.take_then(|_| {})
    }

    /// Blocking take that runs `on_take` while the queue lock is still held,
    /// so observers never see the element neither queued nor claimed.
    pub fn take_then(&self, on_take: impl FnOnce(&T)) -> T {
        let mut items = self.items.lock();
        loop {
            if let Some(item) = items.pop_front() {
                on_take(&item);
                return item;
            }
            self.available.wait(&mut items);
        }
    }

    /// Remove every element matching `predicate`; returns how many went.
    pub fn remove_where(&self, mut predicate: impl FnMut(&T) -> bool) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.retain(|item| !predicate(item));
        before - items.len()
    }

    pub fn contains_where(&self, predicate: impl FnMut(&T) -> bool) -> bool {
        self.items.lock().iter().any(predicate)
    }

    /// Apply a batch of changes under a single lock acquisition.
    pub fn with_items<R>(&self, f: impl FnOnce(&mut VecDeque<T>) -> R) -> R {
        let result = f(&mut self.items.lock());
        self.available.notify_one();
        result
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for BlockingDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}
