//  Copyright 2024 UFO Engine Developers.
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};
use crate::{
    buffer::{Buffer, Requisition},
    error::{Error, Result},
};

/// How long any blocking queue operation sleeps before re-checking the stop
/// flag. Bounds the reaction time to cancellation.
pub(crate) const QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

struct PoolState {
    allocated: usize,
    queue: VecDeque<Buffer>,
}

pub(crate) struct PoolInner {
    capacity: usize,
    stop: Arc<AtomicBool>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    pub(crate) fn put_back(inner: &Arc<PoolInner>, buffer: Buffer) {
        let mut state = inner.state.lock().unwrap();
        state.queue.push_back(buffer);
        inner.available.notify_one();
    }
}

/// A bounded allocator that recycles buffers of compatible shape. `acquire`
/// allocates fresh buffers until `capacity` are outstanding, then blocks on a
/// FIFO of released ones, resizing on shape mismatch. Back-pressure between
/// producers and consumers comes entirely from this bound.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(capacity: usize, stop: Arc<AtomicBool>) -> Self {
        BufferPool {
            inner: Arc::new(PoolInner {
                capacity,
                stop,
                state: Mutex::new(PoolState { allocated: 0, queue: VecDeque::new() }),
                available: Condvar::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// A buffer matching `req`. May block until another holder releases one;
    /// returns `Error::Canceled` when the engine is being stopped.
    pub fn acquire(&self, req: &Requisition) -> Result<Buffer> {
        let mut state = self.inner.state.lock().unwrap();

        if state.allocated < self.inner.capacity {
            state.allocated += 1;
            return Ok(Buffer::with_pool(req, Arc::downgrade(&self.inner)));
        }

        loop {
            if let Some(mut buffer) = state.queue.pop_front() {
                if !buffer.cmp_dimensions(req) {
                    buffer.resize(req);
                }
                return Ok(buffer);
            }
            if self.inner.stop.load(Ordering::Relaxed) {
                return Err(Error::Canceled);
            }
            let (guard, _timeout) = self
                .inner
                .available
                .wait_timeout(state, QUEUE_TIMEOUT)
                .map_err(|_| Error::fatal("buffer pool lock poisoned"))?;
            state = guard;
        }
    }

    /// Hand a buffer back to this pool directly. Equivalent to
    /// `buffer.release()` for buffers this pool minted.
    pub fn release(&self, buffer: Buffer) {
        PoolInner::put_back(&self.inner, buffer);
    }

    /// Buffers currently waiting in the FIFO. Used by tests and teardown.
    pub fn idle(&self) -> usize {
        self.inner.state.lock().unwrap().queue.len()
    }
}
